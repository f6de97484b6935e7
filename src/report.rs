//! Per-batch provenance dossier: JSON + Markdown.
//!
//! A dossier collects everything the hub knows about one batch: the record
//! itself, its certification, its owner and event history, and every
//! shipment and transfer that names it.  `manifest.json` pins the exact
//! bytes of `dossier.json` with a SHA-256 digest.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{Batch, BatchEvent, BatchId, Certification};
use crate::env::LedgerTime;
use crate::error::{ProvenanceError, RecordKind, Result, ResultExt as _};
use crate::history::HistoryEntry;
use crate::hub::ProvenanceHub;
use crate::principal::Principal;
use crate::shipment::{Shipment, ShipmentId};
use crate::transfer::{Transfer, TransferEvent, TransferId};

pub const DOSSIER_FORMAT: &str = "provenance-dossier-v1";

// ---------------------------------------------------------------------------
// Dossier model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DossierManifest {
    pub format: String,
    pub generated_at_utc: String,
    pub software: String,
    pub batch_id: BatchId,
    pub ledger_time: LedgerTime,
    pub history_entries: usize,
    pub dossier_sha256_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDossier {
    pub batch_id: BatchId,
    pub batch: Batch,
    pub certification: Option<Certification>,
    /// `valid`, `expired`, or `uncertified` at the ledger time of the dossier.
    pub certification_status: String,
    pub owner_history: Vec<Principal>,
    pub history: Vec<HistoryEntry<BatchEvent>>,
    pub shipments: Vec<DossierShipment>,
    pub transfers: Vec<DossierTransfer>,
    pub transfer_history: Vec<HistoryEntry<TransferEvent>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DossierShipment {
    pub shipment_id: ShipmentId,
    #[serde(flatten)]
    pub shipment: Shipment,
    pub approval_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DossierTransfer {
    pub transfer_id: TransferId,
    #[serde(flatten)]
    pub transfer: Transfer,
    pub escrow_held: bool,
}

/// Collect the dossier for `batch_id` from `hub`.
pub fn build_batch_dossier(hub: &ProvenanceHub, batch_id: BatchId) -> Result<BatchDossier> {
    let batch = hub
        .batches
        .batch(batch_id)
        .ok_or_else(|| ProvenanceError::not_found(RecordKind::Batch, batch_id))?;
    let now = hub.now();

    let certification_status = match hub.batches.check_cert_status(batch_id, now) {
        Ok(()) => "valid",
        Err(_) if batch.certified => "expired",
        Err(_) => "uncertified",
    };

    let shipments = hub
        .shipments
        .shipments_for_batch(batch_id)
        .map(|(id, s)| DossierShipment {
            shipment_id: id,
            shipment: s.clone(),
            approval_count: hub.shipments.approval_count(id),
        })
        .collect();

    let transfers = hub
        .transfers
        .transfers_for_batch(batch_id)
        .into_iter()
        .filter_map(|id| {
            hub.transfers.transfer(id).map(|t| DossierTransfer {
                transfer_id: id,
                transfer: t.clone(),
                escrow_held: hub.transfers.escrow(id).is_some(),
            })
        })
        .collect();

    Ok(BatchDossier {
        batch_id,
        batch: batch.clone(),
        certification: hub.batches.certification(batch_id).cloned(),
        certification_status: certification_status.to_string(),
        owner_history: hub
            .batches
            .owner_history(batch_id)
            .into_iter()
            .cloned()
            .collect(),
        history: hub.batches.history(batch_id).to_vec(),
        shipments,
        transfers,
        transfer_history: hub.transfers.history(batch_id).to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write `manifest.json`, `dossier.json`, and `dossier.md` into `out_dir`.
pub fn write_batch_dossier(
    out_dir: &Path,
    hub: &ProvenanceHub,
    batch_id: BatchId,
) -> Result<DossierManifest> {
    let dossier = build_batch_dossier(hub, batch_id)?;
    std::fs::create_dir_all(out_dir)
        .ctx_report(&format!("create out dir {}", out_dir.display()))?;

    let dossier_json = serde_json::to_vec_pretty(&dossier).ctx_report("serialize dossier")?;
    let manifest = DossierManifest {
        format: DOSSIER_FORMAT.to_string(),
        generated_at_utc: crate::util::now_utc_rfc3339(),
        software: crate::util::version_string(),
        batch_id,
        ledger_time: hub.now(),
        history_entries: dossier.history.len() + dossier.transfer_history.len(),
        dossier_sha256_hex: crate::util::sha256_hex(&dossier_json),
    };

    let dossier_path = out_dir.join("dossier.json");
    std::fs::write(&dossier_path, &dossier_json)
        .ctx_report(&format!("write {}", dossier_path.display()))?;

    let manifest_path = out_dir.join("manifest.json");
    let manifest_json = serde_json::to_vec_pretty(&manifest).ctx_report("serialize manifest")?;
    std::fs::write(&manifest_path, manifest_json)
        .ctx_report(&format!("write {}", manifest_path.display()))?;

    let md_path = out_dir.join("dossier.md");
    std::fs::write(&md_path, render_markdown(&manifest, &dossier))
        .ctx_report(&format!("write {}", md_path.display()))?;

    info!(
        batch_id,
        out_dir = %out_dir.display(),
        digest = %manifest.dossier_sha256_hex,
        "dossier written"
    );
    Ok(manifest)
}

/// Check that `dossier.json` in `out_dir` still matches its manifest digest.
pub fn verify_dossier(out_dir: &Path) -> Result<()> {
    let manifest_bytes = std::fs::read(out_dir.join("manifest.json"))
        .ctx_report("read manifest.json")?;
    let manifest: DossierManifest =
        serde_json::from_slice(&manifest_bytes).ctx_report("parse manifest.json")?;
    let dossier_bytes =
        std::fs::read(out_dir.join("dossier.json")).ctx_report("read dossier.json")?;
    let actual = crate::util::sha256_hex(&dossier_bytes);
    if actual != manifest.dossier_sha256_hex {
        return Err(ProvenanceError::Report(format!(
            "dossier digest mismatch: manifest {} vs file {actual}",
            manifest.dossier_sha256_hex
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

fn escape_md(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

pub fn render_markdown(manifest: &DossierManifest, d: &BatchDossier) -> String {
    let b = &d.batch;
    let mut out = String::new();
    let _ = writeln!(out, "# Batch {} provenance dossier\n", d.batch_id);
    let _ = writeln!(out, "- Generated (UTC): {}", manifest.generated_at_utc);
    let _ = writeln!(out, "- Ledger time: {}", manifest.ledger_time);
    let _ = writeln!(out, "- Software: {}", manifest.software);
    let _ = writeln!(out, "- dossier.json SHA-256: `{}`\n", manifest.dossier_sha256_hex);

    out.push_str("## Batch\n\n| Field | Value |\n|---|---|\n");
    let rows: [(&str, String); 11] = [
        ("Title", escape_md(&b.title)),
        ("Description", escape_md(&b.description)),
        ("Hash", format!("`{}`", b.hash)),
        ("Harvest date", b.harvest_date.to_string()),
        ("Batch size", b.batch_size.to_string()),
        ("Certifying body", escape_md(&b.cert_body)),
        ("Geo", escape_md(&b.geo_location)),
        ("Quality", b.quality_metric.to_string()),
        ("Owner", b.owner.to_string()),
        ("Active", b.active.to_string()),
        ("Certification", d.certification_status.clone()),
    ];
    for (k, v) in rows {
        let _ = writeln!(out, "| {k} | {v} |");
    }

    if let Some(c) = &d.certification {
        let _ = writeln!(
            out,
            "\nCertified by {} at {}, expires {} (`{}`).",
            c.issuer, c.issued_at, c.expires_at, c.cert_hash
        );
    }

    out.push_str("\n## Owners\n\n");
    for (i, owner) in d.owner_history.iter().enumerate() {
        let _ = writeln!(out, "{}. {owner}", i + 1);
    }

    out.push_str("\n## Batch history\n\n| # | At | Actor | Event |\n|---|---|---|---|\n");
    for e in &d.history {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            e.index,
            e.at,
            e.actor,
            escape_md(&event_label(&e.event))
        );
    }

    if !d.shipments.is_empty() {
        out.push_str("\n## Shipments\n\n| Id | Origin | Destination | Status | Approvals |\n|---|---|---|---|---|\n");
        for s in &d.shipments {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                s.shipment_id,
                s.shipment.origin,
                s.shipment.destination,
                s.shipment.status,
                s.approval_count
            );
        }
    }

    if !d.transfers.is_empty() {
        out.push_str("\n## Transfers\n\n| Id | From | To | Escrow | Status |\n|---|---|---|---|---|\n");
        for t in &d.transfers {
            let held = if t.escrow_held { " (held)" } else { "" };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {}{held} | {} |",
                t.transfer_id,
                t.transfer.from_owner,
                t.transfer.to_owner,
                t.transfer.escrow_amount,
                t.transfer.status
            );
        }
    }
    out
}

fn event_label(e: &BatchEvent) -> String {
    match e {
        BatchEvent::Registered { owner } => format!("registered by {owner}"),
        BatchEvent::Certified { expires_at, .. } => format!("certified until {expires_at}"),
        BatchEvent::CertificationRevoked => "certification revoked".into(),
        BatchEvent::Updated { title, .. } => format!("updated: {title}"),
        BatchEvent::OwnershipTransferred { from, to } => format!("ownership {from} -> {to}"),
        BatchEvent::Deactivated => "deactivated".into(),
    }
}
