use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use provenance_core::{
    batch::NewBatch,
    bulk,
    config::{LoggingConfig, ProvenanceConfig},
    error::{ErrorCode, ProvenanceError},
    hub::ProvenanceHub,
    principal::Principal,
    report, store, util,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "provenance",
    version = util::VERSION,
    about = "Supply-chain provenance ledger: batches, shipments, and ownership transfers"
)]
struct Cli {
    /// Path to the JSON state snapshot.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Principal on whose behalf the command runs.
    #[arg(long, global = true, env = "PROVENANCE_CALLER")]
    caller: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LedgerArg {
    Batches,
    Shipments,
    Transfers,
    All,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a fresh state snapshot.
    Init {
        /// Install this authority on all three ledgers.
        #[arg(long)]
        authority: Option<String>,
        /// Overwrite an existing snapshot.
        #[arg(long)]
        force: bool,
    },

    /// Set the governing authority (once per ledger).
    SetAuthority {
        #[arg(long, value_enum, default_value = "all")]
        ledger: LedgerArg,
        #[arg(long)]
        principal: String,
    },

    /// Change a ledger's creation fee.
    SetFee {
        #[arg(long, value_enum)]
        ledger: LedgerArg,
        #[arg(long, allow_hyphen_values = true)]
        fee: i64,
    },

    /// Change a ledger's record capacity.
    SetCapacity {
        #[arg(long, value_enum)]
        ledger: LedgerArg,
        #[arg(long)]
        capacity: u64,
    },

    /// Move ledger time forward.
    AdvanceTime {
        #[arg(long)]
        to: u64,
    },

    // -- batches --
    RegisterBatch {
        #[arg(long)]
        hash: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        harvest_date: u64,
        #[arg(long)]
        batch_size: u32,
        #[arg(long)]
        cert_body: String,
        #[arg(long)]
        geo: String,
        #[arg(long)]
        quality: u8,
    },

    /// Register every valid row of a CSV file as a batch.
    RegisterCsv {
        #[arg(long)]
        csv: PathBuf,
    },

    CertifyBatch {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        cert_hash: String,
        #[arg(long)]
        expiry: u64,
    },

    RevokeCertification {
        #[arg(long)]
        id: u64,
    },

    UpdateBatch {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
    },

    TransferOwnership {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        new_owner: String,
    },

    DeactivateBatch {
        #[arg(long)]
        id: u64,
    },

    /// Print a batch with its certification and history.
    ShowBatch {
        #[arg(long)]
        id: u64,
    },

    /// Exit non-zero unless the batch holds an unexpired certification.
    CheckCert {
        #[arg(long)]
        id: u64,
    },

    // -- shipments --
    InitiateShipment {
        #[arg(long)]
        batch_id: u64,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        start_time: u64,
        #[arg(long)]
        geo: String,
    },

    AddApprover {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        approver: String,
    },

    ApproveShipment {
        #[arg(long)]
        id: u64,
    },

    UpdateShipmentStatus {
        #[arg(long)]
        id: u64,
        /// One of: active, in-transit, delivered, disputed.
        #[arg(long)]
        status: String,
        #[arg(long)]
        geo: String,
    },

    CompleteShipment {
        #[arg(long)]
        id: u64,
    },

    DisputeShipment {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        reason: String,
    },

    ShowShipment {
        #[arg(long)]
        id: u64,
    },

    // -- transfers --
    InitiateTransfer {
        #[arg(long)]
        batch_id: u64,
        #[arg(long)]
        new_owner: String,
        #[arg(long)]
        timestamp: u64,
        #[arg(long, allow_hyphen_values = true)]
        escrow: i64,
    },

    AcceptTransfer {
        #[arg(long)]
        id: u64,
    },

    RejectTransfer {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        reason: String,
    },

    CompleteTransfer {
        #[arg(long)]
        id: u64,
    },

    CancelTransfer {
        #[arg(long)]
        id: u64,
    },

    ShowTransfer {
        #[arg(long)]
        id: u64,
    },

    // -- whole system --
    /// Record counts, current time, fee and escrow totals.
    Status,

    /// Recompute every history hash chain.
    VerifyHistory,

    /// Write a provenance dossier for one batch.
    Report {
        #[arg(long)]
        batch_id: u64,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Check a dossier directory against its manifest digest.
    VerifyReport {
        #[arg(long)]
        dir: PathBuf,
    },

    /// List every recorded fee intent.
    Fees,

    /// Print version information.
    Version,
}

impl Commands {
    /// Whether the command changes state and the snapshot must be saved.
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Self::ShowBatch { .. }
                | Self::CheckCert { .. }
                | Self::ShowShipment { .. }
                | Self::ShowTransfer { .. }
                | Self::Status
                | Self::VerifyHistory
                | Self::Report { .. }
                | Self::VerifyReport { .. }
                | Self::Fees
                | Self::Version
                | Self::Init { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<ProvenanceError>()
                .map(ErrorCode::from)
                .map_or(1, |c| c as i32);
            eprintln!("error[{code}]: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = ProvenanceConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env();

    init_logging(&cfg.logging)?;

    if matches!(cli.cmd, Commands::Version) {
        println!("{}", util::version_string());
        return Ok(());
    }

    let state = cli.state.clone().unwrap_or_else(|| cfg.paths.state.clone());
    util::validate_path(&state, "state")?;
    let caller = cli.caller.as_deref().map(Principal::from);

    if let Commands::Init { authority, force } = &cli.cmd {
        anyhow::ensure!(
            *force || !state.exists(),
            "state {} already exists -- pass --force to overwrite",
            state.display()
        );
        let mut hub = ProvenanceHub::new(&cfg);
        if let Some(a) = authority {
            hub.set_authority_all(a.as_str().into())
                .context("set authority")?;
        }
        let id = store::export_snapshot(&hub, &state).context("write snapshot")?;
        info!(state = %state.display(), snapshot_id = %id, "state initialized");
        return Ok(());
    }

    let mut hub = store::load_or_init(&state, &cfg).context("load state")?;
    let mutates = cli.cmd.mutates();
    execute(cli.cmd, &mut hub, caller.as_ref(), &cfg)?;
    if mutates {
        store::export_snapshot(&hub, &state).context("save state")?;
    }
    Ok(())
}

fn execute(
    cmd: Commands,
    hub: &mut ProvenanceHub,
    caller: Option<&Principal>,
    cfg: &ProvenanceConfig,
) -> Result<()> {
    let who = || caller.context("this command needs --caller");

    match cmd {
        Commands::Init { .. } | Commands::Version => {}

        Commands::SetAuthority { ledger, principal } => {
            let p = Principal::from(principal);
            match ledger {
                LedgerArg::Batches => hub.batches.set_authority(p)?,
                LedgerArg::Shipments => hub.shipments.set_authority(p)?,
                LedgerArg::Transfers => hub.transfers.set_authority(p)?,
                LedgerArg::All => hub.set_authority_all(p)?,
            }
        }

        Commands::SetFee { ledger, fee } => {
            let all = ledger == LedgerArg::All;
            if all || ledger == LedgerArg::Batches {
                hub.batches.set_fee(fee)?;
            }
            if all || ledger == LedgerArg::Shipments {
                hub.shipments.set_fee(fee)?;
            }
            if all || ledger == LedgerArg::Transfers {
                hub.transfers.set_fee(fee)?;
            }
        }

        Commands::SetCapacity { ledger, capacity } => {
            let all = ledger == LedgerArg::All;
            if all || ledger == LedgerArg::Batches {
                hub.batches.set_capacity(capacity)?;
            }
            if all || ledger == LedgerArg::Shipments {
                hub.shipments.set_capacity(capacity)?;
            }
            if all || ledger == LedgerArg::Transfers {
                hub.transfers.set_capacity(capacity)?;
            }
        }

        Commands::AdvanceTime { to } => hub.advance_to(to)?,

        Commands::RegisterBatch {
            hash,
            title,
            description,
            harvest_date,
            batch_size,
            cert_body,
            geo,
            quality,
        } => {
            let ctx = hub.context(who()?);
            let id = hub.batches.register_batch(
                &ctx,
                &mut hub.fees,
                NewBatch {
                    hash,
                    title,
                    description,
                    harvest_date,
                    batch_size,
                    cert_body,
                    geo_location: geo,
                    quality_metric: quality,
                },
            )?;
            println!("{id}");
        }

        Commands::RegisterCsv { csv } => {
            let csv = util::canonicalize_if_exists(&csv, "csv")?;
            let summary = bulk::register_batches_csv(hub, who()?, &csv)
                .with_context(|| format!("import {}", csv.display()))?;
            print_json(&summary)?;
        }

        Commands::CertifyBatch {
            id,
            cert_hash,
            expiry,
        } => {
            let ctx = hub.context(who()?);
            hub.batches.certify_batch(&ctx, id, &cert_hash, expiry)?;
        }

        Commands::RevokeCertification { id } => {
            let ctx = hub.context(who()?);
            hub.batches.revoke_certification(&ctx, id)?;
        }

        Commands::UpdateBatch {
            id,
            title,
            description,
        } => {
            let ctx = hub.context(who()?);
            hub.batches.update_batch(&ctx, id, &title, &description)?;
        }

        Commands::TransferOwnership { id, new_owner } => {
            let ctx = hub.context(who()?);
            hub.batches.transfer_ownership(&ctx, id, new_owner.into())?;
        }

        Commands::DeactivateBatch { id } => {
            let ctx = hub.context(who()?);
            hub.batches.deactivate_batch(&ctx, id)?;
        }

        Commands::ShowBatch { id } => {
            let batch = hub
                .batches
                .batch(id)
                .ok_or_else(|| anyhow::anyhow!("batch {id} not found"))?;
            print_json(&serde_json::json!({
                "id": id,
                "batch": batch,
                "certification": hub.batches.certification(id),
                "owner_history": hub.batches.owner_history(id),
                "history": hub.batches.history(id),
            }))?;
        }

        Commands::CheckCert { id } => {
            hub.batches.check_cert_status(id, hub.now())?;
            println!("valid");
        }

        Commands::InitiateShipment {
            batch_id,
            destination,
            start_time,
            geo,
        } => {
            let ctx = hub.context(who()?);
            let id = hub.shipments.initiate_shipment(
                &ctx,
                &mut hub.fees,
                batch_id,
                destination.into(),
                start_time,
                &geo,
            )?;
            println!("{id}");
        }

        Commands::AddApprover { id, approver } => {
            let ctx = hub.context(who()?);
            hub.shipments.add_approver(&ctx, id, approver.into())?;
        }

        Commands::ApproveShipment { id } => {
            let ctx = hub.context(who()?);
            let quorum = hub.shipments.approve_shipment(&ctx, id)?;
            println!("{}", if quorum { "quorum reached" } else { "recorded" });
        }

        Commands::UpdateShipmentStatus { id, status, geo } => {
            let ctx = hub.context(who()?);
            hub.shipments
                .update_shipment_status(&ctx, id, &status, &geo)?;
        }

        Commands::CompleteShipment { id } => {
            let ctx = hub.context(who()?);
            hub.shipments.complete_shipment(&ctx, id)?;
        }

        Commands::DisputeShipment { id, reason } => {
            let ctx = hub.context(who()?);
            hub.shipments.dispute_shipment(&ctx, id, &reason)?;
        }

        Commands::ShowShipment { id } => {
            let shipment = hub
                .shipments
                .shipment(id)
                .ok_or_else(|| anyhow::anyhow!("shipment {id} not found"))?;
            print_json(&serde_json::json!({
                "id": id,
                "shipment": shipment,
                "approvals": hub.shipments.approvals(id),
                "approval_count": hub.shipments.approval_count(id),
                "history": hub.shipments.history(id),
            }))?;
        }

        Commands::InitiateTransfer {
            batch_id,
            new_owner,
            timestamp,
            escrow,
        } => {
            let ctx = hub.context(who()?);
            let id = hub.transfers.initiate_transfer(
                &ctx,
                &mut hub.fees,
                batch_id,
                new_owner.into(),
                timestamp,
                escrow,
            )?;
            println!("{id}");
        }

        Commands::AcceptTransfer { id } => {
            let ctx = hub.context(who()?);
            hub.transfers.accept_transfer(&ctx, id)?;
        }

        Commands::RejectTransfer { id, reason } => {
            let ctx = hub.context(who()?);
            hub.transfers.reject_transfer(&ctx, id, &reason)?;
        }

        Commands::CompleteTransfer { id } => {
            let ctx = hub.context(who()?);
            hub.transfers.complete_transfer(&ctx, id)?;
        }

        Commands::CancelTransfer { id } => {
            let ctx = hub.context(who()?);
            hub.transfers.cancel_transfer(&ctx, id)?;
        }

        Commands::ShowTransfer { id } => {
            let status = hub.transfers.check_transfer_status(id)?;
            print_json(&serde_json::json!({
                "id": id,
                "status": status,
                "transfer": hub.transfers.transfer(id),
                "escrow": hub.transfers.escrow(id),
            }))?;
        }

        Commands::Status => print_json(&hub.summary())?,

        Commands::VerifyHistory => {
            hub.verify_history().context("verify history")?;
            info!("history verification passed");
        }

        Commands::Report { batch_id, out_dir } => {
            let out = out_dir
                .unwrap_or_else(|| cfg.paths.report_dir.join(format!("batch-{batch_id}")));
            let manifest = report::write_batch_dossier(&out, hub, batch_id)
                .context("write dossier")?;
            info!(out_dir = %out.display(), digest = %manifest.dossier_sha256_hex, "dossier generated");
        }

        Commands::VerifyReport { dir } => {
            report::verify_dossier(&dir).context("verify dossier")?;
            info!(dir = %dir.display(), "dossier digest matches");
        }

        Commands::Fees => print_json(&hub.fees.intents())?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize output")?);
    Ok(())
}

fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        let log_file = open_log_file(Path::new(&cfg.json_log_file))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open json log file {}", path.display()))
}
