//! JSON snapshots of a [`ProvenanceHub`].
//!
//! The CLI keeps all state in one snapshot file and rewrites it after every
//! mutating command.  Import re-verifies every history chain, so a snapshot
//! edited by hand is rejected.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::ProvenanceConfig;
use crate::error::{ProvenanceError, Result, ResultExt as _};
use crate::hub::ProvenanceHub;

pub const SNAPSHOT_FORMAT: &str = "provenance-snapshot-v1";

#[derive(Serialize)]
struct SnapshotOut<'a> {
    format: &'static str,
    snapshot_id: Uuid,
    exported_at_utc: String,
    hub: &'a ProvenanceHub,
}

#[derive(Deserialize)]
struct SnapshotIn {
    format: String,
    snapshot_id: Uuid,
    hub: ProvenanceHub,
}

/// Write `hub` to `path`.  Returns the id stamped on the snapshot.
pub fn export_snapshot(hub: &ProvenanceHub, path: &Path) -> Result<Uuid> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .ctx_store(&format!("create dir {}", parent.display()))?;
    }
    let snapshot_id = Uuid::new_v4();
    let out = SnapshotOut {
        format: SNAPSHOT_FORMAT,
        snapshot_id,
        exported_at_utc: crate::util::now_utc_rfc3339(),
        hub,
    };
    let json = serde_json::to_vec_pretty(&out).ctx_store("serialize snapshot")?;

    // Write beside the target, then rename, so a crash never leaves half a file.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).ctx_store(&format!("write snapshot {}", tmp.display()))?;
    std::fs::rename(&tmp, path).ctx_store(&format!("replace snapshot {}", path.display()))?;

    info!(path = %path.display(), %snapshot_id, "snapshot exported");
    Ok(snapshot_id)
}

/// Read a snapshot and check its history chains.
pub fn import_snapshot(path: &Path) -> Result<ProvenanceHub> {
    let bytes =
        std::fs::read(path).ctx_store(&format!("read snapshot {}", path.display()))?;
    let snapshot: SnapshotIn = serde_json::from_slice(&bytes).ctx_store("parse snapshot")?;
    if snapshot.format != SNAPSHOT_FORMAT {
        return Err(ProvenanceError::Store(format!(
            "unsupported snapshot format {:?}",
            snapshot.format
        )));
    }
    snapshot.hub.verify_history()?;
    info!(
        path = %path.display(),
        snapshot_id = %snapshot.snapshot_id,
        "snapshot imported"
    );
    Ok(snapshot.hub)
}

/// Import `path` if it exists; otherwise a fresh hub built from `cfg`.
pub fn load_or_init(path: &Path, cfg: &ProvenanceConfig) -> Result<ProvenanceHub> {
    if path.exists() {
        import_snapshot(path)
    } else {
        info!(path = %path.display(), "no snapshot found, starting fresh");
        Ok(ProvenanceHub::new(cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut hub = ProvenanceHub::default();
        hub.set_authority_all("ST2AUTH".into()).unwrap();
        hub.shipments.set_fee(999).unwrap();
        hub.advance_to(12).unwrap();

        export_snapshot(&hub, &path).unwrap();
        let back = import_snapshot(&path).unwrap();
        assert_eq!(back.shipments.fee(), 999);
        assert_eq!(back.now(), 12);
        assert_eq!(back.batches.authority().map(|p| p.as_str()), Some("ST2AUTH"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn wrong_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let hub = ProvenanceHub::default();
        export_snapshot(&hub, &path).unwrap();
        let text = std::fs::read_to_string(&path)
            .unwrap()
            .replace(SNAPSHOT_FORMAT, "something-else-v9");
        std::fs::write(&path, text).unwrap();
        let err = import_snapshot(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot format"));
    }

    #[test]
    fn missing_snapshot_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ProvenanceConfig::default();
        cfg.transfers.fee = 5;
        let hub = load_or_init(&dir.path().join("absent.json"), &cfg).unwrap();
        assert_eq!(hub.transfers.fee(), 5);
        assert_eq!(hub.batches.batch_count(), 0);
    }
}
