//! Bulk batch registration from CSV.
//!
//! The file must have a header row naming the [`NewBatch`] fields exactly
//! (lowercase, as written in [`REQUIRED_HEADERS`]).  Rows that fail to parse
//! or fail field validation are skipped with a warning; any other ledger
//! error (no authority, capacity, refused fee) stops the import and leaves
//! the hub as it was.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::batch::{BatchId, NewBatch};
use crate::error::{ProvenanceError, Result, ResultExt as _};
use crate::hub::ProvenanceHub;
use crate::principal::Principal;
use crate::util::MAX_CSV_ROWS;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CsvImportSummary {
    pub registered: Vec<BatchId>,
    /// 1-based data row numbers that were skipped.
    pub skipped_rows: Vec<usize>,
}

pub const REQUIRED_HEADERS: [&str; 8] = [
    "hash",
    "title",
    "description",
    "harvest_date",
    "batch_size",
    "cert_body",
    "geo_location",
    "quality_metric",
];

/// Register every valid row of `csv_path` as a batch owned by `caller`.
pub fn register_batches_csv(
    hub: &mut ProvenanceHub,
    caller: &Principal,
    csv_path: &Path,
) -> Result<CsvImportSummary> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .ctx_store(&format!("open csv {}", csv_path.display()))?;
    let headers = rdr.headers().ctx_store("read csv headers")?.clone();
    if let Some(missing) = REQUIRED_HEADERS
        .iter()
        .find(|h| !headers.iter().any(|got| got == **h))
    {
        return Err(ProvenanceError::Store(format!(
            "csv missing required header '{missing}'"
        )));
    }

    // Read everything first so an oversized file registers nothing.
    let mut rows = Vec::new();
    for (i, rec) in rdr.deserialize::<NewBatch>().enumerate() {
        if i >= MAX_CSV_ROWS {
            return Err(ProvenanceError::Store(format!(
                "csv exceeds maximum row limit of {MAX_CSV_ROWS}"
            )));
        }
        rows.push((i + 1, rec));
    }

    // Rows land on a copy; the hub only sees a fully successful import.
    let mut staged = hub.clone();
    let mut summary = CsvImportSummary::default();
    for (row, rec) in rows {
        let input = match rec {
            Ok(input) => input,
            Err(e) => {
                warn!(row, error = %e, "unparseable csv row; skipping");
                summary.skipped_rows.push(row);
                continue;
            }
        };
        let ctx = staged.context(caller);
        match staged.batches.register_batch(&ctx, &mut staged.fees, input) {
            Ok(id) => summary.registered.push(id),
            Err(ProvenanceError::InvalidInput(field)) => {
                warn!(row, %field, "invalid csv row; skipping");
                summary.skipped_rows.push(row);
            }
            Err(e) => {
                warn!(row, error = %e, "csv import aborted; nothing registered");
                return Err(e);
            }
        }
    }
    *hub = staged;
    info!(
        registered = summary.registered.len(),
        skipped = summary.skipped_rows.len(),
        "csv import finished"
    );
    Ok(summary)
}
