//! Hashing, timestamps, and input validation helpers.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{InvalidField, ProvenanceError, Result};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

// ---------------------------------------------------------------------------
// Field validation
// ---------------------------------------------------------------------------

/// Length of a hash or certification hash, in characters.
pub const HASH_LEN: usize = 64;

/// Check that `value` has between `min` and `max` characters (inclusive).
pub fn check_len(value: &str, min: usize, max: usize, field: InvalidField) -> Result<()> {
    let n = value.chars().count();
    if n < min || n > max {
        return Err(ProvenanceError::InvalidInput(field));
    }
    Ok(())
}

/// Check a fixed-length hash field.
pub fn check_hash(value: &str, field: InvalidField) -> Result<()> {
    check_len(value, HASH_LEN, HASH_LEN, field)
}

/// Geo strings are 1-100 characters everywhere they appear.
pub fn check_geo(value: &str) -> Result<()> {
    check_len(value, 1, 100, InvalidField::Geo)
}

/// Validate that a path is not empty and does not contain null bytes.
pub fn validate_path(p: &Path, label: &str) -> Result<()> {
    let s = p.to_string_lossy();
    if s.is_empty() {
        return Err(ProvenanceError::Config(format!("{label} path is empty")));
    }
    if s.contains('\0') {
        return Err(ProvenanceError::Config(format!(
            "{label} path contains null byte"
        )));
    }
    Ok(())
}

/// Canonicalize a path if it exists, otherwise return it unchanged.
pub fn canonicalize_if_exists(p: &Path, label: &str) -> Result<PathBuf> {
    validate_path(p, label)?;
    if p.exists() {
        std::fs::canonicalize(p)
            .map_err(|e| ProvenanceError::Config(format!("{label} path invalid: {e}")))
    } else {
        Ok(p.to_path_buf())
    }
}

/// Maximum number of rows accepted from a CSV import.
pub const MAX_CSV_ROWS: usize = 10_000;

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("PROVENANCE_GIT_HASH");
pub const BUILD_TS: &str = env!("PROVENANCE_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("provenance v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn length_bounds_are_inclusive() {
        assert!(check_len("a", 1, 3, InvalidField::Title).is_ok());
        assert!(check_len("abc", 1, 3, InvalidField::Title).is_ok());
        assert!(check_len("", 1, 3, InvalidField::Title).is_err());
        assert!(check_len("abcd", 1, 3, InvalidField::Title).is_err());
    }

    #[test]
    fn hash_must_be_exactly_64() {
        assert!(check_hash(&"a".repeat(64), InvalidField::Hash).is_ok());
        assert!(check_hash(&"a".repeat(63), InvalidField::Hash).is_err());
        let err = check_hash(&"a".repeat(65), InvalidField::CertHash).unwrap_err();
        assert!(matches!(
            err,
            ProvenanceError::InvalidInput(InvalidField::CertHash)
        ));
    }

    #[test]
    fn geo_bounds() {
        assert!(check_geo("45.5231,-122.6765").is_ok());
        assert!(check_geo("").is_err());
        assert!(check_geo(&"x".repeat(101)).is_err());
    }

    #[test]
    fn empty_path_rejected() {
        assert!(validate_path(Path::new(""), "state").is_err());
        assert!(validate_path(Path::new("state.json"), "state").is_ok());
    }

    #[test]
    fn version_string_non_empty() {
        assert!(version_string().contains("provenance"));
    }
}
