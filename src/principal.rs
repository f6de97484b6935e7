//! Opaque principal identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix every standard principal begins with.
pub const STANDARD_PREFIX: &str = "ST";

/// An account identity as supplied by the hosting environment.
///
/// Only one structural rule is enforced: a *standard* principal begins with
/// [`STANDARD_PREFIX`].  Nothing else about the string is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_standard(&self) -> bool {
        self.0.starts_with(STANDARD_PREFIX)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Principal {
    fn from(s: String) -> Self {
        Self(s)
    }
}
