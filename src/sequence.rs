//! Dense, monotonically increasing record identifiers with a capacity ceiling.

use serde::{Deserialize, Serialize};

use crate::error::{InvalidField, ProvenanceError, RecordKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceAllocator {
    kind: RecordKind,
    next: u64,
    capacity: u64,
}

impl SequenceAllocator {
    pub fn new(kind: RecordKind, capacity: u64) -> Self {
        Self {
            kind,
            next: 0,
            capacity,
        }
    }

    /// Number of ids issued so far; also the id the next allocation returns.
    pub fn issued(&self) -> u64 {
        self.next
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: u64) -> Result<()> {
        if capacity == 0 {
            return Err(ProvenanceError::InvalidInput(InvalidField::Capacity));
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Fails with `CapacityExceeded` if no further id may be issued.
    pub fn ensure_capacity(&self) -> Result<()> {
        if self.next >= self.capacity {
            return Err(ProvenanceError::CapacityExceeded {
                kind: self.kind,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// The id the next allocation returns, if capacity allows one.
    pub fn next_id(&self) -> Result<u64> {
        self.ensure_capacity()?;
        Ok(self.next)
    }

    /// Consume the id last returned by [`SequenceAllocator::next_id`].
    pub fn advance(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}
