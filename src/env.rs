//! External collaborators: the ledger-time source and the value-transfer sink.
//!
//! The ledgers never read a wall clock or move value themselves.  A host
//! supplies the current ledger time and accepts fee intents through the two
//! traits below.  [`ManualClock`] and [`FeeJournal`] are the in-process
//! implementations used by the hub, the CLI, and tests.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{InvalidField, ProvenanceError, Result};
use crate::principal::Principal;

/// Ledger time (block-height style), monotonically non-decreasing.
pub type LedgerTime = u64;

/// Fee and escrow amounts.  Signed so that negative proposals can be rejected
/// rather than being unrepresentable at the boundary.
pub type Amount = i64;

// ---------------------------------------------------------------------------
// Ledger time
// ---------------------------------------------------------------------------

pub trait LedgerClock {
    fn now(&self) -> LedgerTime;
}

/// A clock that only moves when told to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualClock {
    now: LedgerTime,
}

impl ManualClock {
    pub fn at(now: LedgerTime) -> Self {
        Self { now }
    }

    /// Move the clock to `t`.  Rejects attempts to move backwards.
    pub fn advance_to(&mut self, t: LedgerTime) -> Result<()> {
        if t < self.now {
            return Err(ProvenanceError::InvalidInput(InvalidField::Timestamp));
        }
        self.now = t;
        Ok(())
    }

    pub fn advance_by(&mut self, dt: LedgerTime) {
        self.now = self.now.saturating_add(dt);
    }
}

impl LedgerClock for ManualClock {
    fn now(&self) -> LedgerTime {
        self.now
    }
}

// ---------------------------------------------------------------------------
// Fee intents
// ---------------------------------------------------------------------------

/// A request to move `amount` from `from` to `to`, emitted by a successful
/// creation operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeIntent {
    pub amount: Amount,
    pub from: Principal,
    pub to: Principal,
}

/// Accepts fee intents.  Returning an error aborts the calling operation
/// before any ledger state is written.
pub trait FeeSink {
    fn transfer(&mut self, intent: &FeeIntent) -> Result<()>;
}

/// Records every accepted intent in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeJournal {
    intents: Vec<FeeIntent>,
    /// When set, every intent is refused.  Lets callers exercise the
    /// all-or-nothing path without a real settlement backend.
    #[serde(default)]
    refuse: bool,
}

impl FeeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            intents: Vec::new(),
            refuse: true,
        }
    }

    pub fn set_refuse(&mut self, refuse: bool) {
        self.refuse = refuse;
    }

    pub fn intents(&self) -> &[FeeIntent] {
        &self.intents
    }

    /// Sum of recorded intents, widened to `i128` so it cannot overflow.
    pub fn total(&self) -> i128 {
        self.intents.iter().map(|i| i128::from(i.amount)).sum()
    }
}

impl FeeSink for FeeJournal {
    fn transfer(&mut self, intent: &FeeIntent) -> Result<()> {
        if self.refuse {
            warn!(amount = intent.amount, from = %intent.from, to = %intent.to, "fee intent refused");
            return Err(ProvenanceError::FeeTransfer(format!(
                "{} from {} to {} refused",
                intent.amount, intent.from, intent.to
            )));
        }
        self.intents.push(intent.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

/// Who is calling, and at what ledger time.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub caller: &'a Principal,
    pub now: LedgerTime,
}

impl<'a> CallContext<'a> {
    pub fn new(caller: &'a Principal, now: LedgerTime) -> Self {
        Self { caller, now }
    }

    pub fn from_clock(caller: &'a Principal, clock: &dyn LedgerClock) -> Self {
        Self {
            caller,
            now: clock.now(),
        }
    }
}
