//! Single-writer owner of the three ledgers and their collaborators.
//!
//! Every mutating call goes through `&mut ProvenanceHub`, which serialises
//! id allocation and history-index computation across the whole system.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::BatchRegistry;
use crate::config::ProvenanceConfig;
use crate::env::{CallContext, FeeJournal, LedgerClock, LedgerTime, ManualClock};
use crate::error::{ProvenanceError, Result};
use crate::principal::Principal;
use crate::shipment::ShipmentLedger;
use crate::transfer::TransferLedger;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceHub {
    pub clock: ManualClock,
    pub fees: FeeJournal,
    pub batches: BatchRegistry,
    pub shipments: ShipmentLedger,
    pub transfers: TransferLedger,
}

/// Record counts and money totals, for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSummary {
    pub now: LedgerTime,
    pub batches: u64,
    pub shipments: u64,
    pub transfers: u64,
    pub fee_intents: usize,
    pub fees_collected: i128,
    pub escrow_held: i128,
}

impl ProvenanceHub {
    /// Fresh hub with fees and capacities taken from `cfg`.
    pub fn new(cfg: &ProvenanceConfig) -> Self {
        Self {
            clock: ManualClock::default(),
            fees: FeeJournal::new(),
            batches: BatchRegistry::new(cfg.batches),
            shipments: ShipmentLedger::new(cfg.shipments),
            transfers: TransferLedger::new(cfg.transfers),
        }
    }

    pub fn now(&self) -> LedgerTime {
        self.clock.now()
    }

    /// A call context for `caller` at the current ledger time.
    pub fn context<'a>(&self, caller: &'a Principal) -> CallContext<'a> {
        CallContext::from_clock(caller, &self.clock)
    }

    pub fn advance_to(&mut self, t: LedgerTime) -> Result<()> {
        self.clock.advance_to(t)?;
        info!(now = t, "ledger time advanced");
        Ok(())
    }

    /// Install the same authority on all three ledgers.  Fails without
    /// changing anything if any ledger already has one.
    pub fn set_authority_all(&mut self, authority: Principal) -> Result<()> {
        if self.batches.authority().is_some()
            || self.shipments.authority().is_some()
            || self.transfers.authority().is_some()
        {
            return Err(ProvenanceError::AuthorityAlreadySet);
        }
        self.batches.set_authority(authority.clone())?;
        self.shipments.set_authority(authority.clone())?;
        self.transfers.set_authority(authority)
    }

    /// Recompute every history hash chain.
    pub fn verify_history(&self) -> Result<()> {
        self.batches.history_log().verify_all()?;
        self.shipments.history_log().verify_all()?;
        self.transfers.history_log().verify_all()
    }

    pub fn summary(&self) -> HubSummary {
        HubSummary {
            now: self.now(),
            batches: self.batches.batch_count(),
            shipments: self.shipments.shipment_count(),
            transfers: self.transfers.transfer_count(),
            fee_intents: self.fees.intents().len(),
            fees_collected: self.fees.total(),
            escrow_held: self.transfers.escrow_total(),
        }
    }
}
