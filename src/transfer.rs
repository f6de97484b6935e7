//! Ownership-transfer proposals with escrow.
//!
//! ```text
//! pending --accept (to_owner)--> accepted --complete (to_owner)--> completed
//! pending --reject (from_owner)--> rejected
//! pending --cancel (from_owner)--> cancelled
//! ```
//!
//! Each transfer carries an escrow hold that exists exactly while the
//! transfer is pending or accepted.  Transfer history is kept per batch.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::authority::LedgerSettings;
use crate::batch::BatchId;
use crate::config::TransferLimits;
use crate::env::{Amount, CallContext, FeeSink, LedgerTime};
use crate::error::{InvalidField, ProvenanceError, RecordKind, Result};
use crate::history::{HistoryEntry, HistoryLog};
use crate::principal::Principal;
use crate::sequence::SequenceAllocator;

pub type TransferId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses in which the escrow is still held.
    pub fn holds_escrow(self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub batch_id: BatchId,
    pub from_owner: Principal,
    pub to_owner: Principal,
    pub timestamp: LedgerTime,
    pub escrow_amount: Amount,
    pub status: TransferStatus,
    pub created_at: LedgerTime,
    pub last_update: Option<TransferUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub amount: Amount,
    pub locked_by: Principal,
    pub release_to: Principal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUpdate {
    pub status: TransferStatus,
    pub reason: Option<String>,
    pub updated_at: LedgerTime,
    pub updater: Principal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    Initiated {
        transfer_id: TransferId,
        from: Principal,
        to: Principal,
        escrow_amount: Amount,
    },
    Accepted {
        transfer_id: TransferId,
    },
    Rejected {
        transfer_id: TransferId,
        reason: String,
    },
    Completed {
        transfer_id: TransferId,
    },
    Cancelled {
        transfer_id: TransferId,
    },
}

impl TransferEvent {
    pub fn transfer_id(&self) -> TransferId {
        match self {
            Self::Initiated { transfer_id, .. }
            | Self::Accepted { transfer_id }
            | Self::Rejected { transfer_id, .. }
            | Self::Completed { transfer_id }
            | Self::Cancelled { transfer_id } => *transfer_id,
        }
    }
}

/// Which party must act, and from which status, for a transition.
#[derive(Clone, Copy)]
enum Party {
    From,
    To,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLedger {
    settings: LedgerSettings,
    ids: SequenceAllocator,
    transfers: BTreeMap<TransferId, Transfer>,
    escrows: BTreeMap<TransferId, Escrow>,
    /// Keyed by batch id.
    history: HistoryLog<TransferEvent>,
}

impl Default for TransferLedger {
    fn default() -> Self {
        Self::new(TransferLimits::default())
    }
}

impl TransferLedger {
    pub fn new(limits: TransferLimits) -> Self {
        Self {
            settings: LedgerSettings::new(limits.fee),
            ids: SequenceAllocator::new(RecordKind::Transfer, limits.capacity),
            transfers: BTreeMap::new(),
            escrows: BTreeMap::new(),
            history: HistoryLog::new(),
        }
    }

    // -- governance ---------------------------------------------------------

    pub fn set_authority(&mut self, authority: Principal) -> Result<()> {
        self.settings.set_authority(authority)
    }

    pub fn authority(&self) -> Option<&Principal> {
        self.settings.authority()
    }

    pub fn set_fee(&mut self, fee: Amount) -> Result<()> {
        self.settings.set_fee(fee)?;
        info!(fee, "transfer fee updated");
        Ok(())
    }

    pub fn fee(&self) -> Amount {
        self.settings.fee()
    }

    pub fn set_capacity(&mut self, capacity: u64) -> Result<()> {
        self.settings.require_authority()?;
        self.ids.set_capacity(capacity)?;
        info!(capacity, "transfer capacity updated");
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.ids.capacity()
    }

    // -- lifecycle ----------------------------------------------------------

    /// Propose handing `batch_id` to `new_owner`, locking `escrow_amount`.
    pub fn initiate_transfer(
        &mut self,
        ctx: &CallContext<'_>,
        fees: &mut dyn FeeSink,
        batch_id: BatchId,
        new_owner: Principal,
        timestamp: LedgerTime,
        escrow_amount: Amount,
    ) -> Result<TransferId> {
        let id = self.ids.next_id()?;
        if !new_owner.is_standard() {
            return Err(ProvenanceError::InvalidInput(InvalidField::NewOwner));
        }
        if timestamp < ctx.now {
            return Err(ProvenanceError::InvalidInput(InvalidField::Timestamp));
        }
        if escrow_amount <= 0 {
            return Err(ProvenanceError::InvalidInput(InvalidField::EscrowAmount));
        }
        if new_owner == *ctx.caller {
            return Err(ProvenanceError::InvalidInput(InvalidField::NewOwner));
        }
        let intent = self.settings.fee_intent(ctx.caller)?;
        let entry = self.history.prepare(
            batch_id,
            ctx.now,
            ctx.caller,
            TransferEvent::Initiated {
                transfer_id: id,
                from: ctx.caller.clone(),
                to: new_owner.clone(),
                escrow_amount,
            },
        )?;
        fees.transfer(&intent)?;

        self.ids.advance();
        self.history.commit(batch_id, entry);
        info!(
            transfer_id = id,
            batch_id,
            from = %ctx.caller,
            to = %new_owner,
            escrow_amount,
            fee = intent.amount,
            "transfer initiated"
        );
        self.escrows.insert(
            id,
            Escrow {
                amount: escrow_amount,
                locked_by: ctx.caller.clone(),
                release_to: new_owner.clone(),
            },
        );
        self.transfers.insert(
            id,
            Transfer {
                batch_id,
                from_owner: ctx.caller.clone(),
                to_owner: new_owner,
                timestamp,
                escrow_amount,
                status: TransferStatus::Pending,
                created_at: ctx.now,
                last_update: None,
            },
        );
        Ok(id)
    }

    pub fn accept_transfer(&mut self, ctx: &CallContext<'_>, id: TransferId) -> Result<()> {
        let batch_id = self.check_transition(
            ctx,
            id,
            Party::To,
            TransferStatus::Pending,
            "accept a transfer not addressed to it",
        )?;
        self.history
            .append(batch_id, ctx.now, ctx.caller, TransferEvent::Accepted { transfer_id: id })?;
        self.commit(ctx, id, TransferStatus::Accepted, None)
    }

    pub fn reject_transfer(
        &mut self,
        ctx: &CallContext<'_>,
        id: TransferId,
        reason: &str,
    ) -> Result<()> {
        let batch_id = self.check_transition(
            ctx,
            id,
            Party::From,
            TransferStatus::Pending,
            "reject a transfer it did not initiate",
        )?;
        self.history.append(
            batch_id,
            ctx.now,
            ctx.caller,
            TransferEvent::Rejected {
                transfer_id: id,
                reason: reason.to_string(),
            },
        )?;
        self.commit(ctx, id, TransferStatus::Rejected, Some(reason))
    }

    pub fn complete_transfer(&mut self, ctx: &CallContext<'_>, id: TransferId) -> Result<()> {
        let batch_id = self.check_transition(
            ctx,
            id,
            Party::To,
            TransferStatus::Accepted,
            "complete a transfer not addressed to it",
        )?;
        self.history
            .append(batch_id, ctx.now, ctx.caller, TransferEvent::Completed { transfer_id: id })?;
        self.commit(ctx, id, TransferStatus::Completed, None)
    }

    pub fn cancel_transfer(&mut self, ctx: &CallContext<'_>, id: TransferId) -> Result<()> {
        let batch_id = self.check_transition(
            ctx,
            id,
            Party::From,
            TransferStatus::Pending,
            "cancel a transfer it did not initiate",
        )?;
        self.history
            .append(batch_id, ctx.now, ctx.caller, TransferEvent::Cancelled { transfer_id: id })?;
        self.commit(ctx, id, TransferStatus::Cancelled, None)
    }

    // -- queries ------------------------------------------------------------

    pub fn transfer_count(&self) -> u64 {
        self.ids.issued()
    }

    pub fn transfer_exists(&self, id: TransferId) -> bool {
        self.transfers.contains_key(&id)
    }

    pub fn check_transfer_status(&self, id: TransferId) -> Result<TransferStatus> {
        Ok(self.get(id)?.status)
    }

    pub fn transfer(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.get(&id)
    }

    pub fn transfers(&self) -> impl Iterator<Item = (TransferId, &Transfer)> {
        self.transfers.iter().map(|(id, t)| (*id, t))
    }

    pub fn escrow(&self, id: TransferId) -> Option<&Escrow> {
        self.escrows.get(&id)
    }

    /// Sum of all escrow currently held.
    /// Sum of all held escrows, widened so that any number of maximal
    /// amounts fits.
    pub fn escrow_total(&self) -> i128 {
        self.escrows.values().map(|e| i128::from(e.amount)).sum()
    }

    /// History entries for every transfer of `batch_id`.
    pub fn history(&self, batch_id: BatchId) -> &[HistoryEntry<TransferEvent>] {
        self.history.entries(batch_id)
    }

    pub fn history_log(&self) -> &HistoryLog<TransferEvent> {
        &self.history
    }

    /// Ids of the transfers proposed for `batch_id`, in creation order.
    pub fn transfers_for_batch(&self, batch_id: BatchId) -> Vec<TransferId> {
        let ids: BTreeSet<TransferId> = self
            .history
            .entries(batch_id)
            .iter()
            .map(|e| e.event.transfer_id())
            .collect();
        ids.into_iter().collect()
    }

    // -- helpers ------------------------------------------------------------

    fn get(&self, id: TransferId) -> Result<&Transfer> {
        self.transfers
            .get(&id)
            .ok_or_else(|| ProvenanceError::not_found(RecordKind::Transfer, id))
    }

    /// Existence, party, then status.  Returns the transfer's batch id.
    fn check_transition(
        &self,
        ctx: &CallContext<'_>,
        id: TransferId,
        party: Party,
        expected: TransferStatus,
        action: &'static str,
    ) -> Result<BatchId> {
        let transfer = self.get(id)?;
        let required = match party {
            Party::From => &transfer.from_owner,
            Party::To => &transfer.to_owner,
        };
        if required != ctx.caller {
            return Err(ProvenanceError::Unauthorized { action });
        }
        if transfer.status != expected {
            return Err(ProvenanceError::invalid_state(format!(
                "transfer {id} is {}, expected {expected}",
                transfer.status
            )));
        }
        if !self.escrows.contains_key(&id) {
            return Err(ProvenanceError::not_found(RecordKind::Escrow, id));
        }
        Ok(transfer.batch_id)
    }

    fn commit(
        &mut self,
        ctx: &CallContext<'_>,
        id: TransferId,
        status: TransferStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let transfer = self
            .transfers
            .get_mut(&id)
            .ok_or_else(|| ProvenanceError::not_found(RecordKind::Transfer, id))?;
        transfer.status = status;
        transfer.last_update = Some(TransferUpdate {
            status,
            reason: reason.map(str::to_string),
            updated_at: ctx.now,
            updater: ctx.caller.clone(),
        });
        if !status.holds_escrow() {
            self.escrows.remove(&id);
        }
        info!(transfer_id = id, caller = %ctx.caller, %status, "transfer status changed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::FeeJournal;

    fn p(s: &str) -> Principal {
        s.into()
    }

    fn ledger_with_transfer() -> (TransferLedger, FeeJournal) {
        let mut l = TransferLedger::default();
        l.set_authority(p("ST2AUTH")).unwrap();
        let mut fees = FeeJournal::new();
        let owner = p("ST1OWNER");
        l.initiate_transfer(
            &CallContext::new(&owner, 0),
            &mut fees,
            1,
            p("ST2NEW"),
            1_731_328_000,
            1000,
        )
        .unwrap();
        (l, fees)
    }

    #[test]
    fn initiate_creates_pending_transfer_and_escrow() {
        let (l, fees) = ledger_with_transfer();
        let t = l.transfer(0).unwrap();
        assert_eq!(t.status, TransferStatus::Pending);
        assert_eq!(t.to_owner.as_str(), "ST2NEW");
        let e = l.escrow(0).unwrap();
        assert_eq!(e.amount, 1000);
        assert_eq!(e.locked_by.as_str(), "ST1OWNER");
        assert_eq!(e.release_to.as_str(), "ST2NEW");
        assert_eq!(fees.intents().len(), 1);
        assert_eq!(fees.intents()[0].amount, 300);
        assert_eq!(l.history(1).len(), 1);
        assert_eq!(l.transfers_for_batch(1), vec![0]);
    }

    #[test]
    fn initiate_rejections() {
        let mut l = TransferLedger::default();
        let owner = p("ST1OWNER");
        let ctx = CallContext::new(&owner, 5);
        let mut fees = FeeJournal::new();

        assert!(matches!(
            l.initiate_transfer(&ctx, &mut fees, 1, p("ST2NEW"), 5, 1000),
            Err(ProvenanceError::AuthorityNotSet)
        ));
        l.set_authority(p("ST2AUTH")).unwrap();
        assert!(matches!(
            l.initiate_transfer(&ctx, &mut fees, 1, p("INVALID"), 5, 1000),
            Err(ProvenanceError::InvalidInput(InvalidField::NewOwner))
        ));
        assert!(matches!(
            l.initiate_transfer(&ctx, &mut fees, 1, p("ST2NEW"), 4, 1000),
            Err(ProvenanceError::InvalidInput(InvalidField::Timestamp))
        ));
        assert!(matches!(
            l.initiate_transfer(&ctx, &mut fees, 1, p("ST2NEW"), 5, 0),
            Err(ProvenanceError::InvalidInput(InvalidField::EscrowAmount))
        ));
        assert!(matches!(
            l.initiate_transfer(&ctx, &mut fees, 1, owner.clone(), 5, 1000),
            Err(ProvenanceError::InvalidInput(InvalidField::NewOwner))
        ));
        assert_eq!(l.transfer_count(), 0);
        assert!(fees.intents().is_empty());
    }

    #[test]
    fn accept_then_complete_releases_escrow() {
        let (mut l, _) = ledger_with_transfer();
        let new = p("ST2NEW");
        l.accept_transfer(&CallContext::new(&new, 1), 0).unwrap();
        assert_eq!(l.check_transfer_status(0).unwrap(), TransferStatus::Accepted);
        assert!(l.escrow(0).is_some());
        l.complete_transfer(&CallContext::new(&new, 2), 0).unwrap();
        assert_eq!(l.check_transfer_status(0).unwrap(), TransferStatus::Completed);
        assert!(l.escrow(0).is_none());
        assert_eq!(l.history(1).len(), 3);
        let upd = l.transfer(0).unwrap().last_update.as_ref().unwrap();
        assert_eq!(upd.status, TransferStatus::Completed);
        assert_eq!(upd.updated_at, 2);
    }

    #[test]
    fn complete_before_accept_is_invalid_state() {
        let (mut l, _) = ledger_with_transfer();
        let new = p("ST2NEW");
        assert!(matches!(
            l.complete_transfer(&CallContext::new(&new, 1), 0),
            Err(ProvenanceError::InvalidState(_))
        ));
        assert!(l.escrow(0).is_some());
    }

    #[test]
    fn reject_and_cancel_belong_to_initiator() {
        let (mut l, _) = ledger_with_transfer();
        let owner = p("ST1OWNER");
        let new = p("ST2NEW");
        assert!(matches!(
            l.reject_transfer(&CallContext::new(&new, 1), 0, "no"),
            Err(ProvenanceError::Unauthorized { .. })
        ));
        assert!(matches!(
            l.accept_transfer(&CallContext::new(&owner, 1), 0),
            Err(ProvenanceError::Unauthorized { .. })
        ));
        l.reject_transfer(&CallContext::new(&owner, 1), 0, "Invalid terms")
            .unwrap();
        assert_eq!(l.check_transfer_status(0).unwrap(), TransferStatus::Rejected);
        assert!(l.escrow(0).is_none());
        assert_eq!(
            l.transfer(0).unwrap().last_update.as_ref().unwrap().reason.as_deref(),
            Some("Invalid terms")
        );
        assert!(matches!(
            l.cancel_transfer(&CallContext::new(&owner, 2), 0),
            Err(ProvenanceError::InvalidState(_))
        ));
    }

    #[test]
    fn cancel_pending() {
        let (mut l, _) = ledger_with_transfer();
        let owner = p("ST1OWNER");
        l.cancel_transfer(&CallContext::new(&owner, 1), 0).unwrap();
        assert_eq!(l.check_transfer_status(0).unwrap(), TransferStatus::Cancelled);
        assert!(l.escrow(0).is_none());
        assert_eq!(l.escrow_total(), 0);
    }

    #[test]
    fn missing_transfer() {
        let (mut l, _) = ledger_with_transfer();
        let owner = p("ST1OWNER");
        assert!(matches!(
            l.check_transfer_status(9),
            Err(ProvenanceError::NotFound { kind: RecordKind::Transfer, id: 9 })
        ));
        assert!(matches!(
            l.cancel_transfer(&CallContext::new(&owner, 1), 9),
            Err(ProvenanceError::NotFound { .. })
        ));
        assert!(l.transfer_exists(0));
        assert!(!l.transfer_exists(1));
    }

    #[test]
    fn history_groups_transfers_by_batch() {
        let (mut l, mut fees) = ledger_with_transfer();
        let owner = p("ST1OWNER");
        let ctx = CallContext::new(&owner, 0);
        l.initiate_transfer(&ctx, &mut fees, 7, p("ST3OTHER"), 0, 5).unwrap();
        l.initiate_transfer(&ctx, &mut fees, 1, p("ST3OTHER"), 0, 5).unwrap();
        l.cancel_transfer(&ctx, 0).unwrap();
        assert_eq!(l.transfers_for_batch(1), vec![0, 2]);
        assert_eq!(l.transfers_for_batch(7), vec![1]);
        assert_eq!(l.history(1).len(), 3);
        assert_eq!(l.history(1)[2].index, 2);
        assert_eq!(l.escrow_total(), 10);
    }

    #[test]
    fn escrow_total_holds_maximal_amounts() {
        let (mut l, mut fees) = ledger_with_transfer();
        let owner = p("ST1OWNER");
        let ctx = CallContext::new(&owner, 0);
        l.initiate_transfer(&ctx, &mut fees, 2, p("ST3A"), 0, Amount::MAX).unwrap();
        l.initiate_transfer(&ctx, &mut fees, 3, p("ST3B"), 0, Amount::MAX).unwrap();
        assert_eq!(l.escrow_total(), 1000 + 2 * i128::from(Amount::MAX));
    }

    #[test]
    fn unappendable_history_takes_no_fee() {
        let (mut l, mut fees) = ledger_with_transfer();
        l.history.trail_mut(1).unwrap()[0].entry_hash_hex = "not-hex".into();
        let owner = p("ST1OWNER");
        let err = l
            .initiate_transfer(&CallContext::new(&owner, 0), &mut fees, 1, p("ST3OTHER"), 0, 5)
            .unwrap_err();
        assert!(matches!(err, ProvenanceError::Store(_)));
        assert_eq!(fees.intents().len(), 1);
        assert_eq!(l.transfer_count(), 1);
        assert!(l.escrow(1).is_none());
        assert_eq!(l.history(1).len(), 1);
    }
}
