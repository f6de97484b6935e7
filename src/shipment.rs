//! Shipment ledger: custody legs of a batch between two principals.
//!
//! A shipment starts `active`.  Once enough distinct approvers have signed
//! off it moves to `in-transit` on its own; the destination then completes
//! it.  Either party may dispute at any time or set the status directly.
//!
//! Approver slots: the origin may pre-register approvers with
//! [`ShipmentLedger::add_approver`], and any principal may approve ad hoc.
//! Both paths share one slot map per shipment, so a principal holds at most
//! one slot and the per-shipment slot cap covers both.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::authority::LedgerSettings;
use crate::batch::BatchId;
use crate::config::ShipmentLimits;
use crate::env::{Amount, CallContext, FeeSink, LedgerTime};
use crate::error::{InvalidField, ProvenanceError, RecordKind, Result};
use crate::history::{HistoryEntry, HistoryLog};
use crate::principal::Principal;
use crate::sequence::SequenceAllocator;
use crate::util::check_geo;

pub type ShipmentId = u64;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShipmentStatus {
    Active,
    InTransit,
    Delivered,
    Disputed,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 4] = [
        Self::Active,
        Self::InTransit,
        Self::Delivered,
        Self::Disputed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::InTransit => "in-transit",
            Self::Delivered => "delivered",
            Self::Disputed => "disputed",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ShipmentStatus {
    type Err = ProvenanceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.label() == s)
            .ok_or(ProvenanceError::InvalidInput(InvalidField::Status))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    /// Foreign key into the batch registry.  Not checked for existence.
    pub batch_id: BatchId,
    pub origin: Principal,
    pub destination: Principal,
    pub start_time: LedgerTime,
    pub start_geo: String,
    pub status: ShipmentStatus,
    pub created_at: LedgerTime,
    pub last_update: Option<ShipmentUpdate>,
}

/// The most recent party-driven status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentUpdate {
    pub status: ShipmentStatus,
    pub geo_location: Option<String>,
    pub reason: Option<String>,
    pub updated_at: LedgerTime,
    pub updater: Principal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ShipmentEvent {
    Initiated {
        batch_id: BatchId,
        destination: Principal,
    },
    ApproverAdded {
        approver: Principal,
    },
    Approved {
        approver: Principal,
        quorum_reached: bool,
    },
    StatusUpdated {
        status: ShipmentStatus,
        geo_location: String,
    },
    Completed,
    Disputed {
        reason: String,
    },
}

/// Approver slots of one shipment: principal -> approval given.
pub type ApprovalSlots = BTreeMap<Principal, bool>;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentLedger {
    settings: LedgerSettings,
    ids: SequenceAllocator,
    quorum: usize,
    max_approvers: usize,
    shipments: BTreeMap<ShipmentId, Shipment>,
    approvals: BTreeMap<ShipmentId, ApprovalSlots>,
    history: HistoryLog<ShipmentEvent>,
}

impl Default for ShipmentLedger {
    fn default() -> Self {
        Self::new(ShipmentLimits::default())
    }
}

impl ShipmentLedger {
    pub fn new(limits: ShipmentLimits) -> Self {
        Self {
            settings: LedgerSettings::new(limits.fee),
            ids: SequenceAllocator::new(RecordKind::Shipment, limits.capacity),
            quorum: limits.quorum.max(1),
            max_approvers: limits.max_approvers,
            shipments: BTreeMap::new(),
            approvals: BTreeMap::new(),
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
        info!(fee, "shipment fee updated");
        Ok(())
    }

    pub fn fee(&self) -> Amount {
        self.settings.fee()
    }

    pub fn set_capacity(&mut self, capacity: u64) -> Result<()> {
        self.settings.require_authority()?;
        self.ids.set_capacity(capacity)?;
        info!(capacity, "shipment capacity updated");
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.ids.capacity()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn max_approvers(&self) -> usize {
        self.max_approvers
    }

    // -- lifecycle ----------------------------------------------------------

    /// Open a shipment of `batch_id` from the caller to `destination`.
    pub fn initiate_shipment(
        &mut self,
        ctx: &CallContext<'_>,
        fees: &mut dyn FeeSink,
        batch_id: BatchId,
        destination: Principal,
        start_time: LedgerTime,
        start_geo: &str,
    ) -> Result<ShipmentId> {
        let id = self.ids.next_id()?;
        if !ctx.caller.is_standard() {
            return Err(ProvenanceError::InvalidInput(InvalidField::Origin));
        }
        if !destination.is_standard() {
            return Err(ProvenanceError::InvalidInput(InvalidField::Destination));
        }
        if start_time < ctx.now {
            return Err(ProvenanceError::InvalidInput(InvalidField::Timestamp));
        }
        check_geo(start_geo)?;
        if destination == *ctx.caller {
            return Err(ProvenanceError::InvalidInput(InvalidField::Destination));
        }
        let intent = self.settings.fee_intent(ctx.caller)?;
        let entry = self.history.prepare(
            id,
            ctx.now,
            ctx.caller,
            ShipmentEvent::Initiated {
                batch_id,
                destination: destination.clone(),
            },
        )?;
        fees.transfer(&intent)?;

        self.ids.advance();
        self.history.commit(id, entry);
        info!(
            shipment_id = id,
            batch_id,
            origin = %ctx.caller,
            destination = %destination,
            fee = intent.amount,
            "shipment initiated"
        );
        self.shipments.insert(
            id,
            Shipment {
                batch_id,
                origin: ctx.caller.clone(),
                destination,
                start_time,
                start_geo: start_geo.to_string(),
                status: ShipmentStatus::Active,
                created_at: ctx.now,
                last_update: None,
            },
        );
        Ok(id)
    }

    /// Reserve an approver slot.  Origin only.
    pub fn add_approver(
        &mut self,
        ctx: &CallContext<'_>,
        id: ShipmentId,
        approver: Principal,
    ) -> Result<()> {
        let shipment = self.get(id)?;
        if shipment.origin != *ctx.caller {
            return Err(ProvenanceError::Unauthorized {
                action: "add approvers to a shipment it did not originate",
            });
        }
        self.ensure_slot_available(id, &approver)?;

        self.history.append(
            id,
            ctx.now,
            ctx.caller,
            ShipmentEvent::ApproverAdded {
                approver: approver.clone(),
            },
        )?;
        info!(shipment_id = id, approver = %approver, "approver added");
        self.approvals.entry(id).or_default().insert(approver, false);
        Ok(())
    }

    /// Record the caller's approval.  Returns `true` when this approval
    /// brings the shipment to quorum and moves it to in-transit.
    pub fn approve_shipment(&mut self, ctx: &CallContext<'_>, id: ShipmentId) -> Result<bool> {
        let shipment = self.get(id)?;
        if shipment.status != ShipmentStatus::Active {
            return Err(ProvenanceError::invalid_state(format!(
                "shipment {id} is {}, approvals need an active shipment",
                shipment.status
            )));
        }
        match self.approvals.get(&id).and_then(|s| s.get(ctx.caller)) {
            Some(true) => return Err(ProvenanceError::DuplicateApproval),
            Some(false) => {}
            None => self.ensure_slot_available(id, ctx.caller)?,
        }
        let quorum_reached = self.approval_given_count(id) + 1 >= self.quorum;

        self.history.append(
            id,
            ctx.now,
            ctx.caller,
            ShipmentEvent::Approved {
                approver: ctx.caller.clone(),
                quorum_reached,
            },
        )?;
        self.approvals
            .entry(id)
            .or_default()
            .insert(ctx.caller.clone(), true);
        if quorum_reached {
            self.get_mut(id)?.status = ShipmentStatus::InTransit;
            info!(shipment_id = id, approver = %ctx.caller, "quorum reached, shipment in transit");
        } else {
            info!(shipment_id = id, approver = %ctx.caller, "approval recorded");
        }
        Ok(quorum_reached)
    }

    /// Set any valid status directly.  Origin or destination only; not gated
    /// by the current status.
    pub fn update_shipment_status(
        &mut self,
        ctx: &CallContext<'_>,
        id: ShipmentId,
        status: &str,
        geo_location: &str,
    ) -> Result<()> {
        self.require_party(ctx, id, "update the status of a shipment it is not party to")?;
        let status: ShipmentStatus = status.parse()?;
        check_geo(geo_location)?;

        self.history.append(
            id,
            ctx.now,
            ctx.caller,
            ShipmentEvent::StatusUpdated {
                status,
                geo_location: geo_location.to_string(),
            },
        )?;
        let shipment = self.get_mut(id)?;
        shipment.status = status;
        shipment.last_update = Some(ShipmentUpdate {
            status,
            geo_location: Some(geo_location.to_string()),
            reason: None,
            updated_at: ctx.now,
            updater: ctx.caller.clone(),
        });
        info!(shipment_id = id, caller = %ctx.caller, %status, "shipment status updated");
        Ok(())
    }

    pub fn complete_shipment(&mut self, ctx: &CallContext<'_>, id: ShipmentId) -> Result<()> {
        let shipment = self.get(id)?;
        if shipment.destination != *ctx.caller {
            return Err(ProvenanceError::Unauthorized {
                action: "complete a shipment it is not the destination of",
            });
        }
        if shipment.status != ShipmentStatus::InTransit {
            return Err(ProvenanceError::invalid_state(format!(
                "shipment {id} is {}, only in-transit shipments can be completed",
                shipment.status
            )));
        }

        self.history
            .append(id, ctx.now, ctx.caller, ShipmentEvent::Completed)?;
        let shipment = self.get_mut(id)?;
        shipment.status = ShipmentStatus::Delivered;
        shipment.last_update = Some(ShipmentUpdate {
            status: ShipmentStatus::Delivered,
            geo_location: None,
            reason: None,
            updated_at: ctx.now,
            updater: ctx.caller.clone(),
        });
        info!(shipment_id = id, destination = %ctx.caller, "shipment delivered");
        Ok(())
    }

    /// Force the shipment into `disputed`, whatever its current status.
    pub fn dispute_shipment(
        &mut self,
        ctx: &CallContext<'_>,
        id: ShipmentId,
        reason: &str,
    ) -> Result<()> {
        self.require_party(ctx, id, "dispute a shipment it is not party to")?;

        self.history.append(
            id,
            ctx.now,
            ctx.caller,
            ShipmentEvent::Disputed {
                reason: reason.to_string(),
            },
        )?;
        let shipment = self.get_mut(id)?;
        shipment.status = ShipmentStatus::Disputed;
        shipment.last_update = Some(ShipmentUpdate {
            status: ShipmentStatus::Disputed,
            geo_location: None,
            reason: Some(reason.to_string()),
            updated_at: ctx.now,
            updater: ctx.caller.clone(),
        });
        info!(shipment_id = id, caller = %ctx.caller, reason, "shipment disputed");
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    pub fn shipment_count(&self) -> u64 {
        self.ids.issued()
    }

    pub fn shipment_exists(&self, id: ShipmentId) -> bool {
        self.shipments.contains_key(&id)
    }

    pub fn shipment(&self, id: ShipmentId) -> Option<&Shipment> {
        self.shipments.get(&id)
    }

    pub fn shipments(&self) -> impl Iterator<Item = (ShipmentId, &Shipment)> {
        self.shipments.iter().map(|(id, s)| (*id, s))
    }

    pub fn shipments_for_batch(
        &self,
        batch_id: BatchId,
    ) -> impl Iterator<Item = (ShipmentId, &Shipment)> {
        self.shipments().filter(move |(_, s)| s.batch_id == batch_id)
    }

    /// Every approver slot, pre-registered or ad hoc, given or not.
    pub fn approval_count(&self, id: ShipmentId) -> usize {
        self.approvals.get(&id).map_or(0, BTreeMap::len)
    }

    pub fn approvals(&self, id: ShipmentId) -> Option<&ApprovalSlots> {
        self.approvals.get(&id)
    }

    pub fn is_approved_by(&self, id: ShipmentId, principal: &Principal) -> bool {
        self.approvals
            .get(&id)
            .and_then(|s| s.get(principal))
            .copied()
            .unwrap_or(false)
    }

    pub fn history(&self, id: ShipmentId) -> &[HistoryEntry<ShipmentEvent>] {
        self.history.entries(id)
    }

    pub fn history_log(&self) -> &HistoryLog<ShipmentEvent> {
        &self.history
    }

    // -- helpers ------------------------------------------------------------

    fn get(&self, id: ShipmentId) -> Result<&Shipment> {
        self.shipments
            .get(&id)
            .ok_or_else(|| ProvenanceError::not_found(RecordKind::Shipment, id))
    }

    fn get_mut(&mut self, id: ShipmentId) -> Result<&mut Shipment> {
        self.shipments
            .get_mut(&id)
            .ok_or_else(|| ProvenanceError::not_found(RecordKind::Shipment, id))
    }

    fn require_party(
        &self,
        ctx: &CallContext<'_>,
        id: ShipmentId,
        action: &'static str,
    ) -> Result<&Shipment> {
        let shipment = self.get(id)?;
        if shipment.origin != *ctx.caller && shipment.destination != *ctx.caller {
            return Err(ProvenanceError::Unauthorized { action });
        }
        Ok(shipment)
    }

    fn approval_given_count(&self, id: ShipmentId) -> usize {
        self.approvals
            .get(&id)
            .map_or(0, |s| s.values().filter(|given| **given).count())
    }

    /// A new slot for `who` is allowed: none held yet and the cap not reached.
    fn ensure_slot_available(&self, id: ShipmentId, who: &Principal) -> Result<()> {
        let slots = self.approvals.get(&id);
        if slots.is_some_and(|s| s.contains_key(who)) {
            debug!(shipment_id = id, approver = %who, "approver slot already held");
            return Err(ProvenanceError::DuplicateApproval);
        }
        if slots.map_or(0, BTreeMap::len) >= self.max_approvers {
            return Err(ProvenanceError::CapacityExceeded {
                kind: RecordKind::Approval,
                capacity: self.max_approvers as u64,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
