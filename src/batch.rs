//! Batch registry: origin records, certification, and ownership.
//!
//! A batch is created by [`BatchRegistry::register_batch`] and is never
//! removed.  Its certification is managed by the certifying party, its
//! descriptive fields and ownership by its current owner.  Deactivation is
//! terminal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::authority::LedgerSettings;
use crate::config::BatchLimits;
use crate::env::{Amount, CallContext, FeeSink, LedgerTime};
use crate::error::{InvalidField, ProvenanceError, RecordKind, Result};
use crate::history::{HistoryEntry, HistoryLog};
use crate::principal::Principal;
use crate::sequence::SequenceAllocator;
use crate::util::{check_geo, check_hash, check_len};

pub type BatchId = u64;

pub const MAX_BATCH_SIZE: u32 = 10_000;
pub const MAX_QUALITY: u8 = 100;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Registration input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub hash: String,
    pub title: String,
    pub description: String,
    pub harvest_date: u64,
    pub batch_size: u32,
    pub cert_body: String,
    pub geo_location: String,
    pub quality_metric: u8,
}

impl NewBatch {
    /// Field checks, in the order the registry reports them.
    fn validate(&self) -> Result<()> {
        check_hash(&self.hash, InvalidField::Hash)?;
        check_title_and_description(&self.title, &self.description)?;
        if self.harvest_date == 0 {
            return Err(ProvenanceError::InvalidInput(InvalidField::HarvestDate));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ProvenanceError::InvalidInput(InvalidField::BatchSize));
        }
        check_len(&self.cert_body, 1, 50, InvalidField::CertBody)?;
        check_geo(&self.geo_location)?;
        if self.quality_metric > MAX_QUALITY {
            return Err(ProvenanceError::InvalidInput(InvalidField::Quality));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub hash: String,
    pub title: String,
    pub description: String,
    pub harvest_date: u64,
    pub batch_size: u32,
    pub cert_body: String,
    pub geo_location: String,
    pub quality_metric: u8,
    pub owner: Principal,
    pub certified: bool,
    pub cert_expiry: Option<LedgerTime>,
    pub created_at: LedgerTime,
    pub active: bool,
    /// Most recent descriptive update; `None` until the first one.
    pub last_update: Option<BatchUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certification {
    pub cert_hash: String,
    pub issued_at: LedgerTime,
    pub expires_at: LedgerTime,
    pub issuer: Principal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub title: String,
    pub description: String,
    pub updated_at: LedgerTime,
    pub updater: Principal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Registered { owner: Principal },
    Certified { cert_hash: String, expires_at: LedgerTime },
    CertificationRevoked,
    Updated { title: String, description: String },
    OwnershipTransferred { from: Principal, to: Principal },
    Deactivated,
}

fn check_title_and_description(title: &str, description: &str) -> Result<()> {
    check_len(title, 1, 100, InvalidField::Title)?;
    check_len(description, 1, 500, InvalidField::Description)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRegistry {
    settings: LedgerSettings,
    ids: SequenceAllocator,
    batches: BTreeMap<BatchId, Batch>,
    certifications: BTreeMap<BatchId, Certification>,
    history: HistoryLog<BatchEvent>,
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self::new(BatchLimits::default())
    }
}

impl BatchRegistry {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            settings: LedgerSettings::new(limits.fee),
            ids: SequenceAllocator::new(RecordKind::Batch, limits.capacity),
            batches: BTreeMap::new(),
            certifications: BTreeMap::new(),
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
        info!(fee, "batch registration fee updated");
        Ok(())
    }

    pub fn fee(&self) -> Amount {
        self.settings.fee()
    }

    pub fn set_capacity(&mut self, capacity: u64) -> Result<()> {
        self.settings.require_authority()?;
        self.ids.set_capacity(capacity)?;
        info!(capacity, "batch capacity updated");
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.ids.capacity()
    }

    // -- lifecycle ----------------------------------------------------------

    pub fn register_batch(
        &mut self,
        ctx: &CallContext<'_>,
        fees: &mut dyn FeeSink,
        input: NewBatch,
    ) -> Result<BatchId> {
        let id = self.ids.next_id()?;
        input.validate()?;
        let intent = self.settings.fee_intent(ctx.caller)?;
        let entry = self.history.prepare(
            id,
            ctx.now,
            ctx.caller,
            BatchEvent::Registered {
                owner: ctx.caller.clone(),
            },
        )?;
        // The fee is the last step allowed to fail.
        fees.transfer(&intent)?;

        self.ids.advance();
        self.history.commit(id, entry);
        self.batches.insert(
            id,
            Batch {
                hash: input.hash,
                title: input.title,
                description: input.description,
                harvest_date: input.harvest_date,
                batch_size: input.batch_size,
                cert_body: input.cert_body,
                geo_location: input.geo_location,
                quality_metric: input.quality_metric,
                owner: ctx.caller.clone(),
                certified: false,
                cert_expiry: None,
                created_at: ctx.now,
                active: true,
                last_update: None,
            },
        );
        info!(batch_id = id, owner = %ctx.caller, fee = intent.amount, "batch registered");
        Ok(id)
    }

    pub fn certify_batch(
        &mut self,
        ctx: &CallContext<'_>,
        id: BatchId,
        cert_hash: &str,
        expiry: LedgerTime,
    ) -> Result<()> {
        let batch = self.get(id)?;
        if batch.certified {
            return Err(ProvenanceError::invalid_state(format!(
                "batch {id} is already certified"
            )));
        }
        check_hash(cert_hash, InvalidField::CertHash)?;
        if expiry <= ctx.now {
            return Err(ProvenanceError::InvalidInput(InvalidField::Expiry));
        }

        self.history.append(
            id,
            ctx.now,
            ctx.caller,
            BatchEvent::Certified {
                cert_hash: cert_hash.to_string(),
                expires_at: expiry,
            },
        )?;
        let batch = self.get_mut(id)?;
        batch.certified = true;
        batch.cert_expiry = Some(expiry);
        self.certifications.insert(
            id,
            Certification {
                cert_hash: cert_hash.to_string(),
                issued_at: ctx.now,
                expires_at: expiry,
                issuer: ctx.caller.clone(),
            },
        );
        info!(batch_id = id, issuer = %ctx.caller, expiry, "batch certified");
        Ok(())
    }

    /// Only the issuer of the current certification may revoke it.
    pub fn revoke_certification(&mut self, ctx: &CallContext<'_>, id: BatchId) -> Result<()> {
        let batch = self.get(id)?;
        let cert = self
            .certifications
            .get(&id)
            .ok_or_else(|| ProvenanceError::not_found(RecordKind::Certification, id))?;
        if cert.issuer != *ctx.caller {
            return Err(ProvenanceError::Unauthorized {
                action: "revoke a certification it did not issue",
            });
        }
        if !batch.certified {
            return Err(ProvenanceError::invalid_state(format!(
                "batch {id} is not certified"
            )));
        }

        self.history
            .append(id, ctx.now, ctx.caller, BatchEvent::CertificationRevoked)?;
        let batch = self.get_mut(id)?;
        batch.certified = false;
        batch.cert_expiry = None;
        self.certifications.remove(&id);
        info!(batch_id = id, issuer = %ctx.caller, "certification revoked");
        Ok(())
    }

    pub fn update_batch(
        &mut self,
        ctx: &CallContext<'_>,
        id: BatchId,
        title: &str,
        description: &str,
    ) -> Result<()> {
        self.require_owner(ctx, id, "update a batch it does not own")?;
        check_title_and_description(title, description)?;

        self.history.append(
            id,
            ctx.now,
            ctx.caller,
            BatchEvent::Updated {
                title: title.to_string(),
                description: description.to_string(),
            },
        )?;
        let batch = self.get_mut(id)?;
        batch.title = title.to_string();
        batch.description = description.to_string();
        batch.last_update = Some(BatchUpdate {
            title: title.to_string(),
            description: description.to_string(),
            updated_at: ctx.now,
            updater: ctx.caller.clone(),
        });
        info!(batch_id = id, updater = %ctx.caller, "batch updated");
        Ok(())
    }

    /// Hand the batch to `new_owner`.  The new owner is recorded as given;
    /// no format or same-owner check is applied.
    pub fn transfer_ownership(
        &mut self,
        ctx: &CallContext<'_>,
        id: BatchId,
        new_owner: Principal,
    ) -> Result<()> {
        let batch = self.require_owner(ctx, id, "transfer a batch it does not own")?;
        if !batch.active {
            return Err(ProvenanceError::invalid_state(format!(
                "batch {id} is inactive"
            )));
        }

        self.history.append(
            id,
            ctx.now,
            ctx.caller,
            BatchEvent::OwnershipTransferred {
                from: ctx.caller.clone(),
                to: new_owner.clone(),
            },
        )?;
        info!(batch_id = id, from = %ctx.caller, to = %new_owner, "batch ownership transferred");
        self.get_mut(id)?.owner = new_owner;
        Ok(())
    }

    pub fn deactivate_batch(&mut self, ctx: &CallContext<'_>, id: BatchId) -> Result<()> {
        self.require_owner(ctx, id, "deactivate a batch it does not own")?;

        self.history
            .append(id, ctx.now, ctx.caller, BatchEvent::Deactivated)?;
        self.get_mut(id)?.active = false;
        info!(batch_id = id, owner = %ctx.caller, "batch deactivated");
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    pub fn batch_count(&self) -> u64 {
        self.ids.issued()
    }

    pub fn batch_exists(&self, id: BatchId) -> bool {
        self.batches.contains_key(&id)
    }

    pub fn batch(&self, id: BatchId) -> Option<&Batch> {
        self.batches.get(&id)
    }

    pub fn batches(&self) -> impl Iterator<Item = (BatchId, &Batch)> {
        self.batches.iter().map(|(id, b)| (*id, b))
    }

    pub fn certification(&self, id: BatchId) -> Option<&Certification> {
        self.certifications.get(&id)
    }

    /// `Ok(())` while the batch holds a certification that has not passed its
    /// expiry at `now`; `Expired` otherwise.
    pub fn check_cert_status(&self, id: BatchId, now: LedgerTime) -> Result<()> {
        let batch = self.get(id)?;
        match self.certifications.get(&id) {
            Some(cert) if batch.certified && now <= cert.expires_at => Ok(()),
            _ => Err(ProvenanceError::Expired),
        }
    }

    pub fn history(&self, id: BatchId) -> &[HistoryEntry<BatchEvent>] {
        self.history.entries(id)
    }

    pub fn history_log(&self) -> &HistoryLog<BatchEvent> {
        &self.history
    }

    /// Successive owners of a batch, registrant first.
    pub fn owner_history(&self, id: BatchId) -> Vec<&Principal> {
        self.history
            .entries(id)
            .iter()
            .filter_map(|e| match &e.event {
                BatchEvent::Registered { owner } => Some(owner),
                BatchEvent::OwnershipTransferred { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    // -- helpers ------------------------------------------------------------

    fn get(&self, id: BatchId) -> Result<&Batch> {
        self.batches
            .get(&id)
            .ok_or_else(|| ProvenanceError::not_found(RecordKind::Batch, id))
    }

    fn get_mut(&mut self, id: BatchId) -> Result<&mut Batch> {
        self.batches
            .get_mut(&id)
            .ok_or_else(|| ProvenanceError::not_found(RecordKind::Batch, id))
    }

    fn require_owner(
        &self,
        ctx: &CallContext<'_>,
        id: BatchId,
        action: &'static str,
    ) -> Result<&Batch> {
        let batch = self.get(id)?;
        if batch.owner != *ctx.caller {
            return Err(ProvenanceError::Unauthorized { action });
        }
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
