//! Governing authority and authority-gated fee configuration.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::env::{Amount, FeeIntent};
use crate::error::{InvalidField, ProvenanceError, Result};
use crate::principal::Principal;

/// Holds the single governing principal of a ledger.
///
/// The authority can be assigned exactly once.  There is no rotation path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityGate {
    authority: Option<Principal>,
}

impl AuthorityGate {
    pub fn set(&mut self, authority: Principal) -> Result<()> {
        if self.authority.is_some() {
            return Err(ProvenanceError::AuthorityAlreadySet);
        }
        info!(authority = %authority, "authority set");
        self.authority = Some(authority);
        Ok(())
    }

    pub fn get(&self) -> Option<&Principal> {
        self.authority.as_ref()
    }

    /// The authority, or `AuthorityNotSet`.
    pub fn require(&self) -> Result<&Principal> {
        self.authority.as_ref().ok_or(ProvenanceError::AuthorityNotSet)
    }
}

/// Per-ledger governance: the authority plus the creation fee it collects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSettings {
    authority: AuthorityGate,
    fee: Amount,
}

impl LedgerSettings {
    pub fn new(fee: Amount) -> Self {
        Self {
            authority: AuthorityGate::default(),
            fee,
        }
    }

    pub fn authority(&self) -> Option<&Principal> {
        self.authority.get()
    }

    pub fn set_authority(&mut self, authority: Principal) -> Result<()> {
        self.authority.set(authority)
    }

    /// Fails unless an authority has been recorded.
    pub fn require_authority(&self) -> Result<&Principal> {
        self.authority.require()
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn set_fee(&mut self, fee: Amount) -> Result<()> {
        self.authority.require()?;
        if fee < 0 {
            return Err(ProvenanceError::InvalidInput(InvalidField::Fee));
        }
        self.fee = fee;
        Ok(())
    }

    /// The fee intent owed by `payer` for one creation.
    pub fn fee_intent(&self, payer: &Principal) -> Result<FeeIntent> {
        let to = self.authority.require()?.clone();
        Ok(FeeIntent {
            amount: self.fee,
            from: payer.clone(),
            to,
        })
    }
}
