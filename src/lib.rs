//! Supply-chain provenance ledger.
//!
//! This crate provides:
//! - A batch registry with certification and ownership history
//! - A shipment ledger with multi-party approval quorum
//! - An ownership-transfer ledger with escrow holds
//! - Per-ledger governing authority, fees, and capacity ceilings
//! - Hash-chained, append-only history for every record mutation
//! - JSON snapshots, CSV bulk registration, and per-batch dossiers
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod authority;
pub mod batch;
pub mod bulk;
pub mod env;
pub mod history;
pub mod hub;
pub mod principal;
pub mod report;
pub mod sequence;
pub mod shipment;
pub mod store;
pub mod transfer;
pub mod util;
