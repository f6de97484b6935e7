//! Append-only, per-parent event trail.
//!
//! Each parent id (a batch, a shipment) owns an ordered sequence of entries.
//! An entry's position index equals the number of entries that preceded it
//! for the same parent.  Entries of one parent are hash-chained so that a
//! restored snapshot can be checked for tampering with [`HistoryLog::verify`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::env::LedgerTime;
use crate::error::{ProvenanceError, Result, ResultExt as _};
use crate::principal::Principal;
use crate::util;

const GENESIS_HASH: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry<E> {
    pub index: u64,
    pub at: LedgerTime,
    pub actor: Principal,
    pub event: E,
    pub prev_hash_hex: String,
    pub entry_hash_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLog<E> {
    entries: BTreeMap<u64, Vec<HistoryEntry<E>>>,
}

impl<E> Default for HistoryLog<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<E: Serialize> HistoryLog<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` under `parent`; returns its position index.
    pub fn append(
        &mut self,
        parent: u64,
        at: LedgerTime,
        actor: &Principal,
        event: E,
    ) -> Result<u64> {
        let entry = self.prepare(parent, at, actor, event)?;
        Ok(self.commit(parent, entry))
    }

    /// Build the next entry for `parent` without recording it.
    ///
    /// Everything that can fail happens here, so a caller may run other
    /// fallible steps between `prepare` and [`HistoryLog::commit`].
    pub fn prepare(
        &self,
        parent: u64,
        at: LedgerTime,
        actor: &Principal,
        event: E,
    ) -> Result<HistoryEntry<E>> {
        let trail = self.entries(parent);
        let index = trail.len() as u64;
        let prev = match trail.last() {
            Some(last) => decode_hash(&last.entry_hash_hex)?,
            None => GENESIS_HASH,
        };
        let hash = entry_hash(&prev, index, at, actor, &event)?;
        Ok(HistoryEntry {
            index,
            at,
            actor: actor.clone(),
            event,
            prev_hash_hex: hex::encode(prev),
            entry_hash_hex: hex::encode(hash),
        })
    }

    /// Record an entry built by [`HistoryLog::prepare`] for the same parent.
    pub fn commit(&mut self, parent: u64, entry: HistoryEntry<E>) -> u64 {
        let index = entry.index;
        self.entries.entry(parent).or_default().push(entry);
        index
    }

    pub fn entries(&self, parent: u64) -> &[HistoryEntry<E>] {
        self.entries.get(&parent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, parent: u64) -> usize {
        self.entries(parent).len()
    }

    pub fn is_empty(&self, parent: u64) -> bool {
        self.len(parent) == 0
    }

    pub fn get(&self, parent: u64, index: u64) -> Option<&HistoryEntry<E>> {
        self.entries(parent).get(usize::try_from(index).ok()?)
    }

    pub fn parents(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    /// Total number of entries across all parents.
    pub fn total(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Recompute the hash chain of one parent's trail.
    pub fn verify(&self, parent: u64) -> Result<()> {
        let mut prev = GENESIS_HASH;
        for (pos, e) in self.entries(parent).iter().enumerate() {
            if e.index != pos as u64 {
                return Err(ProvenanceError::invalid_state(format!(
                    "history index gap for parent {parent} at position {pos}"
                )));
            }
            if hex::encode(prev) != e.prev_hash_hex {
                return Err(ProvenanceError::invalid_state(format!(
                    "history prev_hash mismatch for parent {parent} at index {}",
                    e.index
                )));
            }
            let hash = entry_hash(&prev, e.index, e.at, &e.actor, &e.event)?;
            if hex::encode(hash) != e.entry_hash_hex {
                return Err(ProvenanceError::invalid_state(format!(
                    "history entry_hash mismatch for parent {parent} at index {}",
                    e.index
                )));
            }
            prev = hash;
        }
        Ok(())
    }

    pub fn verify_all(&self) -> Result<()> {
        self.entries.keys().try_for_each(|&p| self.verify(p))
    }

    #[cfg(test)]
    pub(crate) fn trail_mut(&mut self, parent: u64) -> Option<&mut Vec<HistoryEntry<E>>> {
        self.entries.get_mut(&parent)
    }
}

fn entry_hash<E: Serialize>(
    prev: &[u8; 32],
    index: u64,
    at: LedgerTime,
    actor: &Principal,
    event: &E,
) -> Result<[u8; 32]> {
    let event_json = serde_json::to_vec(event).ctx_store("serialize history event")?;
    let actor = actor.as_str().as_bytes();
    let mut preimage = Vec::with_capacity(32 + 16 + 8 + actor.len() + event_json.len());
    preimage.extend_from_slice(prev);
    preimage.extend_from_slice(&index.to_le_bytes());
    preimage.extend_from_slice(&at.to_le_bytes());
    preimage.extend_from_slice(&(actor.len() as u64).to_le_bytes());
    preimage.extend_from_slice(actor);
    preimage.extend_from_slice(&event_json);
    Ok(util::sha256(&preimage))
}

fn decode_hash(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str).ctx_store("decode history hash")?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ProvenanceError::Store("history hash must be 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    enum Ev {
        Created,
        Moved(String),
    }

    fn actor() -> Principal {
        "ST1TEST".into()
    }

    #[test]
    fn index_counts_prior_entries_per_parent() {
        let mut log = HistoryLog::new();
        assert_eq!(log.append(7, 1, &actor(), Ev::Created).unwrap(), 0);
        assert_eq!(log.append(3, 1, &actor(), Ev::Created).unwrap(), 0);
        assert_eq!(log.append(7, 2, &actor(), Ev::Moved("a".into())).unwrap(), 1);
        assert_eq!(log.append(7, 3, &actor(), Ev::Moved("b".into())).unwrap(), 2);
        assert_eq!(log.len(7), 3);
        assert_eq!(log.len(3), 1);
        assert!(log.is_empty(99));
        assert_eq!(log.total(), 4);
        assert_eq!(log.get(7, 1).unwrap().event, Ev::Moved("a".into()));
        assert_eq!(log.parents().collect::<Vec<_>>(), vec![3, 7]);
    }

    #[test]
    fn chain_links_entries() {
        let mut log = HistoryLog::new();
        log.append(0, 1, &actor(), Ev::Created).unwrap();
        log.append(0, 2, &actor(), Ev::Moved("x".into())).unwrap();
        let trail = log.entries(0);
        assert_eq!(trail[0].prev_hash_hex, hex::encode(GENESIS_HASH));
        assert_eq!(trail[1].prev_hash_hex, trail[0].entry_hash_hex);
        log.verify_all().unwrap();
    }

    #[test]
    fn verify_detects_tamper() {
        let mut log = HistoryLog::new();
        log.append(0, 1, &actor(), Ev::Created).unwrap();
        log.append(0, 2, &actor(), Ev::Moved("x".into())).unwrap();

        let mut tampered = log.clone();
        tampered.entries.get_mut(&0).unwrap()[1].event = Ev::Moved("y".into());
        let err = tampered.verify(0).unwrap_err();
        assert!(err.to_string().contains("entry_hash mismatch"));

        let mut tampered = log.clone();
        tampered.entries.get_mut(&0).unwrap()[1].actor = "ST9EVIL".into();
        assert!(tampered.verify_all().is_err());

        let mut truncated = log;
        truncated.entries.get_mut(&0).unwrap().remove(0);
        assert!(truncated.verify(0).is_err());
    }

    #[test]
    fn prepare_does_not_record() {
        let mut log = HistoryLog::new();
        log.append(0, 1, &actor(), Ev::Created).unwrap();
        let entry = log.prepare(0, 2, &actor(), Ev::Moved("x".into())).unwrap();
        assert_eq!(entry.index, 1);
        assert_eq!(log.len(0), 1);
        assert!(log.prepare(5, 2, &actor(), Ev::Created).is_ok());
        assert!(log.parents().all(|p| p == 0));

        assert_eq!(log.commit(0, entry), 1);
        log.verify(0).unwrap();
    }

    #[test]
    fn corrupt_tail_fails_before_any_write() {
        let mut log = HistoryLog::new();
        log.append(0, 1, &actor(), Ev::Created).unwrap();
        log.trail_mut(0).unwrap()[0].entry_hash_hex = "zz".into();

        let err = log.append(0, 2, &actor(), Ev::Created).unwrap_err();
        assert!(matches!(err, ProvenanceError::Store(_)));
        assert_eq!(log.len(0), 1);
    }
}
