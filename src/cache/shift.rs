//! Per-producer holding area replayed to reconnecting consumers.

use super::bank::StateBank;
use super::state::RawState;
use std::collections::BTreeSet;

/// Everything one location produced that a consumer catching up must be
/// re-sent, plus the dests whose journals the shift feeds.
#[derive(Debug, Clone)]
pub struct CacheShift {
    source: u32,
    bank: StateBank,
    dests: BTreeSet<u32>,
}

impl CacheShift {
    /// Creates an empty shift for `source`.
    #[must_use]
    pub fn new(source: u32, retry_limit: u32) -> Self {
        Self {
            source,
            bank: StateBank::new().with_retry_limit(retry_limit),
            dests: BTreeSet::new(),
        }
    }

    /// Producing location uid.
    #[must_use]
    pub fn source(&self) -> u32 {
        self.source
    }

    /// Records that `dest` is fed by this shift.
    pub fn ensure_storage(&mut self, dest: u32) {
        self.dests.insert(dest);
    }

    /// Whether `dest` is fed by this shift.
    #[must_use]
    pub fn has_storage(&self, dest: u32) -> bool {
        self.dests.contains(&dest)
    }

    /// Dests fed by this shift, ascending.
    pub fn dests(&self) -> impl Iterator<Item = u32> + '_ {
        self.dests.iter().copied()
    }

    /// Stops feeding `dest` and drops its entries.
    pub fn release_storage(&mut self, dest: u32) -> usize {
        self.dests.remove(&dest);
        self.bank.take(usize::MAX, |state| state.key.dest == dest).len()
    }

    /// Stores `state`.
    pub fn insert(&mut self, state: RawState) {
        self.bank.insert(state);
    }

    /// Held entries.
    #[must_use]
    pub fn bank(&self) -> &StateBank {
        &self.bank
    }

    /// Mutable access to the held entries.
    pub fn bank_mut(&mut self) -> &mut StateBank {
        &mut self.bank
    }

    /// Number of held entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bank.len()
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bank.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::state::StateKey;
    use bytes::Bytes;

    fn raw(dest: u32, instance: u64) -> RawState {
        RawState {
            msg_type: 205,
            key: StateKey::new(1, dest, instance),
            update_time: 1,
            payload: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn test_storage_tracking() {
        let mut shift = CacheShift::new(1, 10);
        shift.ensure_storage(7);
        shift.ensure_storage(3);
        shift.ensure_storage(7);
        assert_eq!(shift.dests().collect::<Vec<_>>(), vec![3, 7]);
        assert!(shift.has_storage(3));

        shift.insert(raw(3, 0));
        shift.insert(raw(7, 0));
        shift.insert(raw(7, 1));
        assert_eq!(shift.release_storage(7), 2);
        assert!(!shift.has_storage(7));
        assert_eq!(shift.len(), 1);
        assert_eq!(shift.source(), 1);
    }
}
