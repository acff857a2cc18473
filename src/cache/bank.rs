//! Type-indexed map of pending state entries.
//!
//! A [`StateBank`] holds at most one entry per `(type, source, dest,
//! instance)`. Inserting overwrites. Entries leave the bank by retraction
//! ([`StateBank::remove`]) or by being drained into a [`StateSink`]; a
//! superseded entry keeps its key but is dropped instead of delivered.

use super::state::{RawState, StateKey, State};
use crate::config::DEFAULT_RETRY_LIMIT;
use crate::error::BusError;
use crate::journal::{JournalError, Writer};
use crate::profile::ProfileStore;
use crate::types::{Record, TypeRegistry};
use crate::utils::now_in_nano;
use std::collections::BTreeMap;
use tracing::{error, trace, warn};

/// Outcome of handing one entry to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The entry was consumed and leaves the bank.
    Delivered,
    /// The sink cannot take the entry now; it stays in the bank.
    Deferred,
}

/// Destination of drained entries.
pub trait StateSink {
    /// Takes one entry.
    ///
    /// # Errors
    ///
    /// A returned error counts as a failed attempt; the entry stays in the
    /// bank until its attempts run out.
    fn deliver(&mut self, state: &RawState) -> Result<Delivery, BusError>;
}

/// Counts produced by one drain call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries handed to the sink and removed.
    pub delivered: usize,
    /// Entries the sink deferred.
    pub deferred: usize,
    /// Superseded entries dropped without delivery.
    pub superseded: usize,
    /// Failed attempts, including entries dropped after their last attempt.
    pub failed: usize,
    /// Entries left in the bank after the call.
    pub remaining: usize,
}

impl DrainReport {
    /// Whether the bank was left empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

#[derive(Debug, Clone)]
struct Entry {
    state: RawState,
    superseded: bool,
    failures: u32,
}

/// Pending state entries bucketed by record type.
#[derive(Debug, Clone)]
pub struct StateBank {
    buckets: BTreeMap<i32, BTreeMap<StateKey, Entry>>,
    retry_limit: u32,
}

impl Default for StateBank {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBank {
    /// Creates an empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }

    /// Sets how many failed deliveries an entry survives.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit.max(1);
        self
    }

    /// Inserts or overwrites an entry, clearing any superseded mark.
    pub fn insert(&mut self, state: RawState) {
        let bucket = self.buckets.entry(state.msg_type).or_default();
        bucket.insert(
            state.key,
            Entry {
                state,
                superseded: false,
                failures: 0,
            },
        );
    }

    /// Typed [`StateBank::insert`].
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::SerializationError`] if the value cannot be
    /// encoded.
    pub fn insert_state<T: Record>(&mut self, state: &State<T>) -> Result<(), JournalError> {
        self.insert(state.to_raw()?);
        Ok(())
    }

    /// Retracts the entry for `key`.
    pub fn remove(&mut self, msg_type: i32, key: &StateKey) -> Option<RawState> {
        let bucket = self.buckets.get_mut(&msg_type)?;
        let removed = bucket.remove(key).map(|entry| entry.state);
        if bucket.is_empty() {
            self.buckets.remove(&msg_type);
        }
        removed
    }

    /// Marks the entry for `key` superseded. Returns whether it exists.
    pub fn supersede(&mut self, msg_type: i32, key: &StateKey) -> bool {
        match self.buckets.get_mut(&msg_type).and_then(|b| b.get_mut(key)) {
            Some(entry) => {
                entry.superseded = true;
                true
            }
            None => false,
        }
    }

    /// Retracts every entry of `msg_type`. Returns how many were removed.
    pub fn remove_type(&mut self, msg_type: i32) -> usize {
        self.buckets.remove(&msg_type).map_or(0, |bucket| bucket.len())
    }

    /// Supersedes every entry of `msg_type` whose key satisfies `matches`.
    /// Returns how many were marked.
    pub fn supersede_type<F>(&mut self, msg_type: i32, matches: F) -> usize
    where
        F: Fn(&StateKey) -> bool,
    {
        let Some(bucket) = self.buckets.get_mut(&msg_type) else {
            return 0;
        };
        let mut marked = 0;
        for (key, entry) in bucket.iter_mut() {
            if matches(key) && !entry.superseded {
                entry.superseded = true;
                marked += 1;
            }
        }
        marked
    }

    /// Retracts every entry sourced from or destined to `uid`.
    pub fn remove_location(&mut self, uid: u32) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.values_mut() {
            let before = bucket.len();
            bucket.retain(|key, _| key.source != uid && key.dest != uid);
            removed += before - bucket.len();
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// Entry for `key`, superseded or not.
    #[must_use]
    pub fn get(&self, msg_type: i32, key: &StateKey) -> Option<&RawState> {
        self.buckets
            .get(&msg_type)
            .and_then(|b| b.get(key))
            .map(|entry| &entry.state)
    }

    /// Typed [`StateBank::get`].
    #[must_use]
    pub fn get_state<T: Record>(&self, key: &StateKey) -> Option<State<T>> {
        self.get(T::TAG, key).and_then(|raw| State::from_raw(raw).ok())
    }

    /// Whether an entry exists for `key`.
    #[must_use]
    pub fn contains(&self, msg_type: i32, key: &StateKey) -> bool {
        self.get(msg_type, key).is_some()
    }

    /// Whether the entry for `key` exists and is superseded.
    #[must_use]
    pub fn is_superseded(&self, msg_type: i32, key: &StateKey) -> bool {
        self.buckets
            .get(&msg_type)
            .and_then(|b| b.get(key))
            .is_some_and(|entry| entry.superseded)
    }

    /// Number of entries, superseded ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    /// Number of entries that would be delivered.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buckets
            .values()
            .flat_map(BTreeMap::values)
            .filter(|entry| !entry.superseded)
            .count()
    }

    /// Whether the bank holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of entries of `msg_type`.
    #[must_use]
    pub fn type_len(&self, msg_type: i32) -> usize {
        self.buckets.get(&msg_type).map_or(0, BTreeMap::len)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    /// Pending entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &RawState> {
        self.buckets
            .values()
            .flat_map(BTreeMap::values)
            .filter(|entry| !entry.superseded)
            .map(|entry| &entry.state)
    }

    /// Removes and returns up to `cap` pending entries accepted by `select`,
    /// in bucket order.
    pub fn take<F>(&mut self, cap: usize, select: F) -> Vec<RawState>
    where
        F: Fn(&RawState) -> bool,
    {
        let keys: Vec<(i32, StateKey)> = self
            .buckets
            .iter()
            .flat_map(|(tag, bucket)| {
                bucket
                    .iter()
                    .filter(|(_, entry)| !entry.superseded && select(&entry.state))
                    .map(move |(key, _)| (*tag, *key))
            })
            .take(cap)
            .collect();
        keys.into_iter()
            .filter_map(|(tag, key)| self.remove(tag, &key))
            .collect()
    }

    /// Drains up to `cap` entries into `sink`, one type bucket at a time in
    /// tag order.
    pub fn drain_into(&mut self, sink: &mut dyn StateSink, cap: usize) -> DrainReport {
        let keys: Vec<(i32, StateKey)> = self
            .buckets
            .iter()
            .flat_map(|(tag, bucket)| bucket.keys().map(move |key| (*tag, *key)))
            .collect();
        self.drain_keys(keys, sink, cap)
    }

    /// Drains up to `cap` entries into `sink` in ascending update time
    /// across all buckets.
    pub fn drain_sorted_into(&mut self, sink: &mut dyn StateSink, cap: usize) -> DrainReport {
        let mut keyed: Vec<(i64, i32, StateKey)> = self
            .buckets
            .iter()
            .flat_map(|(tag, bucket)| {
                bucket
                    .iter()
                    .map(move |(key, entry)| (entry.state.update_time, *tag, *key))
            })
            .collect();
        keyed.sort_unstable();
        let keys = keyed.into_iter().map(|(_, tag, key)| (tag, key)).collect();
        self.drain_keys(keys, sink, cap)
    }

    fn drain_keys(
        &mut self,
        keys: Vec<(i32, StateKey)>,
        sink: &mut dyn StateSink,
        cap: usize,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        let mut budget = cap;
        for (tag, key) in keys {
            if budget == 0 {
                break;
            }
            let Some(entry) = self.buckets.get(&tag).and_then(|b| b.get(&key)) else {
                continue;
            };
            if entry.superseded {
                self.remove(tag, &key);
                report.superseded += 1;
                budget -= 1;
                continue;
            }
            match sink.deliver(&entry.state) {
                Ok(Delivery::Delivered) => {
                    self.remove(tag, &key);
                    report.delivered += 1;
                    budget -= 1;
                }
                Ok(Delivery::Deferred) => report.deferred += 1,
                Err(e) => {
                    report.failed += 1;
                    budget -= 1;
                    self.record_failure(tag, &key, &e);
                }
            }
        }
        report.remaining = self.len();

        trace!(
            delivered = report.delivered,
            remaining = report.remaining,
            "bank drained"
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("journalbus_cache_entries_drained").increment(report.delivered as u64);

        report
    }

    fn record_failure(&mut self, tag: i32, key: &StateKey, err: &BusError) {
        let retry_limit = self.retry_limit;
        let Some(entry) = self.buckets.get_mut(&tag).and_then(|b| b.get_mut(key)) else {
            return;
        };
        entry.failures += 1;
        if entry.failures >= retry_limit {
            error!(
                msg_type = tag,
                source = format_args!("{:08x}", key.source),
                dest = format_args!("{:08x}", key.dest),
                attempts = entry.failures,
                error = %err,
                "state delivery failed, dropping entry"
            );
            self.remove(tag, key);
        } else {
            warn!(
                msg_type = tag,
                attempt = entry.failures,
                max = retry_limit,
                error = %err,
                "state delivery failed, will retry"
            );
        }
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

/// Replays entries into a journal, keeping their original source and dest
/// and using the update time as trigger time.
impl StateSink for Writer {
    fn deliver(&mut self, state: &RawState) -> Result<Delivery, BusError> {
        self.write_raw(
            now_in_nano(),
            state.update_time,
            state.msg_type,
            &state.payload,
            state.key.source,
            state.key.dest,
        )?;
        Ok(Delivery::Delivered)
    }
}

/// Persists profile entries.
impl StateSink for ProfileStore {
    fn deliver(&mut self, state: &RawState) -> Result<Delivery, BusError> {
        let descriptor = TypeRegistry::global().require(state.msg_type)?;
        self.put_raw(descriptor, &state.payload)?;
        Ok(Delivery::Delivered)
    }
}

/// Collects delivered entries in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    /// Entries received so far.
    pub states: Vec<RawState>,
}

impl StateSink for VecSink {
    fn deliver(&mut self, state: &RawState) -> Result<Delivery, BusError> {
        self.states.push(state.clone());
        Ok(Delivery::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn raw(msg_type: i32, source: u32, dest: u32, instance: u64, update_time: i64) -> RawState {
        RawState {
            msg_type,
            key: StateKey::new(source, dest, instance),
            update_time,
            payload: Bytes::from_static(b"{}"),
        }
    }

    struct FailingSink {
        calls: usize,
    }

    impl StateSink for FailingSink {
        fn deliver(&mut self, _state: &RawState) -> Result<Delivery, BusError> {
            self.calls += 1;
            Err(BusError::InvalidInstruction("sink down".to_string()))
        }
    }

    struct DeferringSink;

    impl StateSink for DeferringSink {
        fn deliver(&mut self, _state: &RawState) -> Result<Delivery, BusError> {
            Ok(Delivery::Deferred)
        }
    }

    #[test]
    fn test_insert_overwrites_same_key() {
        let mut bank = StateBank::new();
        bank.insert(raw(205, 1, 2, 7, 10));
        bank.insert(raw(205, 1, 2, 7, 20));
        bank.insert(raw(205, 1, 2, 8, 30));
        assert_eq!(bank.len(), 2);
        let key = StateKey::new(1, 2, 7);
        assert_eq!(bank.get(205, &key).map(|s| s.update_time), Some(20));
    }

    #[test]
    fn test_drain_cap_needs_three_ticks() {
        let mut bank = StateBank::new();
        for instance in 0..5 {
            bank.insert(raw(205, 1, 2, instance, instance as i64));
        }
        let mut sink = VecSink::default();

        let first = bank.drain_into(&mut sink, 2);
        assert_eq!(first.delivered, 2);
        assert_eq!(first.remaining, 3);
        assert_eq!(bank.len(), 3);

        let second = bank.drain_into(&mut sink, 2);
        assert_eq!(second.remaining, 1);
        let third = bank.drain_into(&mut sink, 2);
        assert_eq!(third.delivered, 1);
        assert!(third.is_complete());
        assert_eq!(sink.states.len(), 5);
    }

    #[test]
    fn test_drain_of_empty_bank_writes_nothing() {
        let mut bank = StateBank::new();
        let mut sink = VecSink::default();
        for _ in 0..3 {
            let report = bank.drain_into(&mut sink, 100);
            assert_eq!(report, DrainReport::default());
        }
        assert!(sink.states.is_empty());
        assert!(bank.is_empty());
    }

    #[test]
    fn test_drain_visits_buckets_in_tag_order() {
        let mut bank = StateBank::new();
        bank.insert(raw(206, 1, 2, 0, 1));
        bank.insert(raw(203, 1, 2, 0, 2));
        bank.insert(raw(205, 1, 2, 0, 3));
        let mut sink = VecSink::default();
        bank.drain_into(&mut sink, 10);
        let tags: Vec<i32> = sink.states.iter().map(|s| s.msg_type).collect();
        assert_eq!(tags, vec![203, 205, 206]);
    }

    #[test]
    fn test_sorted_drain_orders_by_update_time() {
        let mut bank = StateBank::new();
        bank.insert(raw(206, 1, 2, 0, 5));
        bank.insert(raw(203, 1, 2, 0, 9));
        bank.insert(raw(205, 1, 2, 0, 1));
        let mut sink = VecSink::default();
        bank.drain_sorted_into(&mut sink, 10);
        let times: Vec<i64> = sink.states.iter().map(|s| s.update_time).collect();
        assert_eq!(times, vec![1, 5, 9]);
    }

    #[test]
    fn test_superseded_entries_are_dropped_not_delivered() {
        let mut bank = StateBank::new();
        bank.insert(raw(205, 1, 2, 0, 1));
        bank.insert(raw(205, 3, 2, 0, 2));
        bank.insert(raw(206, 3, 2, 0, 3));
        assert_eq!(bank.supersede_type(205, |key| key.source == 3), 1);
        assert!(bank.is_superseded(205, &StateKey::new(3, 2, 0)));
        assert!(bank.contains(205, &StateKey::new(3, 2, 0)));
        assert_eq!(bank.pending_len(), 2);

        let mut sink = VecSink::default();
        let report = bank.drain_into(&mut sink, 10);
        assert_eq!(report.superseded, 1);
        assert_eq!(report.delivered, 2);
        assert!(sink.states.iter().all(|s| !(s.msg_type == 205 && s.key.source == 3)));
    }

    #[test]
    fn test_reinsert_clears_superseded_mark() {
        let mut bank = StateBank::new();
        let key = StateKey::new(1, 2, 0);
        bank.insert(raw(205, 1, 2, 0, 1));
        assert!(bank.supersede(205, &key));
        bank.insert(raw(205, 1, 2, 0, 2));
        assert!(!bank.is_superseded(205, &key));
        assert!(!bank.supersede(204, &key));
    }

    #[test]
    fn test_failed_delivery_is_retried_then_dropped() {
        let mut bank = StateBank::new().with_retry_limit(3);
        bank.insert(raw(205, 1, 2, 0, 1));
        let mut sink = FailingSink { calls: 0 };
        assert_eq!(bank.drain_into(&mut sink, 10).remaining, 1);
        assert_eq!(bank.drain_into(&mut sink, 10).remaining, 1);
        let last = bank.drain_into(&mut sink, 10);
        assert_eq!(last.failed, 1);
        assert!(last.is_complete());
        assert_eq!(sink.calls, 3);
    }

    #[test]
    fn test_deferred_entries_stay() {
        let mut bank = StateBank::new();
        bank.insert(raw(205, 1, 2, 0, 1));
        let report = bank.drain_into(&mut DeferringSink, 10);
        assert_eq!(report.deferred, 1);
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_remove_type_and_location() {
        let mut bank = StateBank::new();
        bank.insert(raw(205, 1, 2, 0, 1));
        bank.insert(raw(205, 3, 1, 0, 1));
        bank.insert(raw(206, 3, 4, 0, 1));
        assert_eq!(bank.remove_location(1), 2);
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.remove_type(206), 1);
        assert!(bank.is_empty());
        assert!(bank.remove(205, &StateKey::new(1, 2, 0)).is_none());
    }

    #[test]
    fn test_take_moves_selected_entries() {
        let mut bank = StateBank::new();
        for source in 1..=4 {
            bank.insert(raw(205, source, 9, 0, 1));
        }
        let taken = bank.take(10, |s| s.key.source % 2 == 0);
        assert_eq!(taken.len(), 2);
        assert_eq!(bank.len(), 2);
        let capped = bank.take(1, |_| true);
        assert_eq!(capped.len(), 1);
    }
}
