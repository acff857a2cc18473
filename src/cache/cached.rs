//! The cache daemon.
//!
//! `CacheD` runs as an apprentice in the system category. It joins the
//! journals of registered trading gateways and of every authorized
//! channel, keeps the last value of each state record in a feed bank and
//! moves it, a bounded volume per tick, into the shift of the location
//! that produced it. Profile records are collected the same way and
//! persisted to the profile store.
//!
//! A `RequestCached` from a location replays its shift into its journal in
//! update-time order, then the profile bootstrap data, then acknowledges
//! with `RequestCachedDone` through the master. Replay and bootstrap share
//! the per-tick budget, so a large replay spans several ticks.

use super::bank::{DrainReport, StateBank};
use super::shift::CacheShift;
use super::state::{RawState, StateKey};
use crate::config::{BusConfig, LOW_LATENCY_STORE_VOLUME};
use crate::error::BusError;
use crate::journal::{Category, Location, Locator, Mode, PUBLIC_DEST};
use crate::notify::Notice;
use crate::practice::{Apprentice, Event, EventBus, EventFilter, ProcessContext, Reactor};
use crate::profile::ProfileStore;
use crate::types::{
    CacheReset, Channel, Deregister, Instrument, Record, Register, RecordKind, RequestCached,
    RequestCachedDone,
};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State of the cache daemon.
#[derive(Debug)]
pub struct CacheD {
    store: ProfileStore,
    store_volume: usize,
    retry_limit: u32,
    feed_bank: StateBank,
    profile_bank: StateBank,
    shifts: BTreeMap<u32, CacheShift>,
    live: BTreeSet<u32>,
    /// Replays in progress; the bootstrap bank is built once the shift is drained.
    pending: BTreeMap<u32, Option<StateBank>>,
}

impl CacheD {
    /// Creates the daemon state persisting profiles into `store`.
    #[must_use]
    pub fn new(store: ProfileStore, config: &BusConfig) -> Self {
        let retry_limit = config.profile_retry_limit;
        Self {
            store,
            store_volume: config.store_volume_per_tick.max(1),
            retry_limit,
            feed_bank: StateBank::new().with_retry_limit(retry_limit),
            profile_bank: StateBank::new().with_retry_limit(retry_limit),
            shifts: BTreeMap::new(),
            live: BTreeSet::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Builds the cache daemon apprentice of `mode`, with its profile store
    /// under `locator`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the profile store cannot be opened or the
    /// configuration is invalid.
    pub fn open(locator: Arc<Locator>, mode: Mode, config: BusConfig) -> Result<Apprentice<CacheD>, BusError> {
        let store = ProfileStore::open(&locator)?;
        let daemon = CacheD::new(store, &config);
        Apprentice::new(locator, Location::cached(mode), config, daemon)
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    /// Shift of `source`, if armed.
    pub fn shift(&self, source: u32) -> Option<&CacheShift> {
        self.shifts.get(&source)
    }

    /// Inserts directly into the shift of `source`, arming it if needed.
    pub fn shift_mut(&mut self, source: u32) -> &mut CacheShift {
        let retry_limit = self.retry_limit;
        self.shifts
            .entry(source)
            .or_insert_with(|| CacheShift::new(source, retry_limit))
    }

    pub fn shift_count(&self) -> usize {
        self.shifts.len()
    }

    /// Entries fed but not yet moved into a shift.
    pub fn feed_len(&self) -> usize {
        self.feed_bank.len()
    }

    /// Profile entries not yet persisted.
    pub fn profile_len(&self) -> usize {
        self.profile_bank.len()
    }

    /// Whether `uid` has a live session.
    pub fn is_live(&self, uid: u32) -> bool {
        self.live.contains(&uid)
    }

    /// Locations whose replay is still in progress.
    pub fn pending_requests(&self) -> impl Iterator<Item = u32> + '_ {
        self.pending.keys().copied()
    }

    // ─── Session events ─────────────────────────────────────────────────────

    fn handle_register(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let register: Register = event.data()?;
        let location = register.location;
        let uid = location.uid;
        if uid == ctx.home_uid() || location.is_system() {
            return Ok(());
        }
        self.live.insert(uid);
        if self.shifts.remove(&uid).is_some() {
            debug!(location = %location.uname, "stale shift dropped");
        }
        ctx.join(uid, ctx.home_uid(), register.checkin_time)?;
        if location.category == Category::Td {
            ctx.join(uid, PUBLIC_DEST, register.checkin_time)?;
            self.shift_mut(uid).ensure_storage(PUBLIC_DEST);
        }
        debug!(location = %location.uname, "cache armed");
        Ok(())
    }

    fn handle_deregister(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let deregister: Deregister = event.data()?;
        let uid = deregister.location_uid;
        if !self.live.remove(&uid) {
            error!(location = %ctx.locations().uname_of(uid), "deregister of location without session");
            return Ok(());
        }
        let held = self.shifts.remove(&uid).map_or(0, |shift| shift.len());
        let fed = self.feed_bank.remove_location(uid);
        self.pending.remove(&uid);
        ctx.reader_mut().disjoin(uid);
        info!(location = %ctx.locations().uname_of(uid), held, fed, "cache released");
        Ok(())
    }

    fn handle_channel(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let channel: Channel = event.data()?;
        let home = ctx.home_uid();
        let master = ctx.master_uid();
        let ends = [channel.source_id, channel.dest_id];
        if ends.contains(&home) || ends.contains(&master) {
            return Ok(());
        }
        ctx.join(channel.source_id, channel.dest_id, event.gen_time())?;
        self.shift_mut(channel.source_id).ensure_storage(channel.dest_id);
        Ok(())
    }

    fn handle_location(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let descriptor = ctx.registry().require(event.msg_type())?;
        self.profile_bank.insert(RawState::from_frame(event.frame(), descriptor)?);
        Ok(())
    }

    // ─── Data ───────────────────────────────────────────────────────────────

    /// Keeps the last value of state and profile records.
    fn feed(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let master = ctx.master_uid();
        if event.source() == master || event.origin().uid == master {
            return Ok(());
        }
        if event.origin().category == Category::Md && event.msg_type() != Instrument::TAG {
            return Ok(());
        }
        let Some(descriptor) = ctx.registry().get(event.msg_type()) else {
            return Ok(());
        };
        if descriptor.is_state() {
            self.feed_bank.insert(RawState::from_frame(event.frame(), descriptor)?);
        } else if descriptor.is_profile() && !descriptor.kind.contains(RecordKind::CONTROL) {
            self.profile_bank.insert(RawState::from_frame(event.frame(), descriptor)?);
        }
        Ok(())
    }

    /// Moves up to `store_volume` fed entries into the shifts of their
    /// producers. Entries of producers without a shift stay fed.
    pub fn transfer_feeds(&mut self) -> usize {
        self.transfer_feeds_up_to(self.store_volume)
    }

    /// Moves up to `volume` fed entries into the shifts of their producers.
    pub fn transfer_feeds_up_to(&mut self, volume: usize) -> usize {
        let shifts = &self.shifts;
        let moved = self
            .feed_bank
            .take(volume, |state| shifts.contains_key(&state.key.source));
        let count = moved.len();
        for state in moved {
            if let Some(shift) = self.shifts.get_mut(&state.key.source) {
                shift.insert(state);
            }
        }
        count
    }

    /// Persists up to `store_volume` profile entries.
    pub fn store_profiles(&mut self) -> usize {
        let report = self.profile_bank.drain_into(&mut self.store, self.store_volume);
        report.delivered
    }

    fn handle_cache_reset(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let reset: CacheReset = event.data()?;
        let source = event.source();
        let dest = event.dest();
        let Some(shift) = self.shifts.get_mut(&source) else {
            error!(
                source = %ctx.locations().uname_of(source),
                msg_type = reset.msg_type,
                "cache reset from location without shift"
            );
            return Ok(());
        };
        let removed = shift.bank_mut().remove_type(reset.msg_type);
        let unfed = self
            .feed_bank
            .take(usize::MAX, |state| state.msg_type == reset.msg_type && state.key.source == source)
            .len();
        let superseded = self.shifts.get_mut(&dest).map_or(0, |shift| {
            shift
                .bank_mut()
                .supersede_type(reset.msg_type, |key| key.dest == source)
        });
        info!(
            source = %ctx.locations().uname_of(source),
            dest = %ctx.locations().uname_of(dest),
            msg_type = reset.msg_type,
            removed = removed + unfed,
            superseded,
            "cache reset"
        );
        Ok(())
    }

    // ─── Replay ─────────────────────────────────────────────────────────────

    fn handle_request_cached(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let requester = event.source();
        if !self.live.contains(&requester) {
            error!(location = %ctx.locations().uname_of(requester), "cache request from unregistered location");
            return Ok(());
        }
        // Entries fed before the request belong to the replay.
        if let Some(shift) = self.shifts.get_mut(&requester) {
            for state in self.feed_bank.take(usize::MAX, |state| state.key.source == requester) {
                shift.insert(state);
            }
        }
        self.pending.entry(requester).or_insert(None);
        self.serve_pending(ctx)
    }

    /// Continues every replay in progress within one `store_volume` budget.
    fn serve_pending(&mut self, ctx: &mut ProcessContext) -> Result<(), BusError> {
        let mut budget = self.store_volume;
        let requesters: Vec<u32> = self.pending.keys().copied().collect();
        for requester in requesters {
            if budget == 0 {
                break;
            }
            if let Some(shift) = self.shifts.get_mut(&requester) {
                if !shift.is_empty() {
                    let writer = ctx.writer(requester)?;
                    let report = shift.bank_mut().drain_sorted_into(writer, budget);
                    budget = budget.saturating_sub(spent(&report));
                    if !report.is_complete() || budget == 0 {
                        continue;
                    }
                }
            }
            let mut bank = match self.pending.remove(&requester) {
                Some(Some(bank)) => bank,
                Some(None) => self.bootstrap_bank(ctx, requester),
                None => continue,
            };
            let writer = match ctx.writer(requester) {
                Ok(writer) => writer,
                Err(e) => {
                    self.pending.insert(requester, Some(bank));
                    return Err(e);
                }
            };
            let report = bank.drain_sorted_into(writer, budget);
            budget = budget.saturating_sub(spent(&report));
            debug!(
                dest = format_args!("{requester:08x}"),
                profiles = report.delivered,
                remaining = report.remaining,
                "bootstrap sent"
            );
            if !report.is_complete() {
                self.pending.insert(requester, Some(bank));
                continue;
            }
            let now = ctx.now();
            let master = ctx.master_uid();
            ctx.writer(master)?.write(now, &RequestCachedDone { dest_id: requester })?;
            info!(location = %ctx.locations().uname_of(requester), "cache replayed");
        }
        Ok(())
    }

    /// Stored profiles, overlaid with the ones not yet persisted, keyed for
    /// `requester`.
    fn bootstrap_bank(&self, ctx: &ProcessContext, requester: u32) -> StateBank {
        let home = ctx.home_uid();
        let now = ctx.now();
        let mut bank = StateBank::new().with_retry_limit(self.retry_limit);
        for descriptor in ctx.registry().profile_types() {
            let Some(payloads) = self.store.get_all_with_retry(descriptor, self.retry_limit) else {
                continue;
            };
            for payload in payloads {
                let instance = match descriptor.instance_key(&payload) {
                    Ok(instance) => instance,
                    Err(e) => {
                        warn!(type_name = descriptor.type_name, error = %e, "stored profile skipped");
                        continue;
                    }
                };
                bank.insert(RawState {
                    msg_type: descriptor.tag,
                    key: StateKey::new(home, requester, instance),
                    update_time: now,
                    payload: Bytes::from(payload),
                });
            }
        }
        for state in self.profile_bank.iter() {
            let mut state = state.clone();
            state.key = StateKey::new(home, requester, state.key.instance);
            bank.insert(state);
        }
        bank
    }
}

/// Budget consumed by one drain.
fn spent(report: &DrainReport) -> usize {
    report.delivered + report.superseded + report.failed
}

impl Reactor for CacheD {
    fn install(bus: &mut EventBus<Self>, ctx: &ProcessContext) {
        let master = ctx.master_uid();
        let home = ctx.home_uid();
        bus.on(EventFilter::record::<Register>().from_source(master), |d: &mut CacheD, ctx, e| {
            d.handle_register(ctx, e)
        });
        bus.on(EventFilter::record::<Deregister>().from_source(master), |d: &mut CacheD, ctx, e| {
            d.handle_deregister(ctx, e)
        });
        bus.on(EventFilter::record::<Channel>().from_source(master), |d: &mut CacheD, ctx, e| {
            d.handle_channel(ctx, e)
        });
        bus.on(EventFilter::record::<Location>().from_source(master), |d: &mut CacheD, ctx, e| {
            d.handle_location(ctx, e)
        });
        bus.on(EventFilter::record::<RequestCached>().to_dest(home), |d: &mut CacheD, ctx, e| {
            d.handle_request_cached(ctx, e)
        });
        bus.on(EventFilter::record::<CacheReset>(), |d: &mut CacheD, ctx, e| {
            if e.source() == ctx.master_uid() {
                return Ok(());
            }
            d.handle_cache_reset(ctx, e)
        });
        bus.on(EventFilter::any(), |d: &mut CacheD, ctx, e| d.feed(ctx, e));
    }

    fn on_tick(&mut self, ctx: &mut ProcessContext, _now: i64) -> Result<(), BusError> {
        self.transfer_feeds();
        self.store_profiles();
        self.serve_pending(ctx)
    }

    fn on_notice(&mut self, _ctx: &mut ProcessContext, _notice: &Notice) -> Result<(), BusError> {
        self.transfer_feeds_up_to(LOW_LATENCY_STORE_VOLUME);
        Ok(())
    }
}
