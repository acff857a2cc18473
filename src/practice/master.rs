//! The coordinator process every apprentice registers with.
//!
//! The master reads the journal each apprentice writes for it, discovered
//! by scanning the locator on every interval tick. It validates and
//! records registrations, negotiates channels and rebroadcasts the outcome
//! on its public journal, which every apprentice reads. A newly registered
//! apprentice also gets a snapshot of known locations, live sessions and
//! authorized channels in the journal the master writes for it.

use super::context::ProcessContext;
use super::event_bus::{Event, EventBus, EventFilter, Reactor, StepReport};
use super::session::{ChannelNegotiator, LivenessTracker};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::journal::{Location, Locator, Mode, PUBLIC_DEST, WILDCARD};
use crate::types::{ChannelRequest, Deregister, Register, RequestCachedDone, TradingDay};
use crate::utils::{NANOSECONDS_PER_DAY, NANOSECONDS_PER_HOUR, now_in_nano};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Start of the trading day containing `now`: the UTC day of `now`
/// shifted forward by `offset_hours`.
#[must_use]
pub fn trading_day_start(now: i64, offset_hours: i64) -> i64 {
    let shifted = now.saturating_add(offset_hours * NANOSECONDS_PER_HOUR);
    shifted.div_euclid(NANOSECONDS_PER_DAY) * NANOSECONDS_PER_DAY
}

/// Bookkeeping of the master.
#[derive(Debug)]
pub struct MasterState {
    liveness: LivenessTracker,
    channels: ChannelNegotiator,
    trading_day: Option<i64>,
    offset_hours: i64,
    started_at: i64,
}

impl MasterState {
    fn new(offset_hours: i64, started_at: i64) -> Self {
        Self {
            liveness: LivenessTracker::new(),
            channels: ChannelNegotiator::new(),
            trading_day: None,
            offset_hours,
            started_at,
        }
    }

    /// Sessions by uid.
    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    /// Channel requests and authorizations.
    pub fn channels(&self) -> &ChannelNegotiator {
        &self.channels
    }

    /// Start of the current trading day, once the first tick rolled it.
    pub fn trading_day(&self) -> Option<i64> {
        self.trading_day
    }

    /// Joins the master-bound journal of every location found under the
    /// locator root. Returns how many journals were newly joined.
    fn discover(&mut self, ctx: &mut ProcessContext) -> Result<usize, BusError> {
        let master_uid = ctx.master_uid();
        let mode = ctx.home().mode;
        let locator = Arc::clone(ctx.locator());
        let mut joined = 0;
        for location in locator.list_locations(WILDCARD, WILDCARD, WILDCARD, mode.as_str())? {
            if location.uid == master_uid || ctx.reader().is_joined(location.uid, master_uid) {
                continue;
            }
            if !locator.list_location_dest(&location)?.contains(&master_uid) {
                continue;
            }
            let uname = location.uname.clone();
            let shared = match ctx.add_location(location) {
                Ok(shared) => shared,
                Err(e) => {
                    error!(location = %uname, error = %e, "discovered location rejected");
                    continue;
                }
            };
            ctx.reader_mut().join(shared, master_uid, self.started_at)?;
            debug!(location = %uname, "discovered");
            joined += 1;
        }
        Ok(joined)
    }

    fn roll_trading_day(&mut self, ctx: &mut ProcessContext, now: i64) -> Result<(), BusError> {
        let day = trading_day_start(now, self.offset_hours);
        if self.trading_day == Some(day) {
            return Ok(());
        }
        self.trading_day = Some(day);
        ctx.set_trading_day(day);
        ctx.writer(PUBLIC_DEST)?.write(now, &TradingDay { timestamp: day })?;
        info!(trading_day = day, "trading day rolled");
        Ok(())
    }

    fn handle_register(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let register: Register = event.data()?;
        let uid = register.location_uid();
        if uid != event.source() || !register.location.is_consistent() {
            return Err(BusError::InvalidInstruction(format!(
                "register of {} sent by {:08x}",
                register.location.uname,
                event.source()
            )));
        }
        let location = ctx.add_location(register.location.clone())?;
        let replaced = self
            .liveness
            .session(uid)
            .is_some_and(|session| session.session_id != register.session_id);
        if !self.liveness.register(&register, Arc::clone(&location)) {
            return Ok(());
        }
        if replaced {
            // Channels of the old session die with it.
            let dropped = self.channels.clear(uid);
            ctx.remove_channels_of(uid);
            ctx.close_writer(uid);
            info!(location = %location.uname, channels = dropped, "session replaced");
        }
        self.send_snapshot(ctx, uid)?;

        let now = ctx.now();
        let public = ctx.writer(PUBLIC_DEST)?;
        public.write(now, location.as_ref())?;
        public.write(now, &register)?;
        Ok(())
    }

    /// Writes what a newcomer needs to know into the journal for `uid`.
    fn send_snapshot(&self, ctx: &mut ProcessContext, uid: u32) -> Result<(), BusError> {
        let locations: Vec<Location> = ctx
            .locations()
            .iter()
            .map(|location| location.as_ref().clone())
            .collect();
        let sessions: Vec<Register> = self
            .liveness
            .sessions()
            .filter(|session| session.location.uid != uid)
            .map(|session| session.to_register())
            .collect();
        let trading_day = self.trading_day;
        let now = ctx.now();

        let writer = ctx.writer(uid)?;
        for location in &locations {
            writer.write(now, location)?;
        }
        for register in &sessions {
            writer.write(now, register)?;
        }
        for channel in self.channels.authorized() {
            writer.write(now, &channel)?;
        }
        if let Some(timestamp) = trading_day {
            writer.write(now, &TradingDay { timestamp })?;
        }
        debug!(
            dest = format_args!("{uid:08x}"),
            locations = locations.len(),
            sessions = sessions.len(),
            "snapshot sent"
        );
        Ok(())
    }

    fn handle_deregister(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let deregister: Deregister = event.data()?;
        let uid = deregister.location_uid;
        if uid != event.source() {
            return Err(BusError::InvalidInstruction(format!(
                "deregister of {uid:08x} sent by {:08x}",
                event.source()
            )));
        }
        if self.liveness.deregister(uid).is_none() {
            error!(location = %ctx.locations().uname_of(uid), "deregister without a live session");
            return Ok(());
        }
        let dropped = self.channels.clear(uid);
        ctx.remove_channels_of(uid);
        ctx.close_writer(uid);
        debug!(uid = format_args!("{uid:08x}"), channels = dropped, "session state cleared");
        let now = ctx.now();
        ctx.writer(PUBLIC_DEST)?.write(now, &deregister)?;
        Ok(())
    }

    fn handle_channel_request(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        let request: ChannelRequest = event.data()?;
        let requester = event.source();
        if !self.liveness.is_registered(requester) {
            error!(
                requester = %ctx.locations().uname_of(requester),
                "channel request from unregistered location"
            );
            return Ok(());
        }
        for uid in [request.source_id, request.dest_id] {
            if !ctx.locations().contains(uid) {
                return Err(BusError::UnknownLocation { uid });
            }
        }
        if let Some(channel) = self.channels.request(request, requester)? {
            ctx.add_channel(channel.source_id, channel.dest_id);
            let now = ctx.now();
            ctx.writer(PUBLIC_DEST)?.write(now, &channel)?;
        }
        Ok(())
    }

    fn handle_cached_done(&mut self, ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
        if event.source() != ctx.cached_uid() {
            return Err(BusError::InvalidInstruction(format!(
                "cache completion sent by {:08x}",
                event.source()
            )));
        }
        let done: RequestCachedDone = event.data()?;
        let now = ctx.now();
        ctx.writer(PUBLIC_DEST)?.write(now, &done)?;
        Ok(())
    }
}

impl Reactor for MasterState {
    fn install(bus: &mut EventBus<Self>, ctx: &ProcessContext) {
        let master = ctx.master_uid();
        bus.on(EventFilter::record::<Register>().to_dest(master), |m: &mut MasterState, ctx, e| {
            m.handle_register(ctx, e)
        });
        bus.on(EventFilter::record::<Deregister>().to_dest(master), |m: &mut MasterState, ctx, e| {
            m.handle_deregister(ctx, e)
        });
        bus.on(EventFilter::record::<ChannelRequest>().to_dest(master), |m: &mut MasterState, ctx, e| {
            m.handle_channel_request(ctx, e)
        });
        bus.on(EventFilter::record::<RequestCachedDone>().to_dest(master), |m: &mut MasterState, ctx, e| {
            m.handle_cached_done(ctx, e)
        });
    }

    fn on_tick(&mut self, ctx: &mut ProcessContext, now: i64) -> Result<(), BusError> {
        self.discover(ctx)?;
        self.roll_trading_day(ctx, now)
    }
}

/// The master process: its context, loop and bookkeeping.
#[derive(Debug)]
pub struct Master {
    ctx: ProcessContext,
    bus: EventBus<MasterState>,
    state: MasterState,
}

impl Master {
    /// Creates the master of `mode` and opens its public journal.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] for an invalid configuration or if the public
    /// journal cannot be mapped.
    pub fn new(locator: Arc<Locator>, mode: Mode, config: BusConfig) -> Result<Self, BusError> {
        let offset_hours = config.trading_day_offset_hours;
        let mut ctx = ProcessContext::new(locator, Location::master(mode), config)?;
        ctx.open_writer(PUBLIC_DEST)?;
        let mut bus = EventBus::new(ctx.config());
        MasterState::install(&mut bus, &ctx);
        info!(home = %ctx.home().uname, "master started");
        Ok(Self {
            ctx,
            bus,
            state: MasterState::new(offset_hours, now_in_nano()),
        })
    }

    /// Context of the master process.
    pub fn ctx(&self) -> &ProcessContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut ProcessContext {
        &mut self.ctx
    }

    /// Sessions and channels the master keeps.
    pub fn state(&self) -> &MasterState {
        &self.state
    }

    /// Uid of the master location.
    pub fn home_uid(&self) -> u32 {
        self.ctx.home_uid()
    }

    /// Runs one loop step with the wall clock.
    pub fn step(&mut self) -> StepReport {
        self.step_at(now_in_nano())
    }

    /// Runs one loop step at `now`.
    pub fn step_at(&mut self, now: i64) -> StepReport {
        self.bus.step_at(&mut self.state, &mut self.ctx, now)
    }
}
