//! A process that registers with the master and negotiates channels.
//!
//! [`Apprentice`] drives a [`Reactor`] on its own [`EventBus`]. On top of
//! the reactor's handlers it installs the session protocol: it tracks
//! locations, registrations and channels announced by the master, opens a
//! writer when a channel from home is authorized and joins the journal when
//! a channel into home is.

use super::context::ProcessContext;
use super::event_bus::{Event, EventBus, EventFilter, PROTOCOL_PRIORITY, Reactor, StepReport};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::journal::{Location, Locator, PUBLIC_DEST};
use crate::notify::{Observer, Publisher};
use crate::types::{
    CacheReset, Channel, ChannelRequest, Deregister, Record, Register, RequestCached,
    RequestCachedDone, TradingDay,
};
use crate::utils::now_in_nano;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A registered participant of the bus.
#[derive(Debug)]
pub struct Apprentice<R: Reactor> {
    ctx: ProcessContext,
    bus: EventBus<R>,
    reactor: R,
    session_id: Uuid,
    started: bool,
}

impl<R: Reactor> Apprentice<R> {
    /// Creates the apprentice of `location` driving `reactor`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] for an invalid configuration or a uid
    /// collision with a system location.
    pub fn new(locator: Arc<Locator>, location: Location, config: BusConfig, reactor: R) -> Result<Self, BusError> {
        let ctx = ProcessContext::new(locator, location, config)?;
        let mut bus = EventBus::new(ctx.config());
        install_protocol(&mut bus, &ctx);
        R::install(&mut bus, &ctx);
        Ok(Self {
            ctx,
            bus,
            reactor,
            session_id: Uuid::new_v4(),
            started: false,
        })
    }

    /// Attaches `publisher` to every writer opened from now on.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.ctx = self.ctx.with_publisher(publisher);
        self
    }

    /// Polls `observer` on every step.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.bus.set_observer(observer);
        self
    }

    pub fn ctx(&self) -> &ProcessContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut ProcessContext {
        &mut self.ctx
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    pub fn reactor_mut(&mut self) -> &mut R {
        &mut self.reactor
    }

    pub fn bus_mut(&mut self) -> &mut EventBus<R> {
        &mut self.bus
    }

    pub fn home_uid(&self) -> u32 {
        self.ctx.home_uid()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Whether the master has announced this session.
    pub fn is_registered(&self) -> bool {
        self.ctx.is_registered()
    }

    /// Joins the master's journals and sends `Register`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Journal`] if a journal cannot be mapped.
    pub fn start(&mut self) -> Result<(), BusError> {
        if self.started {
            return Ok(());
        }
        let now = now_in_nano();
        self.ctx.set_now(now);
        let home = self.ctx.home_uid();
        let master = self.ctx.master_uid();
        let cached = self.ctx.cached_uid();
        self.ctx.join(master, PUBLIC_DEST, now)?;
        self.ctx.join(master, home, now)?;
        if cached != home {
            self.ctx.join(cached, home, now)?;
        }

        let register = Register {
            location: self.ctx.home().as_ref().clone(),
            session_id: self.session_id,
            pid: std::process::id(),
            checkin_time: now,
        };
        self.ctx.writer(master)?.write(now, &register)?;
        self.started = true;
        info!(home = %self.ctx.home().uname, session = %self.session_id, "apprentice started");
        Ok(())
    }

    /// Runs one loop step with the wall clock.
    pub fn step(&mut self) -> StepReport {
        self.step_at(now_in_nano())
    }

    /// Runs one loop step at `now`.
    pub fn step_at(&mut self, now: i64) -> StepReport {
        self.bus.step_at(&mut self.reactor, &mut self.ctx, now)
    }

    /// Asks the master for the `source -> dest` channel. Home must be one
    /// of its endpoints; the channel is authorized once both have asked.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidInstruction`] if home is neither
    /// endpoint, or [`BusError::Journal`] if the request cannot be written.
    pub fn request_channel(&mut self, source: u32, dest: u32) -> Result<(), BusError> {
        let home = self.ctx.home_uid();
        if source != home && dest != home {
            return Err(BusError::InvalidInstruction(format!(
                "channel {source:08x} -> {dest:08x} does not involve {home:08x}"
            )));
        }
        let master = self.ctx.master_uid();
        let now = self.ctx.now();
        self.ctx.writer(master)?.write(
            now,
            &ChannelRequest {
                source_id: source,
                dest_id: dest,
            },
        )?;
        debug!(source = format_args!("{source:08x}"), dest = format_args!("{dest:08x}"), "channel requested");
        Ok(())
    }

    /// Requests the channel from home to `dest`.
    ///
    /// # Errors
    ///
    /// See [`Apprentice::request_channel`].
    pub fn connect(&mut self, dest: u32) -> Result<(), BusError> {
        self.request_channel(self.ctx.home_uid(), dest)
    }

    /// Requests the channel from `source` into home.
    ///
    /// # Errors
    ///
    /// See [`Apprentice::request_channel`].
    pub fn accept(&mut self, source: u32) -> Result<(), BusError> {
        self.request_channel(source, self.ctx.home_uid())
    }

    /// Writes `record` to `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ChannelNotAuthorized`] without a channel to
    /// `dest`, or [`BusError::Journal`] if the write fails.
    pub fn write<T: Record>(&mut self, dest: u32, record: &T) -> Result<u64, BusError> {
        let now = self.ctx.now();
        Ok(self.ctx.writer(dest)?.write(now, record)?)
    }

    /// Writes `record` to `dest` now if allowed, otherwise as soon as the
    /// channel from home to `dest` is authorized.
    ///
    /// Returns whether the record was written immediately.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Journal`] if an immediate write fails.
    pub fn write_when_authorized<T: Record>(&mut self, dest: u32, record: T) -> Result<bool, BusError> {
        if self.ctx.may_write(dest) {
            self.write(dest, &record)?;
            return Ok(true);
        }
        let home = self.ctx.home_uid();
        let filter = EventFilter::record::<Channel>()
            .from_source(self.ctx.master_uid())
            .when(move |event| {
                event
                    .data::<Channel>()
                    .is_ok_and(|channel| channel.source_id == home && channel.dest_id == dest)
            });
        self.bus.once(filter, move |_: &mut R, ctx: &mut ProcessContext, event: &Event| {
            let trigger = event.gen_time();
            ctx.writer(dest)?.write(trigger, &record)?;
            Ok(())
        });
        debug!(dest = format_args!("{dest:08x}"), msg_type = T::TAG, "write deferred until authorized");
        Ok(false)
    }

    /// Asks the cache daemon to replay state into home.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Journal`] if the request cannot be written.
    pub fn request_cached(&mut self) -> Result<u64, BusError> {
        self.ctx.set_cached_ready(false);
        let cached = self.ctx.cached_uid();
        self.write(cached, &RequestCached {})
    }

    /// Tells the cache daemon to forget `msg_type` entries home sent to
    /// `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidInstruction`] for an unknown type, or the
    /// errors of [`Apprentice::write`].
    pub fn reset_cache(&mut self, dest: u32, msg_type: i32) -> Result<u64, BusError> {
        if self.ctx.registry().get(msg_type).is_none() {
            return Err(BusError::InvalidInstruction(format!("unknown record type {msg_type}")));
        }
        self.write(dest, &CacheReset { msg_type })
    }

    /// Runs one text command and returns its reply.
    ///
    /// Commands: `status`, `connect <uid|uname>`, `accept <uid|uname>`,
    /// `request_cached`, `reset <uid|uname> <msg_type>`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidInstruction`] for an unknown command, a
    /// wrong argument count or an unresolvable argument.
    pub fn interact(&mut self, line: &str) -> Result<String, BusError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            return Err(BusError::InvalidInstruction("empty command".to_string()));
        };
        let expected = match command {
            "status" | "request_cached" => 0,
            "connect" | "accept" => 1,
            "reset" => 2,
            other => return Err(BusError::InvalidInstruction(format!("unknown command {other}"))),
        };
        if args.len() != expected {
            return Err(BusError::InvalidInstruction(format!(
                "{command} expects {expected} argument(s), got {}",
                args.len()
            )));
        }
        match command {
            "status" => Ok(format!(
                "{} registered={} writers={} joined={} cached_ready={}",
                self.ctx.home().uname,
                self.ctx.is_registered(),
                self.ctx.writer_dests().count(),
                self.ctx.reader().joined_count(),
                self.ctx.is_cached_ready()
            )),
            "connect" => {
                let dest = self.resolve(args[0])?;
                self.connect(dest)?;
                Ok(format!("requested {dest:08x}"))
            }
            "accept" => {
                let source = self.resolve(args[0])?;
                self.accept(source)?;
                Ok(format!("accepted {source:08x}"))
            }
            "request_cached" => {
                self.request_cached()?;
                Ok("cache requested".to_string())
            }
            _ => {
                let dest = self.resolve(args[0])?;
                let msg_type = args[1]
                    .parse::<i32>()
                    .map_err(|e| BusError::InvalidInstruction(format!("bad msg_type {}: {e}", args[1])))?;
                self.reset_cache(dest, msg_type)?;
                Ok(format!("reset {msg_type} for {dest:08x}"))
            }
        }
    }

    /// Resolves a uid in hex or a known uname.
    fn resolve(&self, word: &str) -> Result<u32, BusError> {
        if let Some(location) = self.ctx.locations().iter().find(|l| l.uname == word) {
            return Ok(location.uid);
        }
        u32::from_str_radix(word.trim_start_matches("0x"), 16)
            .map_err(|_| BusError::InvalidInstruction(format!("unknown location {word}")))
    }

    /// Sends `Deregister`. Further steps keep draining the journals.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Journal`] if the deregistration cannot be
    /// written.
    pub fn stop(&mut self) -> Result<(), BusError> {
        if !self.started {
            return Ok(());
        }
        let home = self.ctx.home_uid();
        let master = self.ctx.master_uid();
        let now = now_in_nano();
        self.ctx.writer(master)?.write(now, &Deregister { location_uid: home })?;
        self.started = false;
        self.ctx.set_registered(false);
        info!(home = %self.ctx.home().uname, "apprentice stopped");
        Ok(())
    }
}

// ─── Session protocol handlers ──────────────────────────────────────────────

fn install_protocol<R: Reactor>(bus: &mut EventBus<R>, ctx: &ProcessContext) {
    let master = ctx.master_uid();
    bus.on_with_priority(
        PROTOCOL_PRIORITY,
        EventFilter::record::<Location>().from_source(master),
        |_: &mut R, ctx, event| {
            ctx.add_location(event.data::<Location>()?)?;
            Ok(())
        },
    );
    bus.on_with_priority(
        PROTOCOL_PRIORITY,
        EventFilter::record::<Register>().from_source(master),
        |_: &mut R, ctx, event| on_register(ctx, event),
    );
    bus.on_with_priority(
        PROTOCOL_PRIORITY,
        EventFilter::record::<Deregister>().from_source(master),
        |_: &mut R, ctx, event| on_deregister(ctx, event),
    );
    bus.on_with_priority(
        PROTOCOL_PRIORITY,
        EventFilter::record::<Channel>().from_source(master),
        |_: &mut R, ctx, event| on_channel(ctx, event),
    );
    bus.on_with_priority(
        PROTOCOL_PRIORITY,
        EventFilter::record::<RequestCachedDone>().from_source(master),
        |_: &mut R, ctx, event| {
            let done: RequestCachedDone = event.data()?;
            if done.dest_id == ctx.home_uid() {
                ctx.set_cached_ready(true);
                debug!("cache replay complete");
            }
            Ok(())
        },
    );
    bus.on_with_priority(
        PROTOCOL_PRIORITY,
        EventFilter::record::<TradingDay>().from_source(master),
        |_: &mut R, ctx, event| {
            let day: TradingDay = event.data()?;
            ctx.set_trading_day(day.timestamp);
            Ok(())
        },
    );
}

fn on_register(ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
    let register: Register = event.data()?;
    let location = ctx.add_location(register.location)?;
    if location.uid == ctx.home_uid() {
        ctx.set_registered(true);
        info!(home = %location.uname, "registration confirmed");
    }
    Ok(())
}

fn on_deregister(ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
    let deregister: Deregister = event.data()?;
    let uid = deregister.location_uid;
    let home = ctx.home_uid();
    if uid == home {
        ctx.set_registered(false);
        return Ok(());
    }
    ctx.close_writer(uid);
    ctx.reader_mut().disjoin_channel(uid, home);
    ctx.remove_channels_of(uid);
    Ok(())
}

fn on_channel(ctx: &mut ProcessContext, event: &Event) -> Result<(), BusError> {
    let channel: Channel = event.data()?;
    let home = ctx.home_uid();
    ctx.add_channel(channel.source_id, channel.dest_id);
    if channel.source_id == home {
        ctx.open_writer(channel.dest_id)?;
    }
    if channel.dest_id == home {
        if ctx.location(channel.source_id).is_none() {
            warn!(source = format_args!("{:08x}", channel.source_id), "channel from unknown location");
        }
        ctx.join(channel.source_id, home, event.gen_time())?;
    }
    Ok(())
}
