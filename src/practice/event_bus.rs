//! Single-threaded reactive dispatch loop.
//!
//! One [`EventBus::step_at`] call polls external notices, fires the
//! interval tick when due, then pulls up to `frames_per_step` frames from
//! the context's reader and dispatches each to the registered handlers in
//! priority order, followed by any one-shot continuation the frame
//! satisfies. Handlers run to completion before the next frame; an error
//! from a handler is logged and dispatch carries on.

use super::context::ProcessContext;
use crate::config::BusConfig;
use crate::error::BusError;
use crate::journal::{Category, Frame, JournalError, Location};
use crate::notify::{Notice, Observer};
use crate::types::{Record, RecordKind, TypeRegistry};
use crate::utils::now_in_nano;
use std::sync::Arc;
use tracing::{error, trace};

/// Priority of the session protocol handlers. Lower values run first.
pub const PROTOCOL_PRIORITY: i32 = -100;

/// Default handler priority.
pub const DEFAULT_PRIORITY: i32 = 0;

/// One frame as seen by handlers, together with the journal it came from.
#[derive(Debug, Clone)]
pub struct Event {
    frame: Frame,
    origin: Arc<Location>,
    journal_dest: u32,
}

impl Event {
    /// Wraps a frame read from the `(origin, journal_dest)` journal.
    #[must_use]
    pub fn new(frame: Frame, origin: Arc<Location>, journal_dest: u32) -> Self {
        Self {
            frame,
            origin,
            journal_dest,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Owner of the journal the frame was read from.
    pub fn origin(&self) -> &Arc<Location> {
        &self.origin
    }

    /// Dest of the journal the frame was read from.
    pub fn journal_dest(&self) -> u32 {
        self.journal_dest
    }

    pub fn msg_type(&self) -> i32 {
        self.frame.msg_type()
    }

    pub fn source(&self) -> u32 {
        self.frame.source()
    }

    pub fn dest(&self) -> u32 {
        self.frame.dest()
    }

    pub fn gen_time(&self) -> i64 {
        self.frame.gen_time()
    }

    pub fn trigger_time(&self) -> i64 {
        self.frame.trigger_time()
    }

    /// Whether the frame carries an `R`.
    pub fn is<R: Record>(&self) -> bool {
        self.frame.is::<R>()
    }

    /// Decodes the payload as `R`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::DeserializationError`] on a tag mismatch or
    /// undecodable payload.
    pub fn data<R: Record>(&self) -> Result<R, JournalError> {
        self.frame.data::<R>()
    }
}

type Predicate = Box<dyn Fn(&Event) -> bool>;

/// Selects the events a handler or continuation sees.
///
/// Every configured criterion must hold. An empty filter matches all
/// events.
#[derive(Default)]
pub struct EventFilter {
    tags: Vec<i32>,
    source: Option<u32>,
    dest: Option<u32>,
    category: Option<Category>,
    bypass_trading: bool,
    predicate: Option<Predicate>,
}

impl EventFilter {
    /// Matches every event.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches events tagged `tag`.
    #[must_use]
    pub fn tag(tag: i32) -> Self {
        Self::any().or_tag(tag)
    }

    /// Matches events carrying an `R`.
    #[must_use]
    pub fn record<R: Record>() -> Self {
        Self::tag(R::TAG)
    }

    /// Also accepts `tag`.
    #[must_use]
    pub fn or_tag(mut self, tag: i32) -> Self {
        self.tags.push(tag);
        self
    }

    /// Only frames whose header source is `uid`.
    #[must_use]
    pub fn from_source(mut self, uid: u32) -> Self {
        self.source = Some(uid);
        self
    }

    /// Only frames whose header dest is `uid`.
    #[must_use]
    pub fn to_dest(mut self, uid: u32) -> Self {
        self.dest = Some(uid);
        self
    }

    /// Only frames read from journals of locations in `category`.
    #[must_use]
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Rejects every trading-data record type.
    #[must_use]
    pub fn bypass_trading(mut self) -> Self {
        self.bypass_trading = true;
        self
    }

    /// Adds a custom condition.
    #[must_use]
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Whether `event` passes the filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.tags.is_empty() && !self.tags.contains(&event.msg_type()) {
            return false;
        }
        if self.source.is_some_and(|uid| uid != event.source()) {
            return false;
        }
        if self.dest.is_some_and(|uid| uid != event.dest()) {
            return false;
        }
        if self.category.is_some_and(|c| c != event.origin().category) {
            return false;
        }
        if self.bypass_trading && is_trading_type(event.msg_type()) {
            return false;
        }
        self.predicate.as_ref().is_none_or(|predicate| predicate(event))
    }
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilter")
            .field("tags", &self.tags)
            .field("source", &self.source)
            .field("dest", &self.dest)
            .field("category", &self.category)
            .field("bypass_trading", &self.bypass_trading)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

fn is_trading_type(tag: i32) -> bool {
    TypeRegistry::global()
        .get(tag)
        .is_some_and(|descriptor| descriptor.kind.contains(RecordKind::TRADING))
}

/// Long-lived frame handler.
pub type HandlerFn<R> = Box<dyn FnMut(&mut R, &mut ProcessContext, &Event) -> Result<(), BusError>>;

/// One-shot frame handler.
pub type ContinuationFn<R> = Box<dyn FnOnce(&mut R, &mut ProcessContext, &Event) -> Result<(), BusError>>;

struct Handler<R> {
    priority: i32,
    filter: EventFilter,
    callback: HandlerFn<R>,
}

struct Continuation<R> {
    id: u64,
    filter: EventFilter,
    callback: ContinuationFn<R>,
}

/// Pending "resume on the first matching event" callbacks.
pub struct Continuations<R> {
    pending: Vec<Continuation<R>>,
    next_id: u64,
}

impl<R> Default for Continuations<R> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            next_id: 1,
        }
    }
}

impl<R> Continuations<R> {
    /// Registers `callback` to run once, on the first event matching
    /// `filter`. Returns an id usable with [`Continuations::cancel`].
    pub fn once<F>(&mut self, filter: EventFilter, callback: F) -> u64
    where
        F: FnOnce(&mut R, &mut ProcessContext, &Event) -> Result<(), BusError> + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push(Continuation {
            id,
            filter,
            callback: Box::new(callback),
        });
        id
    }

    /// Drops a pending continuation. Returns whether it was pending.
    pub fn cancel(&mut self, id: u64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|c| c.id != id);
        before != self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Runs and removes every continuation `event` satisfies, in
    /// registration order. Returns `(fired, errors)`.
    fn fire(&mut self, reactor: &mut R, ctx: &mut ProcessContext, event: &Event) -> (usize, usize) {
        if self.pending.is_empty() {
            return (0, 0);
        }
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|c| c.filter.matches(event));
        self.pending = waiting;

        let mut errors = 0;
        let fired = ready.len();
        for continuation in ready {
            if let Err(e) = (continuation.callback)(reactor, ctx, event) {
                error!(id = continuation.id, msg_type = event.msg_type(), error = %e, "continuation failed");
                errors += 1;
            }
        }
        (fired, errors)
    }
}

impl<R> std::fmt::Debug for Continuations<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuations")
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// State and callbacks driven by an [`EventBus`].
pub trait Reactor: Sized + 'static {
    /// Registers the reactor's frame handlers.
    fn install(_bus: &mut EventBus<Self>, _ctx: &ProcessContext) {}

    /// Interval tick.
    ///
    /// # Errors
    ///
    /// Errors are logged by the loop.
    fn on_tick(&mut self, _ctx: &mut ProcessContext, _now: i64) -> Result<(), BusError> {
        Ok(())
    }

    /// External notification.
    ///
    /// # Errors
    ///
    /// Errors are logged by the loop.
    fn on_notice(&mut self, _ctx: &mut ProcessContext, _notice: &Notice) -> Result<(), BusError> {
        Ok(())
    }
}

/// A reactor with no state of its own.
impl Reactor for () {}

/// What one loop step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Frames pulled from the reader.
    pub frames: usize,
    /// Handler invocations.
    pub dispatched: usize,
    /// Continuations fired.
    pub continuations: usize,
    /// Notices polled.
    pub notices: usize,
    /// Whether the interval tick fired.
    pub ticked: bool,
    /// Handler, continuation and tick errors.
    pub errors: usize,
}

impl StepReport {
    /// Whether the step found nothing to do.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.frames == 0 && self.notices == 0 && !self.ticked
    }
}

/// The dispatch loop of one process.
pub struct EventBus<R> {
    handlers: Vec<Handler<R>>,
    continuations: Continuations<R>,
    observer: Option<Box<dyn Observer>>,
    interval_ns: i64,
    next_tick: Option<i64>,
    frames_per_step: usize,
}

impl<R: Reactor> EventBus<R> {
    /// Creates a loop with the interval and frame budget of `config`.
    #[must_use]
    pub fn new(config: &BusConfig) -> Self {
        Self {
            handlers: Vec::new(),
            continuations: Continuations::default(),
            observer: None,
            interval_ns: config.interval_ns,
            next_tick: None,
            frames_per_step: config.frames_per_step,
        }
    }

    /// Polls `observer` for notices on every step.
    pub fn set_observer(&mut self, observer: Box<dyn Observer>) {
        self.observer = Some(observer);
    }

    /// Registers a handler with the default priority.
    pub fn on<F>(&mut self, filter: EventFilter, callback: F)
    where
        F: FnMut(&mut R, &mut ProcessContext, &Event) -> Result<(), BusError> + 'static,
    {
        self.on_with_priority(DEFAULT_PRIORITY, filter, callback);
    }

    /// Registers a handler. Lower priorities run first; equal priorities
    /// run in registration order.
    pub fn on_with_priority<F>(&mut self, priority: i32, filter: EventFilter, callback: F)
    where
        F: FnMut(&mut R, &mut ProcessContext, &Event) -> Result<(), BusError> + 'static,
    {
        let index = self.handlers.partition_point(|h| h.priority <= priority);
        self.handlers.insert(
            index,
            Handler {
                priority,
                filter,
                callback: Box::new(callback),
            },
        );
    }

    /// Registers a one-shot continuation. See [`Continuations::once`].
    pub fn once<F>(&mut self, filter: EventFilter, callback: F) -> u64
    where
        F: FnOnce(&mut R, &mut ProcessContext, &Event) -> Result<(), BusError> + 'static,
    {
        self.continuations.once(filter, callback)
    }

    pub fn continuations(&self) -> &Continuations<R> {
        &self.continuations
    }

    pub fn continuations_mut(&mut self) -> &mut Continuations<R> {
        &mut self.continuations
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// [`EventBus::step_at`] with the wall clock.
    pub fn step(&mut self, reactor: &mut R, ctx: &mut ProcessContext) -> StepReport {
        self.step_at(reactor, ctx, now_in_nano())
    }

    /// Runs one loop step at time `now`.
    pub fn step_at(&mut self, reactor: &mut R, ctx: &mut ProcessContext, now: i64) -> StepReport {
        let mut report = StepReport::default();
        ctx.set_now(now);

        if let Some(observer) = self.observer.as_mut() {
            while let Some(notice) = observer.poll() {
                report.notices += 1;
                if let Err(e) = reactor.on_notice(ctx, &notice) {
                    error!(error = %e, "notice handler failed");
                    report.errors += 1;
                }
            }
        }

        if self.next_tick.is_none_or(|due| now >= due) {
            report.ticked = true;
            self.next_tick = Some(now.saturating_add(self.interval_ns));
            if let Err(e) = reactor.on_tick(ctx, now) {
                error!(error = %e, "tick handler failed");
                report.errors += 1;
            }
        }

        while report.frames < self.frames_per_step {
            let Some((frame, origin, journal_dest)) = ctx.reader_mut().next_with_origin() else {
                break;
            };
            report.frames += 1;
            let event = Event::new(frame, origin, journal_dest);
            self.dispatch(reactor, ctx, &event, &mut report);
        }

        if !report.is_idle() {
            trace!(
                frames = report.frames,
                dispatched = report.dispatched,
                continuations = report.continuations,
                "step"
            );
        }
        report
    }

    fn dispatch(&mut self, reactor: &mut R, ctx: &mut ProcessContext, event: &Event, report: &mut StepReport) {
        for handler in &mut self.handlers {
            if !handler.filter.matches(event) {
                continue;
            }
            report.dispatched += 1;
            if let Err(e) = (handler.callback)(reactor, ctx, event) {
                error!(
                    msg_type = event.msg_type(),
                    source = format_args!("{:08x}", event.source()),
                    error = %e,
                    "handler failed"
                );
                report.errors += 1;
            }
        }
        let (fired, errors) = self.continuations.fire(reactor, ctx, event);
        report.continuations += fired;
        report.errors += errors;
    }
}

impl<R> std::fmt::Debug for EventBus<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .field("continuations", &self.continuations.len())
            .field("interval_ns", &self.interval_ns)
            .field("frames_per_step", &self.frames_per_step)
            .finish()
    }
}
