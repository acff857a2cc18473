//! Processes built on the journal: the event loop, the master and the
//! apprentices that register with it.

pub mod apprentice;
pub mod context;
pub mod event_bus;
pub mod master;
pub mod session;

pub use apprentice::Apprentice;
pub use context::ProcessContext;
pub use event_bus::{
    Continuations, DEFAULT_PRIORITY, Event, EventBus, EventFilter, PROTOCOL_PRIORITY, Reactor,
    StepReport,
};
pub use master::{Master, MasterState, trading_day_start};
pub use session::{ChannelNegotiator, ChannelState, Liveness, LivenessTracker, Session};
