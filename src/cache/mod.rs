//! Last-value state tracking and the catch-up daemon built on it.
//!
//! [`StateBank`] keeps the most recent [`State`] of each record per
//! `(type, source, dest, instance)`. [`CacheShift`] scopes a bank to one
//! producing location, and [`CacheD`] fills shifts from the journals it
//! reads and replays them to consumers that ask.

pub mod bank;
pub mod cached;
pub mod shift;
pub mod state;

pub use bank::{DrainReport, Delivery, StateBank, StateSink, VecSink};
pub use cached::CacheD;
pub use shift::CacheShift;
pub use state::{RawState, State, StateKey};
