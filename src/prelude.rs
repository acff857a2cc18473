/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 14/10/26
******************************************************************************/

//! Prelude module that re-exports commonly used types and traits.
//!
//! ```rust
//! use journalbus::prelude::*;
//! ```

// Journal
pub use crate::journal::{
    Assemble, AssembleMode, Category, Frame, FrameHeader, JournalError, Layout, Location,
    LocationRegistry, Locator, Mode, PUBLIC_DEST, Reader, Writer, make_instruction_uid,
};

// Records
pub use crate::types::{
    Asset, CacheReset, Channel, ChannelRequest, Commission, Deregister, Instrument, Order,
    OrderInput, OrderStatus, Position, ProfileRecord, Quote, Record, RecordKind, Register,
    RequestCached, RequestCachedDone, Side, Trade, TradingDay, TypeRegistry,
};

// Processes
pub use crate::practice::{
    Apprentice, Event, EventBus, EventFilter, Master, ProcessContext, Reactor, StepReport,
};

// State caching
pub use crate::cache::{CacheD, CacheShift, RawState, State, StateBank, StateKey, StateSink};

// Reference data
pub use crate::profile::{ProfileError, ProfileStore};

// Configuration and errors
pub use crate::config::BusConfig;
pub use crate::error::BusError;
pub use crate::notify::{Notice, Observer, Publisher};
