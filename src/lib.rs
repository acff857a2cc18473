//! # Memory-Mapped Journal and Event Bus for Multi-Process Trading Systems
//!
//! `journalbus` is the transport and state-synchronization core of a
//! multi-process trading platform. Every process (a *location*) appends
//! typed records to its own memory-mapped journals, reads other processes'
//! journals without locks, and negotiates through a master process who may
//! write to whom. A cache daemon keeps the last value of every state record
//! so that a consumer joining late, or reconnecting, catches up without
//! replaying whole journals.
//!
//! ## Key Features
//!
//! - **Paged Journals**: Append-only files of fixed-size pages. A frame is
//!   published by storing its length last with Release ordering; readers in
//!   any process load it with Acquire and never see a torn frame.
//!
//! - **Time-Ordered Merge**: A [`journal::Reader`] joins any number of
//!   `(location, dest)` journals and returns frames in generation-time order,
//!   breaking ties by join order and then by frame id. Reads never block.
//!
//! - **Historical Assembly**: [`journal::Assemble`] merges every journal
//!   matching a pattern over closed time ranges, with union and chaining.
//!
//! - **Reactive Dispatch**: [`practice::EventBus`] turns merged frames,
//!   interval ticks and external notices into handler calls on one thread,
//!   with a table of one-shot continuations.
//!
//! - **Channel Negotiation**: [`practice::Master`] authorizes a
//!   `source -> dest` channel exactly once, after both ends asked for it.
//!
//! - **State Caching**: [`cache::StateBank`] holds one pending entry per
//!   `(type, source, dest, instance)`; [`cache::CacheD`] replays them on
//!   request, a capped number per tick.
//!
//! - **Reference Data**: [`profile::ProfileStore`] keeps durable, keyed
//!   records in checksummed JSON files.
//!
//! ## Journal Layout
//!
//! ```text
//! <root>/<category>/<group>/<name>/journal/<mode>/<dest:08x>.<page_id>.journal
//! ```
//!
//! Every page starts with a 32 byte header followed by 8-byte aligned
//! frames. Each frame has a 48 byte little-endian header:
//!
//! | Offset | Field            | Type |
//! |--------|------------------|------|
//! | 0      | `frame_length`   | u32  |
//! | 4      | `payload_length` | u32  |
//! | 8      | `gen_time`       | i64  |
//! | 16     | `trigger_time`   | i64  |
//! | 24     | `msg_type`       | i32  |
//! | 28     | `source`         | u32  |
//! | 32     | `dest`           | u32  |
//! | 36     | `checksum`       | u32  |
//! | 40     | `frame_id`       | u64  |
//!
//! Payloads are JSON-encoded [`types::Record`]s, identified by a stable
//! numeric tag listed in [`types::TypeRegistry`].
//!
//! ## Session Protocol
//!
//! 1. An apprentice writes `Register` into the journal it keeps for the
//!    master. The master discovers that journal on its next interval tick,
//!    checks the uid for collisions and announces `Location` and `Register`
//!    on its public journal.
//! 2. Both ends of a channel send `ChannelRequest`. The master then
//!    broadcasts `Channel` once; the source opens its writer and the dest
//!    joins the journal.
//! 3. A consumer sends `RequestCached` to the cache daemon, which replays the
//!    consumer's shift and the profile bootstrap data, then acknowledges
//!    with `RequestCachedDone`.
//! 4. `Deregister` ends a session and clears its channels and shift.
//!
//! ## Example
//!
//! ```rust,no_run
//! use journalbus::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), BusError> {
//! let locator = Arc::new(Locator::new(std::env::temp_dir().join("journalbus-doc")));
//! let feed = Arc::new(Location::new(Mode::Live, Category::Md, "sim", "feed"));
//!
//! let mut writer = Writer::open(Arc::clone(&locator), Arc::clone(&feed), PUBLIC_DEST, 1 << 20)?;
//! let quote = Quote {
//!     instrument_id: "rb2501".to_string(),
//!     exchange_id: "SHFE".to_string(),
//!     last_price: 3500.0,
//!     bid_price: 3499.0,
//!     ask_price: 3501.0,
//!     volume: 10,
//!     data_time: 0,
//! };
//! writer.write(0, &quote)?;
//!
//! let mut reader = Reader::new(locator);
//! reader.join(feed, PUBLIC_DEST, 0)?;
//! while let Some(frame) = reader.next() {
//!     let quote: Quote = frame.data()?;
//!     println!("{} @ {}", quote.instrument_id, quote.last_price);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `nats`: a NATS publish/subscribe and request/reply transport for
//!   cross-process wake-up notices.
//! - `metrics`: counters for frames written and read, cache entries drained
//!   and channels authorized.
//!
//! ## Logging
//!
//! The crate logs through `tracing` and never installs a subscriber.

pub mod cache;
pub mod config;
pub mod error;
pub mod journal;
pub mod notify;
pub mod practice;
pub mod prelude;
pub mod profile;
pub mod types;
pub mod utils;

pub use config::BusConfig;
pub use error::BusError;
pub use journal::{JournalError, Location, Locator, Reader, Writer};
