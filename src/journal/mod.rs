//! Append-only, memory-mapped journals.
//!
//! Each actor ([`Location`]) owns one journal per destination uid. A journal
//! is a sequence of fixed-size page files holding [`Frame`]s. One
//! [`Writer`] appends to a journal; any number of [`Reader`]s in any
//! process consume it concurrently, merging many journals in generation-time
//! order. [`Assemble`] performs the same merge offline over closed ranges.

pub mod assemble;
pub mod error;
pub mod frame;
pub mod location;
pub mod locator;
pub mod page;
pub mod reader;
pub mod writer;

pub use assemble::{Assemble, AssembleMode, Assembled, CopySink, NullSink, Sink};
pub use error::JournalError;
pub use frame::{FRAME_HEADER_LENGTH, Frame, FrameHeader, make_frame_id};
pub use location::{Category, Location, LocationRegistry, Mode, PUBLIC_DEST};
pub use locator::{Layout, Locator, WILDCARD};
pub use page::{PAGE_HEADER_LENGTH, PageHeader};
pub use reader::Reader;
pub use writer::{Writer, make_instruction_uid};
