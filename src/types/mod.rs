//! Record types carried in frame payloads.
//!
//! Every record type implements [`Record`], which fixes its numeric tag,
//! name and [`RecordKind`]. Payloads are JSON. The [`registry`] enumerates
//! every record type so per-type operations can iterate a table.

pub mod control;
pub mod registry;
pub mod trading;

pub use control::{
    CacheReset, Channel, ChannelRequest, Deregister, Register, RequestCached, RequestCachedDone,
    TradingDay,
};
pub use registry::{RecordDescriptor, TypeRegistry};
pub use trading::{Asset, Commission, Direction, Instrument, Order, OrderInput, OrderStatus, Position, Quote, Side, Trade};

use crate::journal::error::JournalError;
use bitflags::bitflags;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Tag of the marker frame closing a full page.
pub const PAGE_END_TAG: i32 = 10000;

/// Tag of the zero-payload heartbeat frame.
pub const MARK_TAG: i32 = 10001;

bitflags! {
    /// Classification of a record type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordKind: u8 {
        /// Protocol record exchanged with the master.
        const CONTROL = 0b0000_0001;
        /// Market data.
        const MARKET = 0b0000_0010;
        /// Trading data, suppressed by bypass filters.
        const TRADING = 0b0000_0100;
        /// Last-value state cached for reconnecting consumers.
        const STATE = 0b0000_1000;
        /// Durable reference data kept in the profile store.
        const PROFILE = 0b0001_0000;
    }
}

/// A typed frame payload.
pub trait Record: Serialize + DeserializeOwned + Clone + std::fmt::Debug + 'static {
    /// Stable numeric tag.
    const TAG: i32;
    /// Stable type name.
    const TYPE_NAME: &'static str;
    /// Classification flags.
    const KIND: RecordKind;

    /// Distinguishes several live instances between the same pair.
    fn instance_key(&self) -> u64 {
        0
    }

    /// Serializes the record to its payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::SerializationError`] if serialization fails.
    fn encode(&self) -> Result<Vec<u8>, JournalError> {
        serde_json::to_vec(self).map_err(|e| JournalError::SerializationError {
            message: e.to_string(),
        })
    }

    /// Deserializes payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::DeserializationError`] if the bytes are not a
    /// valid encoding of `Self`.
    fn decode(bytes: &[u8]) -> Result<Self, JournalError> {
        serde_json::from_slice(bytes).map_err(|e| JournalError::DeserializationError {
            msg_type: Self::TAG,
            message: e.to_string(),
        })
    }
}

/// A record persisted in the profile store.
pub trait ProfileRecord: Record {
    /// Primary key within the record type.
    fn primary_key(&self) -> String;
}

/// Hashes a composite string key into an instance key.
#[must_use]
pub fn hash_key(parts: &[&str]) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    let low = hasher.finalize();
    let high = crate::utils::hash_str_32(&parts.concat());
    (u64::from(high) << 32) | u64::from(low)
}
