//! Timestamped last-value records held by a [`StateBank`](super::StateBank).

use crate::journal::{Frame, JournalError};
use crate::types::{Record, RecordDescriptor};
use bytes::Bytes;

/// Key of one entry within a type bucket.
///
/// Ordered by source, then dest, then instance, which is the order entries
/// of one bucket are drained in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    /// Producing location uid.
    pub source: u32,
    /// Destination uid.
    pub dest: u32,
    /// Per-instance id (order id, instrument hash, ...), 0 for singletons.
    pub instance: u64,
}

impl StateKey {
    /// Creates a key.
    #[must_use]
    pub fn new(source: u32, dest: u32, instance: u64) -> Self {
        Self {
            source,
            dest,
            instance,
        }
    }
}

/// Type-erased state entry: the encoded most recent value of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawState {
    /// Record type tag.
    pub msg_type: i32,
    /// Bank key.
    pub key: StateKey,
    /// Generation time of the frame that produced the value.
    pub update_time: i64,
    /// Encoded record.
    pub payload: Bytes,
}

impl RawState {
    /// Builds an entry from a journal frame, deriving the instance id
    /// through `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::DeserializationError`] if the payload does
    /// not decode as the descriptor's type.
    pub fn from_frame(frame: &Frame, descriptor: &RecordDescriptor) -> Result<Self, JournalError> {
        let instance = descriptor.instance_key(frame.payload())?;
        Ok(Self {
            msg_type: frame.msg_type(),
            key: StateKey::new(frame.source(), frame.dest(), instance),
            update_time: frame.gen_time(),
            payload: Bytes::copy_from_slice(frame.payload()),
        })
    }

    /// Source uid.
    #[must_use]
    pub fn source(&self) -> u32 {
        self.key.source
    }

    /// Dest uid.
    #[must_use]
    pub fn dest(&self) -> u32 {
        self.key.dest
    }
}

/// Typed view of a state entry.
#[derive(Debug, Clone, PartialEq)]
pub struct State<T> {
    /// Time the value was produced.
    pub update_time: i64,
    /// Producing location uid.
    pub source: u32,
    /// Destination uid.
    pub dest: u32,
    /// The value.
    pub data: T,
}

impl<T: Record> State<T> {
    /// Creates a state entry.
    #[must_use]
    pub fn new(update_time: i64, source: u32, dest: u32, data: T) -> Self {
        Self {
            update_time,
            source,
            dest,
            data,
        }
    }

    /// Bank key of this entry.
    #[must_use]
    pub fn key(&self) -> StateKey {
        StateKey::new(self.source, self.dest, self.data.instance_key())
    }

    /// Encodes into a type-erased entry.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::SerializationError`] if the value cannot be
    /// encoded.
    pub fn to_raw(&self) -> Result<RawState, JournalError> {
        Ok(RawState {
            msg_type: T::TAG,
            key: self.key(),
            update_time: self.update_time,
            payload: Bytes::from(self.data.encode()?),
        })
    }

    /// Decodes a type-erased entry.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::DeserializationError`] if the entry holds
    /// another type or its payload does not decode.
    pub fn from_raw(raw: &RawState) -> Result<Self, JournalError> {
        if raw.msg_type != T::TAG {
            return Err(JournalError::DeserializationError {
                msg_type: raw.msg_type,
                message: format!("expected {} ({})", T::TYPE_NAME, T::TAG),
            });
        }
        Ok(Self {
            update_time: raw.update_time,
            source: raw.key.source,
            dest: raw.key.dest,
            data: T::decode(&raw.payload)?,
        })
    }
}
