//! Errors of the protocol and daemon layers.

use crate::journal::error::JournalError;
use crate::notify::NotifyError;
use crate::profile::ProfileError;
use thiserror::Error;

/// Errors raised by event handlers, the master, apprentices and the cache
/// daemon.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    /// Journal storage failure.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// Profile store failure.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// Notification transport failure.
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// A writer was requested for a channel that is not authorized yet.
    #[error("channel {source_uid:08x} -> {dest_uid:08x} is not authorized")]
    ChannelNotAuthorized {
        /// Writer side.
        source_uid: u32,
        /// Reader side.
        dest_uid: u32,
    },

    /// A uid is not present in the location registry.
    #[error("unknown location {uid:08x}")]
    UnknownLocation {
        /// The unknown uid.
        uid: u32,
    },

    /// An operation referenced a location without a live session.
    #[error("location {uid:08x} is not registered")]
    NotRegistered {
        /// The unregistered uid.
        uid: u32,
    },

    /// A caller passed a malformed instruction.
    #[error("invalid instruction: {0}")]
    InvalidInstruction(String),

    /// Configuration could not be loaded or is out of range.
    #[error("configuration error: {0}")]
    Config(String),
}
