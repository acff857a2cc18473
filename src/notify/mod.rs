//! Out-of-journal notification transport.
//!
//! Journals carry every piece of data. This module only moves wake-up and
//! liveness signals between processes: a writer notifies a [`Publisher`]
//! after closing a frame, and an event loop polls an [`Observer`] for
//! [`Notice`]s without blocking.
//!
//! [`in_process`] builds a pair backed by a bounded crossbeam channel. With
//! the `nats` feature, [`nats`] provides the same traits over NATS.

#[cfg(feature = "nats")]
pub mod nats;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;
use tracing::trace;

/// Capacity of the in-process notice queue.
const IN_PROCESS_CAPACITY: usize = 1024;

/// Errors raised by a notification transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifyError {
    /// The other end of the transport is gone.
    #[error("notification transport disconnected")]
    Disconnected,
    /// Connecting did not complete in time.
    #[error("connect to {address} timed out after {timeout_ms} ms")]
    ConnectTimeout {
        /// Address being connected to.
        address: String,
        /// Elapsed timeout in milliseconds.
        timeout_ms: u64,
    },
    /// A request got no reply in time.
    #[error("request on {subject} timed out")]
    RequestTimeout {
        /// Subject of the request.
        subject: String,
    },
    /// Any other transport failure.
    #[error("notification transport error: {0}")]
    Transport(String),
}

/// A signal delivered outside the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// New data was written somewhere the observer cares about.
    Wake,
    /// A free-form message, e.g. a liveness announcement.
    Message(String),
}

/// Sending side of a notification transport.
pub trait Publisher: Send + Sync {
    /// Sends a wake-up signal.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the transport is unusable.
    fn notify(&self) -> Result<(), NotifyError>;

    /// Sends a message.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the transport is unusable.
    fn publish(&self, message: &str) -> Result<(), NotifyError>;
}

/// Receiving side of a notification transport.
pub trait Observer: Send {
    /// Returns the next pending notice without blocking.
    fn poll(&mut self) -> Option<Notice>;
}

/// Publisher half of an in-process transport.
#[derive(Debug, Clone)]
pub struct InProcessPublisher {
    tx: Sender<Notice>,
}

/// Observer half of an in-process transport.
#[derive(Debug)]
pub struct InProcessObserver {
    rx: Receiver<Notice>,
    disconnected: bool,
}

/// Creates a connected in-process publisher/observer pair.
#[must_use]
pub fn in_process() -> (InProcessPublisher, InProcessObserver) {
    let (tx, rx) = channel::bounded(IN_PROCESS_CAPACITY);
    (
        InProcessPublisher { tx },
        InProcessObserver {
            rx,
            disconnected: false,
        },
    )
}

impl Publisher for InProcessPublisher {
    fn notify(&self) -> Result<(), NotifyError> {
        match self.tx.try_send(Notice::Wake) {
            Ok(()) => Ok(()),
            // a full queue already holds pending wake-ups
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(NotifyError::Disconnected),
        }
    }

    fn publish(&self, message: &str) -> Result<(), NotifyError> {
        match self.tx.try_send(Notice::Message(message.to_string())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(NotifyError::Transport("notice queue full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => Err(NotifyError::Disconnected),
        }
    }
}

impl Observer for InProcessObserver {
    fn poll(&mut self) -> Option<Notice> {
        match self.rx.try_recv() {
            Ok(notice) => Some(notice),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.disconnected {
                    trace!("in-process publisher dropped");
                    self.disconnected = true;
                }
                None
            }
        }
    }
}
