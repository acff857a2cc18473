//! NATS notification transport.
//!
//! [`NatsPublisher`] sends wake-ups and messages to one subject;
//! [`NatsObserver`] forwards messages from a subscription into a local
//! queue that the event loop polls. [`NatsPublisher::request`] and
//! [`NatsPublisher::serve_replies`] cover the request/reply pattern.
//!
//! Publishing never blocks the caller: the publish is spawned onto the Tokio
//! runtime and retried with exponential backoff. Only connect and request
//! wait, each bounded by a timeout.
//!
//! # Feature Gate
//!
//! This module is only available when the `nats` feature is enabled.

use super::{Notice, NotifyError, Observer, Publisher};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, TryRecvError, TrySendError};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Default maximum number of retry attempts for transient publish failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay in milliseconds for exponential backoff between retries.
const BASE_RETRY_DELAY_MS: u64 = 10;

/// Payload of a wake-up notification.
const WAKE_PAYLOAD: &[u8] = b"";

/// Capacity of the observer's local queue.
const OBSERVER_CAPACITY: usize = 1024;

/// Connects to a NATS server, failing after `timeout`.
///
/// Must be called from outside the runtime's worker threads.
///
/// # Errors
///
/// Returns [`NotifyError::ConnectTimeout`] or [`NotifyError::Transport`].
pub fn connect(
    address: &str,
    timeout: Duration,
    runtime: &tokio::runtime::Handle,
) -> Result<async_nats::Client, NotifyError> {
    let attempt = runtime.block_on(tokio::time::timeout(timeout, async_nats::connect(address)));
    match attempt {
        Ok(Ok(client)) => {
            debug!(address, "connected to NATS");
            Ok(client)
        }
        Ok(Err(e)) => Err(NotifyError::Transport(e.to_string())),
        Err(_) => Err(NotifyError::ConnectTimeout {
            address: address.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Publishes notices to one NATS subject.
pub struct NatsPublisher {
    client: async_nats::Client,
    subject: String,
    runtime: tokio::runtime::Handle,
    publish_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    max_retries: u32,
}

impl NatsPublisher {
    /// Creates a publisher for `subject`.
    #[inline]
    pub fn new(client: async_nats::Client, subject: String, runtime: tokio::runtime::Handle) -> Self {
        Self {
            client,
            subject,
            runtime,
            publish_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets the maximum number of retry attempts. Zero disables retries.
    #[must_use = "builders do nothing unless consumed"]
    #[inline]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Number of successfully published messages.
    #[must_use]
    #[inline]
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }

    /// Number of messages dropped after all retries.
    #[must_use]
    #[inline]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    fn spawn_publish(&self, payload: Bytes) {
        let client = self.client.clone();
        let subject = self.subject.clone();
        let max_attempts = self.max_retries.saturating_add(1);
        let publish_count = Arc::clone(&self.publish_count);
        let error_count = Arc::clone(&self.error_count);

        self.runtime.spawn(async move {
            for attempt in 0..max_attempts {
                match client.publish(subject.clone(), payload.clone()).await {
                    Ok(()) => {
                        publish_count.fetch_add(1, Ordering::Relaxed);
                        trace!(subject = %subject, "notice published to NATS");
                        return;
                    }
                    Err(e) => {
                        warn!(
                            attempt = attempt + 1,
                            max = max_attempts,
                            subject = %subject,
                            error = %e,
                            "NATS publish failed, retrying"
                        );
                    }
                }
                if attempt + 1 < max_attempts {
                    let delay_ms = BASE_RETRY_DELAY_MS.saturating_mul(1u64 << attempt);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
            error_count.fetch_add(1, Ordering::Relaxed);
            error!(subject = %subject, "NATS publish failed after all retries");
        });
    }

    /// Sends `payload` to `subject` and waits up to `timeout` for a reply.
    ///
    /// Must be called from outside the runtime's worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::RequestTimeout`] or [`NotifyError::Transport`].
    pub fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes, NotifyError> {
        let request = self.client.request(subject.to_string(), payload);
        match self.runtime.block_on(tokio::time::timeout(timeout, request)) {
            Ok(Ok(message)) => Ok(message.payload),
            Ok(Err(e)) => Err(NotifyError::Transport(e.to_string())),
            Err(_) => Err(NotifyError::RequestTimeout {
                subject: subject.to_string(),
            }),
        }
    }

    /// Answers every request on `subject` with `handler(payload)`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Transport`] if the subscription fails.
    pub fn serve_replies<F>(&self, subject: &str, handler: F) -> Result<(), NotifyError>
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let client = self.client.clone();
        let mut subscriber = self
            .runtime
            .block_on(client.subscribe(subject.to_string()))
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let subject = subject.to_string();

        self.runtime.spawn(async move {
            while let Some(message) = subscriber.next().await {
                let Some(reply) = message.reply else {
                    trace!(subject = %subject, "request without reply subject ignored");
                    continue;
                };
                let response = Bytes::from(handler(&message.payload));
                if let Err(e) = client.publish(reply, response).await {
                    warn!(subject = %subject, error = %e, "NATS reply failed");
                }
            }
            debug!(subject = %subject, "reply subscription closed");
        });
        Ok(())
    }
}

impl Publisher for NatsPublisher {
    fn notify(&self) -> Result<(), NotifyError> {
        self.spawn_publish(Bytes::from_static(WAKE_PAYLOAD));
        Ok(())
    }

    fn publish(&self, message: &str) -> Result<(), NotifyError> {
        self.spawn_publish(Bytes::from(message.to_string()));
        Ok(())
    }
}

impl std::fmt::Debug for NatsPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsPublisher")
            .field("subject", &self.subject)
            .field("publish_count", &self.publish_count.load(Ordering::Relaxed))
            .field("error_count", &self.error_count.load(Ordering::Relaxed))
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Polls notices received on one NATS subject.
#[derive(Debug)]
pub struct NatsObserver {
    rx: Receiver<Notice>,
}

impl NatsObserver {
    /// Subscribes to `subject` and forwards messages to a local queue.
    ///
    /// Must be called from outside the runtime's worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Transport`] if the subscription fails.
    pub fn subscribe(
        client: &async_nats::Client,
        subject: &str,
        runtime: &tokio::runtime::Handle,
    ) -> Result<Self, NotifyError> {
        let mut subscriber = runtime
            .block_on(client.subscribe(subject.to_string()))
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let (tx, rx) = channel::bounded(OBSERVER_CAPACITY);

        runtime.spawn(async move {
            while let Some(message) = subscriber.next().await {
                match tx.try_send(to_notice(&message.payload)) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        });
        Ok(Self { rx })
    }
}

fn to_notice(payload: &[u8]) -> Notice {
    if payload.is_empty() {
        Notice::Wake
    } else {
        Notice::Message(String::from_utf8_lossy(payload).into_owned())
    }
}

impl Observer for NatsObserver {
    fn poll(&mut self) -> Option<Notice> {
        match self.rx.try_recv() {
            Ok(notice) => Some(notice),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_is_wake() {
        assert_eq!(to_notice(b""), Notice::Wake);
        assert_eq!(to_notice(b"hello"), Notice::Message("hello".to_string()));
    }
}
