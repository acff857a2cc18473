//! Deployment configuration for journals, the event loop and the cache daemon.
//!
//! [`BusConfig`] bundles every knob a process needs at startup. It can be
//! built in code with the `with_*` methods or loaded from a JSON file:
//!
//! ```rust
//! use journalbus::config::BusConfig;
//!
//! let config = BusConfig::from_json_str(r#"{ "low_latency": true }"#);
//! assert!(config.is_ok());
//! ```
//!
//! Missing fields fall back to their defaults. Low-latency deployments use
//! smaller pages and smaller per-tick store volumes.

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the journal root directory.
pub const HOME_ENV_VAR: &str = "JOURNALBUS_HOME";

/// Default page size (128 MB).
pub const DEFAULT_PAGE_SIZE: usize = 128 * 1024 * 1024;

/// Page size used in low-latency mode (16 MB).
pub const LOW_LATENCY_PAGE_SIZE: usize = 16 * 1024 * 1024;

/// Entries moved per tick by the cache daemon.
pub const DEFAULT_STORE_VOLUME: usize = 100;

/// Entries moved per tick by the cache daemon in low-latency mode.
pub const LOW_LATENCY_STORE_VOLUME: usize = 10;

/// Default bounded retry count for profile reads and state deliveries.
pub const DEFAULT_RETRY_LIMIT: u32 = 10;

/// Runtime configuration shared by every component of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Size in bytes of every journal page file.
    pub page_size: usize,
    /// Low-latency mode: smaller pages and drains, no write notifications.
    pub low_latency: bool,
    /// Maximum number of entries the cache daemon moves per tick.
    pub store_volume_per_tick: usize,
    /// Maximum number of frames dispatched by one event-loop step.
    pub frames_per_step: usize,
    /// Interval between housekeeping ticks, in nanoseconds.
    pub interval_ns: i64,
    /// Bounded retry count for profile reads and failed deliveries.
    pub profile_retry_limit: u32,
    /// Offset applied to UTC midnight to compute the trading day.
    pub trading_day_offset_hours: i64,
    /// Notify the publisher after every closed frame.
    pub notify_after_write: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            low_latency: false,
            store_volume_per_tick: DEFAULT_STORE_VOLUME,
            frames_per_step: 1024,
            interval_ns: crate::utils::NANOSECONDS_PER_SECOND,
            profile_retry_limit: DEFAULT_RETRY_LIMIT,
            trading_day_offset_hours: 0,
            notify_after_write: true,
        }
    }
}

impl BusConfig {
    /// Configuration tuned for low-latency deployments.
    #[must_use]
    pub fn low_latency() -> Self {
        Self {
            page_size: LOW_LATENCY_PAGE_SIZE,
            low_latency: true,
            store_volume_per_tick: LOW_LATENCY_STORE_VOLUME,
            notify_after_write: false,
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] if the text is not valid JSON or a
    /// field has the wrong type, or if the resulting values are invalid.
    pub fn from_json_str(text: &str) -> Result<Self, BusError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| BusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] if the file cannot be read or parsed.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, BusError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BusError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), BusError> {
        let min_page = crate::journal::page::PAGE_HEADER_LENGTH
            + 4 * crate::journal::frame::FRAME_HEADER_LENGTH;
        if self.page_size < min_page || self.page_size > u32::MAX as usize {
            return Err(BusError::Config(format!(
                "page_size {} out of range [{min_page}, {}]",
                self.page_size,
                u32::MAX
            )));
        }
        if self.page_size % 8 != 0 {
            return Err(BusError::Config(format!(
                "page_size {} is not a multiple of 8",
                self.page_size
            )));
        }
        if self.frames_per_step == 0 {
            return Err(BusError::Config("frames_per_step must be positive".to_string()));
        }
        if self.interval_ns <= 0 {
            return Err(BusError::Config("interval_ns must be positive".to_string()));
        }
        if !(-23..=23).contains(&self.trading_day_offset_hours) {
            return Err(BusError::Config(format!(
                "trading_day_offset_hours {} out of range [-23, 23]",
                self.trading_day_offset_hours
            )));
        }
        Ok(())
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the per-tick store volume.
    #[must_use]
    pub fn with_store_volume(mut self, volume: usize) -> Self {
        self.store_volume_per_tick = volume;
        self
    }

    /// Sets the per-step frame budget.
    #[must_use]
    pub fn with_frames_per_step(mut self, frames: usize) -> Self {
        self.frames_per_step = frames;
        self
    }

    /// Sets the housekeeping interval.
    #[must_use]
    pub fn with_interval_ns(mut self, interval_ns: i64) -> Self {
        self.interval_ns = interval_ns;
        self
    }

    /// Sets the bounded retry count.
    #[must_use]
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.profile_retry_limit = limit;
        self
    }

    /// Sets the trading-day offset in hours.
    #[must_use]
    pub fn with_trading_day_offset(mut self, hours: i64) -> Self {
        self.trading_day_offset_hours = hours;
        self
    }

    /// Enables or disables per-write notifications.
    #[must_use]
    pub fn with_notify_after_write(mut self, notify: bool) -> Self {
        self.notify_after_write = notify;
        self
    }

    /// Whether writers should notify after each frame.
    #[must_use]
    pub fn should_notify(&self) -> bool {
        self.notify_after_write && !self.low_latency
    }
}

/// Resolves the journal root: `JOURNALBUS_HOME` if set, else `fallback`.
#[must_use]
pub fn resolve_home(fallback: &Path) -> PathBuf {
    match std::env::var_os(HOME_ENV_VAR) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => fallback.to_path_buf(),
    }
}
