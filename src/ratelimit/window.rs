//! Sliding window parameters.

use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Default number of permits per window.
pub const DEFAULT_LIMIT: u64 = 100;
/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECONDS: u64 = 3600;

/// The global limit/window pair applied to every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    limit: u64,
    window_seconds: u64,
}

impl WindowConfig {
    /// Create a window allowing `limit` permits per `window_seconds`.
    ///
    /// Both values must be positive.
    pub fn new(limit: u64, window_seconds: u64) -> Result<Self> {
        if limit == 0 {
            return Err(TurnstileError::Config("limit must be positive".to_string()));
        }
        if window_seconds == 0 {
            return Err(TurnstileError::Config(
                "window_seconds must be positive".to_string(),
            ));
        }
        Ok(Self {
            limit,
            window_seconds,
        })
    }

    /// Maximum permits admitted within one window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length in seconds. Also the number of buckets per window.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Window length as a duration; used as the bucket TTL.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// First epoch second still inside the window ending at `now_secs`.
    pub fn start(&self, now_secs: u64) -> u64 {
        now_secs.saturating_sub(self.window_seconds - 1)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window_seconds: DEFAULT_WINDOW_SECONDS,
        }
    }
}
