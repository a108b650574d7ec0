//! Configuration for the rescan watcher.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 5;
const DEFAULT_EVENT_BUFFER_BYTES: usize = 64 * 1024;

/// Runtime configuration for the event loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// How long a single wait for kernel events may block, in seconds.
    pub poll_timeout_secs: u64,

    /// Fixed pause between failed database reconnect attempts, in seconds.
    pub reconnect_backoff_secs: u64,

    /// Size of the buffer kernel events are read into.
    pub event_buffer_bytes: usize,

    /// Whether symbolic links to directories are followed while registering.
    pub follow_symlinks: bool,
}

impl WatcherConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            reconnect_backoff_secs: DEFAULT_RECONNECT_BACKOFF_SECS,
            event_buffer_bytes: DEFAULT_EVENT_BUFFER_BYTES,
            follow_symlinks: false,
        }
    }

    /// Parse a config from TOML. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Set the poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the reconnect backoff.
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff_secs = backoff.as_secs();
        self
    }

    /// Set the event buffer size.
    pub fn with_event_buffer_bytes(mut self, bytes: usize) -> Self {
        self.event_buffer_bytes = bytes;
        self
    }

    /// Follow symbolic links while walking subtrees.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// The poll timeout as a [`Duration`], never shorter than one second.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }

    /// The reconnect backoff as a [`Duration`].
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}
