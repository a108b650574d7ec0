//! Error types for the rescan watcher.

use std::path::PathBuf;

use thiserror::Error;

use crate::tree::WatchHandle;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the rescan watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// A notification named a watch handle the tree has no path for.
    #[error("unknown watch handle {0}: watch table and event stream are out of sync")]
    UnknownHandle(WatchHandle),

    /// A directory could not be registered with the kernel.
    #[error("failed to watch {path}: {source}")]
    Registration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two user home directories contain one another.
    #[error("user roots overlap: {0} and {1}")]
    OverlappingRoots(PathBuf, PathBuf),

    /// A user root is not an absolute path.
    #[error("user root is not absolute: {0}")]
    RelativeRoot(PathBuf),

    /// The kernel event stream ended.
    #[error("event stream closed")]
    EventStreamClosed,

    /// The loop was already stopped.
    #[error("event loop already stopped")]
    Stopped,

    /// A collaborator (user listing, indexer, database) failed.
    #[error("collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}
