//! Interface to the content indexer that performs rescans.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::users::{OwnerId, ScanTarget};

/// A request to rescan one path in one owner's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Owner of the tree.
    pub owner: OwnerId,

    /// Path relative to the owner's home.
    pub relative_path: PathBuf,

    /// Whether to descend into subdirectories.
    pub recursive: bool,

    /// Lock token to scan under, if the caller already holds one.
    pub lock: Option<String>,
}

impl ScanRequest {
    /// Create a non-recursive, unlocked request.
    pub fn new(owner: OwnerId, relative_path: impl Into<PathBuf>) -> Self {
        Self {
            owner,
            relative_path: relative_path.into(),
            recursive: false,
            lock: None,
        }
    }

    /// Descend into subdirectories.
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Scan under an existing lock.
    pub fn with_lock(mut self, lock: impl Into<String>) -> Self {
        self.lock = Some(lock.into());
        self
    }
}

impl From<ScanTarget> for ScanRequest {
    fn from(target: ScanTarget) -> Self {
        Self::new(target.owner, target.relative_path)
    }
}

/// How a scan ended.
///
/// Vanished paths and held locks are routine while files churn, so they are
/// outcomes rather than errors.
#[derive(Debug)]
pub enum ScanOutcome {
    /// The path was re-indexed.
    Completed,

    /// The path no longer exists.
    NotFound,

    /// Another process holds a lock on the path.
    Locked,

    /// Anything else went wrong.
    Failed(anyhow::Error),
}

/// The external indexer.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Re-index one path.
    async fn scan(&self, request: &ScanRequest) -> ScanOutcome;
}
