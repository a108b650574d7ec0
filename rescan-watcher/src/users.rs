//! User home directories and path ownership.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Opaque identity of the account that owns a home directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create an owner id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An account as reported by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Stable identity.
    pub owner: OwnerId,

    /// Absolute path of the tree watched for this user.
    pub home: PathBuf,
}

impl UserAccount {
    /// Create an account.
    pub fn new(owner: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            owner: OwnerId::new(owner),
            home: home.into(),
        }
    }
}

/// Source of user accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// List every account whose home should be watched.
    async fn list_users(&self) -> anyhow::Result<Vec<UserAccount>>;
}

/// A path resolved to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    /// Owner of the tree the path is in.
    pub owner: OwnerId,

    /// Path relative to the owner's home. Empty for the home itself.
    pub relative_path: PathBuf,
}

/// A home prefix and the identity that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRoot {
    pub home: PathBuf,
    pub owner: OwnerId,
}

/// The set of home prefixes fixed at startup.
///
/// Prefixes never contain one another, so a path resolves to at most one
/// root.
#[derive(Debug, Clone, Default)]
pub struct UserRoots {
    roots: Vec<UserRoot>,
}

impl UserRoots {
    /// Build the root set, rejecting relative or nested homes.
    pub fn new(accounts: impl IntoIterator<Item = UserAccount>) -> Result<Self> {
        let mut roots: Vec<UserRoot> = accounts
            .into_iter()
            .map(|account| UserRoot {
                home: account.home,
                owner: account.owner,
            })
            .collect();

        if let Some(root) = roots.iter().find(|root| !root.home.is_absolute()) {
            return Err(WatcherError::RelativeRoot(root.home.clone()));
        }

        // Sorted by component, every descendant directly follows its ancestor.
        roots.sort_by(|a, b| a.home.cmp(&b.home));
        for pair in roots.windows(2) {
            if pair[1].home.starts_with(&pair[0].home) {
                return Err(WatcherError::OverlappingRoots(
                    pair[0].home.clone(),
                    pair[1].home.clone(),
                ));
            }
        }

        Ok(Self { roots })
    }

    /// Find the owner of `path` and its path relative to that owner's home.
    pub fn resolve(&self, path: &Path) -> Option<ScanTarget> {
        self.roots.iter().find_map(|root| {
            let rest = path.strip_prefix(&root.home).ok()?;
            Some(ScanTarget {
                owner: root.owner.clone(),
                relative_path: rest.to_path_buf(),
            })
        })
    }

    /// Iterate over the roots.
    pub fn iter(&self) -> impl Iterator<Item = &UserRoot> {
        self.roots.iter()
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether there are no roots.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
