//! Raw kernel notifications and the rescan set they reduce to.

use std::collections::HashMap;
use std::collections::hash_map::{self, Entry};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use inotify::EventMask;

use crate::tree::WatchHandle;

/// One notification as read from the kernel queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Notification kinds set on this event.
    pub mask: EventMask,

    /// Entry name inside the watched directory, if the event concerns a child.
    pub name: Option<OsString>,

    /// Watch the event was delivered on.
    pub handle: WatchHandle,

    /// Rename correlation token. Zero for everything but moves.
    pub cookie: u32,
}

impl RawEvent {
    /// Create an event without a name or cookie.
    pub fn new(handle: WatchHandle, mask: EventMask) -> Self {
        Self {
            mask,
            name: None,
            handle,
            cookie: 0,
        }
    }

    /// Set the child entry name.
    pub fn with_name(mut self, name: impl Into<OsString>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the rename cookie.
    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = cookie;
        self
    }

    /// Decode the mask into a single kind.
    pub fn kind(&self) -> ChangeKind {
        ChangeKind::from_mask(self.mask)
    }
}

/// What a raw event means, decided once per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The kernel queue overflowed and events were lost.
    Overflow,

    /// The kernel released the watch (its directory is gone).
    Ignored,

    /// An entry was renamed away from the watched directory.
    MovedFrom { is_dir: bool },

    /// An entry was renamed into the watched directory.
    MovedTo { is_dir: bool },

    /// An entry was deleted.
    Deleted { is_dir: bool },

    /// A file opened for writing was closed.
    ClosedWrite,

    /// An entry was created.
    Created { is_dir: bool },

    /// File content changed; the matching close is what counts.
    Modified,

    /// Anything else.
    Other,
}

impl ChangeKind {
    /// Decode a mask. Order matters when several bits are set.
    pub fn from_mask(mask: EventMask) -> Self {
        let is_dir = mask.contains(EventMask::ISDIR);

        if mask.contains(EventMask::Q_OVERFLOW) {
            Self::Overflow
        } else if mask.contains(EventMask::IGNORED) {
            Self::Ignored
        } else if mask.contains(EventMask::MOVED_FROM) {
            Self::MovedFrom { is_dir }
        } else if mask.contains(EventMask::MOVED_TO) {
            Self::MovedTo { is_dir }
        } else if mask.contains(EventMask::DELETE) {
            Self::Deleted { is_dir }
        } else if mask.contains(EventMask::CLOSE_WRITE) {
            Self::ClosedWrite
        } else if mask.contains(EventMask::CREATE) {
            Self::Created { is_dir }
        } else if mask.contains(EventMask::MODIFY) {
            Self::Modified
        } else {
            Self::Other
        }
    }
}

/// Paths that need re-indexing, deduplicated by value.
///
/// A target is either shallow (the path itself) or recursive (the path and
/// everything below it). Queuing the same path twice keeps the deeper of the
/// two.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanSet {
    paths: HashMap<PathBuf, bool>,
}

impl RescanSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shallow target. Returns `false` if it was already queued.
    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        match self.paths.entry(path.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(false);
                true
            }
        }
    }

    /// Add a target whose whole subtree needs re-indexing. Returns `false`
    /// if it was already queued as recursive.
    pub fn insert_recursive(&mut self, path: impl Into<PathBuf>) -> bool {
        let recursive = self.paths.entry(path.into()).or_insert(false);
        !std::mem::replace(recursive, true)
    }

    /// Whether `path` is queued as recursive.
    pub fn is_recursive(&self, path: &Path) -> bool {
        self.paths.get(path).copied().unwrap_or(false)
    }

    /// Drop every target at or below `base`.
    pub fn prune_below(&mut self, base: &Path) -> usize {
        let before = self.paths.len();
        self.paths.retain(|path, _| !path.starts_with(base));
        before - self.paths.len()
    }

    /// Whether `path` is queued.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains_key(path)
    }

    /// Number of queued targets.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterate over targets in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.keys().map(PathBuf::as_path)
    }

    /// Targets sorted, for stable dispatch order and tests.
    pub fn to_sorted_vec(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.paths.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl IntoIterator for RescanSet {
    type Item = PathBuf;
    type IntoIter = hash_map::IntoKeys<PathBuf, bool>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.into_keys()
    }
}
