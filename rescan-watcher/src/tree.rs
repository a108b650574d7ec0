//! The watch table: which directory each kernel watch handle belongs to.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, WatcherError};

/// Identifier the kernel hands back for a watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(i32);

impl WatchHandle {
    /// Wrap a raw kernel watch descriptor.
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// The raw kernel watch descriptor.
    pub const fn id(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd={}", self.0)
    }
}

/// The kernel side of watch registration.
///
/// Adding a watch for a directory that is already watched returns the
/// existing handle, matching `inotify_add_watch` semantics.
pub trait WatchBackend {
    /// Start watching a directory.
    fn add_watch(&mut self, path: &Path) -> io::Result<WatchHandle>;

    /// Stop watching and release the handle.
    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()>;

    /// Drop bookkeeping for a handle the kernel already released.
    fn forget(&mut self, _handle: WatchHandle) {}

    /// Release every watch and the kernel instance behind them.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Outcome of a recursive registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Directories that received a new watch, parents first.
    pub registered: Vec<PathBuf>,

    /// Directories that were already covered.
    pub already_watched: usize,

    /// Directories the kernel refused to watch.
    pub failed: usize,

    /// Entries the walk could not read.
    pub unreadable: usize,
}

impl RegistrationReport {
    /// Whether any part of the subtree was left unwatched.
    pub fn is_partial(&self) -> bool {
        self.failed > 0 || self.unreadable > 0
    }
}

/// Bidirectional map between watch handles and directory paths.
///
/// Both maps are kept in lockstep so handle -> path stays a bijection.
pub struct WatchTree<B> {
    backend: B,
    by_handle: HashMap<WatchHandle, PathBuf>,
    by_path: HashMap<PathBuf, WatchHandle>,
    follow_symlinks: bool,
}

impl<B: WatchBackend> WatchTree<B> {
    /// Create an empty tree on top of a backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            by_handle: HashMap::new(),
            by_path: HashMap::new(),
            follow_symlinks: false,
        }
    }

    /// Follow symbolic links while walking subtrees.
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Watch every directory under `base`, `base` included.
    ///
    /// Parents are registered before their children, so `base` is watched
    /// even when the walk fails further down. Individual failures are
    /// logged and counted, never returned.
    pub fn register_subtree(&mut self, base: &Path) -> RegistrationReport {
        let mut report = RegistrationReport::default();

        let walker = WalkDir::new(base)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| entry.file_type().is_dir());

        for entry in walker {
            match entry {
                Ok(entry) => match self.register(entry.path()) {
                    Ok(true) => report.registered.push(entry.into_path()),
                    Ok(false) => report.already_watched += 1,
                    Err(e) => {
                        warn!("{e}");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(base = %base.display(), "skipping unreadable entry: {e}");
                    report.unreadable += 1;
                }
            }
        }

        debug!(
            base = %base.display(),
            registered = report.registered.len(),
            already_watched = report.already_watched,
            failed = report.failed,
            "registered subtree"
        );
        report
    }

    /// Watch a single directory. Returns `false` if it was already covered.
    pub fn register(&mut self, path: &Path) -> Result<bool> {
        if self.by_path.contains_key(path) {
            return Ok(false);
        }

        let handle = self
            .backend
            .add_watch(path)
            .map_err(|source| WatcherError::Registration {
                path: path.to_path_buf(),
                source,
            })?;

        // Same inode already watched under a stale name.
        if let Some(stale) = self.by_handle.remove(&handle) {
            debug!(%handle, stale = %stale.display(), "handle reused for new path");
            self.by_path.remove(&stale);
        }

        self.by_handle.insert(handle, path.to_path_buf());
        self.by_path.insert(path.to_path_buf(), handle);
        Ok(true)
    }

    /// Drop every entry at or below `base` and release its kernel watch.
    ///
    /// Matching is by path component, so `/a/b2` is not below `/a/b`.
    pub fn unregister_subtree(&mut self, base: &Path) -> usize {
        let doomed: Vec<WatchHandle> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(base))
            .map(|(_, handle)| *handle)
            .collect();

        for handle in &doomed {
            if let Some(path) = self.by_handle.remove(handle) {
                self.by_path.remove(&path);
            }
            // The kernel drops watches on deleted directories by itself.
            if let Err(e) = self.backend.remove_watch(*handle) {
                debug!(%handle, "watch already released: {e}");
            }
        }

        doomed.len()
    }

    /// Forget a handle the kernel has already released.
    pub fn forget(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        self.backend.forget(handle);
        let path = self.by_handle.remove(&handle)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Drop every entry and close the backend.
    pub fn close(&mut self) -> io::Result<()> {
        self.by_handle.clear();
        self.by_path.clear();
        self.backend.close()
    }

    /// Move every entry at or below `old_prefix` under `new_prefix`,
    /// keeping handles.
    pub fn rewrite_prefix(&mut self, old_prefix: &Path, new_prefix: &Path) -> usize {
        if old_prefix == new_prefix {
            return 0;
        }

        let moved: Vec<(WatchHandle, PathBuf)> = self
            .by_handle
            .iter()
            .filter(|(_, path)| path.starts_with(old_prefix))
            .map(|(handle, path)| (*handle, path.clone()))
            .collect();

        for (_, path) in &moved {
            self.by_path.remove(path);
        }

        for (handle, path) in &moved {
            let new_path = match path.strip_prefix(old_prefix) {
                Ok(rest) => join_relative(new_prefix, rest),
                Err(_) => continue,
            };

            if let Some(stale) = self.by_path.insert(new_path.clone(), *handle) {
                if stale != *handle {
                    self.by_handle.remove(&stale);
                    if let Err(e) = self.backend.remove_watch(stale) {
                        debug!(handle = %stale, "stale watch already released: {e}");
                    }
                }
            }
            self.by_handle.insert(*handle, new_path);
        }

        moved.len()
    }

    /// Path for a handle.
    ///
    /// An unknown handle means the table and the event stream disagree.
    pub fn resolve(&self, handle: WatchHandle) -> Result<&Path> {
        self.by_handle
            .get(&handle)
            .map(PathBuf::as_path)
            .ok_or(WatcherError::UnknownHandle(handle))
    }

    /// Handle watching `path`, if any.
    pub fn handle_for(&self, path: &Path) -> Option<WatchHandle> {
        self.by_path.get(path).copied()
    }

    /// Whether `path` is watched.
    pub fn contains(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// Whether nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// All watched paths, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.by_path.keys().map(PathBuf::as_path)
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// `base.join(rest)` without the trailing separator an empty `rest` adds.
pub(crate) fn join_relative(base: &Path, rest: &Path) -> PathBuf {
    if rest.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}
