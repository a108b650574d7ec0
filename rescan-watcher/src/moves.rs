//! Pairing of split rename notifications.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;

use crate::tree::{WatchBackend, WatchTree};

/// Which half of a rename a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveSide {
    /// The directory left this path.
    From,
    /// The directory arrived at this path.
    To,
}

/// A rename with at least one half observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingMove {
    pub from: Option<PathBuf>,
    pub to: Option<PathBuf>,
}

/// A rename whose two halves have both been seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMove {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Watch entries relocated by the rewrite.
    pub rewritten: usize,
}

/// Tracks directory renames by correlation cookie.
///
/// A half whose partner never shows up (moved out of the watched roots)
/// stays pending for the life of the process.
#[derive(Debug, Default)]
pub struct MoveCorrelator {
    pending: HashMap<u32, PendingMove>,
}

impl MoveCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one half of a directory rename.
    ///
    /// When both halves are known the tree is rewritten from the old
    /// location to the new one and the pending entry is discarded.
    pub fn observe<B: WatchBackend>(
        &mut self,
        cookie: u32,
        side: MoveSide,
        path: PathBuf,
        tree: &mut WatchTree<B>,
    ) -> Option<CompletedMove> {
        let entry = self.pending.entry(cookie).or_default();
        match side {
            MoveSide::From => entry.from = Some(path),
            MoveSide::To => entry.to = Some(path),
        }

        if entry.from.is_none() || entry.to.is_none() {
            return None;
        }

        let pending = self.pending.remove(&cookie)?;
        let (Some(from), Some(to)) = (pending.from, pending.to) else {
            return None;
        };

        let rewritten = tree.rewrite_prefix(&from, &to);
        debug!(
            cookie,
            from = %from.display(),
            to = %to.display(),
            rewritten,
            "directory move completed"
        );

        Some(CompletedMove {
            from,
            to,
            rewritten,
        })
    }

    /// The pending half-move for a cookie, if any.
    pub fn pending(&self, cookie: u32) -> Option<&PendingMove> {
        self.pending.get(&cookie)
    }

    /// Number of incomplete moves.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fake::FakeBackend;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn seeded_tree() -> WatchTree<FakeBackend> {
        let mut tree = WatchTree::new(FakeBackend::default());
        for path in ["/home/u", "/home/u/a", "/home/u/a/x", "/home/u/a/x/y"] {
            tree.register(Path::new(path)).unwrap();
        }
        tree
    }

    #[test]
    fn test_from_then_to_rewrites_subtree() {
        let mut tree = seeded_tree();
        let mut moves = MoveCorrelator::new();

        let first = moves.observe(7, MoveSide::From, PathBuf::from("/home/u/a"), &mut tree);
        assert!(first.is_none());
        assert_eq!(moves.pending_count(), 1);

        let done = moves
            .observe(7, MoveSide::To, PathBuf::from("/home/u/b"), &mut tree)
            .unwrap();

        assert_eq!(done.rewritten, 3);
        assert_eq!(moves.pending_count(), 0);
        assert!(tree.contains(Path::new("/home/u/b/x/y")));
        assert!(!tree.contains(Path::new("/home/u/a")));
    }

    #[test]
    fn test_to_then_from_rewrites_subtree() {
        let mut tree = seeded_tree();
        let mut moves = MoveCorrelator::new();

        moves.observe(9, MoveSide::To, PathBuf::from("/home/u/b"), &mut tree);
        let done = moves.observe(9, MoveSide::From, PathBuf::from("/home/u/a"), &mut tree);

        assert!(done.is_some());
        assert!(moves.pending(9).is_none());
        assert!(tree.contains(Path::new("/home/u/b/x")));
    }

    #[test]
    fn test_unmatched_from_stays_pending() {
        let mut tree = seeded_tree();
        let mut moves = MoveCorrelator::new();

        moves.observe(3, MoveSide::From, PathBuf::from("/home/u/a"), &mut tree);

        assert_eq!(
            moves.pending(3),
            Some(&PendingMove {
                from: Some(PathBuf::from("/home/u/a")),
                to: None,
            })
        );
        assert_eq!(tree.len(), 4);
        assert!(tree.contains(Path::new("/home/u/a/x")));
    }

    #[test]
    fn test_cookies_are_independent() {
        let mut tree = seeded_tree();
        let mut moves = MoveCorrelator::new();

        moves.observe(1, MoveSide::From, PathBuf::from("/home/u/a"), &mut tree);
        moves.observe(2, MoveSide::To, PathBuf::from("/home/u/elsewhere"), &mut tree);

        assert_eq!(moves.pending_count(), 2);
        assert!(tree.contains(Path::new("/home/u/a")));
    }
}
