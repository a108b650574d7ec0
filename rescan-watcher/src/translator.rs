//! Reduction of a batch of raw notifications to rescan targets.
//!
//! Events are applied in arrival order and each one mutates the watch
//! table immediately, so later events in the same batch see the effect of
//! earlier ones:
//!
//! | kind               | rescan target        | side effect                       |
//! |--------------------|----------------------|-----------------------------------|
//! | moved-from         | containing directory | directory: record move source     |
//! | moved-to           | containing directory | directory: record move target     |
//! | deleted            | containing directory | directory: prune targets, unwatch |
//! | closed-after-write | the file itself      |                                   |
//! | created            | containing directory | directory: watch subtree, queue   |
//! |                    |                      | it recursively                    |

use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::event::{ChangeKind, RawEvent, RescanSet};
use crate::moves::{MoveCorrelator, MoveSide};
use crate::tree::{WatchBackend, WatchTree, join_relative};

/// Owns the watch table and pending moves, and turns batches into rescans.
pub struct EventTranslator<B> {
    tree: WatchTree<B>,
    moves: MoveCorrelator,
    overflows: u64,
}

impl<B: WatchBackend> EventTranslator<B> {
    /// Create a translator around an existing watch table.
    pub fn new(tree: WatchTree<B>) -> Self {
        Self {
            tree,
            moves: MoveCorrelator::new(),
            overflows: 0,
        }
    }

    /// Apply one batch and return the deduplicated rescan targets.
    pub fn translate<I>(&mut self, events: I) -> RescanSet
    where
        I: IntoIterator<Item = RawEvent>,
    {
        let mut rescans = RescanSet::new();
        for event in events {
            self.apply(event, &mut rescans);
        }
        rescans
    }

    fn apply(&mut self, event: RawEvent, rescans: &mut RescanSet) {
        let kind = event.kind();
        match kind {
            ChangeKind::Overflow => {
                self.overflows += 1;
                warn!(
                    overflows = self.overflows,
                    "kernel event queue overflowed, changes were lost"
                );
                return;
            }
            ChangeKind::Ignored => {
                if let Some(path) = self.tree.forget(event.handle) {
                    debug!(handle = %event.handle, path = %path.display(), "watch released by kernel");
                }
                return;
            }
            ChangeKind::Modified | ChangeKind::Other => {
                trace!(handle = %event.handle, mask = ?event.mask, "ignoring event");
                return;
            }
            _ => {}
        }

        let dir = match self.tree.resolve(event.handle) {
            Ok(dir) => dir.to_path_buf(),
            Err(e) => {
                warn!(mask = ?event.mask, "{e}, skipping event");
                return;
            }
        };
        let full: PathBuf = match &event.name {
            Some(name) => join_relative(&dir, Path::new(name)),
            None => dir.clone(),
        };

        match kind {
            ChangeKind::MovedFrom { is_dir } => {
                rescans.insert(dir);
                if is_dir {
                    self.moves
                        .observe(event.cookie, MoveSide::From, full, &mut self.tree);
                }
            }
            ChangeKind::MovedTo { is_dir } => {
                rescans.insert(dir);
                if is_dir {
                    self.moves
                        .observe(event.cookie, MoveSide::To, full, &mut self.tree);
                }
            }
            ChangeKind::Deleted { is_dir } => {
                rescans.insert(dir);
                if is_dir {
                    let pruned = rescans.prune_below(&full);
                    let unwatched = self.tree.unregister_subtree(&full);
                    debug!(path = %full.display(), pruned, unwatched, "directory deleted");
                }
            }
            ChangeKind::ClosedWrite => {
                rescans.insert(full);
            }
            ChangeKind::Created { is_dir } => {
                rescans.insert(dir);
                if is_dir {
                    let report = self.tree.register_subtree(&full);
                    if report.is_partial() {
                        warn!(
                            path = %full.display(),
                            failed = report.failed,
                            unreadable = report.unreadable,
                            "new directory only partly watched"
                        );
                    }
                    // Content that landed before the watch existed produced no events.
                    if !report.registered.is_empty() {
                        rescans.insert_recursive(full);
                    }
                }
            }
            ChangeKind::Overflow | ChangeKind::Ignored | ChangeKind::Modified | ChangeKind::Other => {}
        }
    }

    /// The watch table.
    pub fn tree(&self) -> &WatchTree<B> {
        &self.tree
    }

    /// Mutable access to the watch table.
    pub fn tree_mut(&mut self) -> &mut WatchTree<B> {
        &mut self.tree
    }

    /// Pending directory moves.
    pub fn moves(&self) -> &MoveCorrelator {
        &self.moves
    }

    /// Queue overflows seen so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::WatchHandle;
    use crate::tree::fake::FakeBackend;
    use inotify::EventMask;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn translator_with(paths: &[&str]) -> EventTranslator<FakeBackend> {
        let mut tree = WatchTree::new(FakeBackend::default());
        for path in paths {
            tree.register(Path::new(path)).unwrap();
        }
        EventTranslator::new(tree)
    }

    fn handle(translator: &EventTranslator<FakeBackend>, path: &str) -> WatchHandle {
        translator.tree().handle_for(Path::new(path)).unwrap()
    }

    #[test]
    fn test_close_write_targets_file() {
        let mut translator = translator_with(&["/h"]);
        let wd = handle(&translator, "/h");

        let rescans = translator.translate([
            RawEvent::new(wd, EventMask::MODIFY).with_name("a.txt"),
            RawEvent::new(wd, EventMask::MODIFY).with_name("a.txt"),
            RawEvent::new(wd, EventMask::CLOSE_WRITE).with_name("a.txt"),
            RawEvent::new(wd, EventMask::CLOSE_WRITE).with_name("a.txt"),
        ]);

        assert_eq!(rescans.to_sorted_vec(), vec![PathBuf::from("/h/a.txt")]);
    }

    #[test]
    fn test_file_create_and_delete_target_parent() {
        let mut translator = translator_with(&["/h", "/h/sub"]);
        let wd = handle(&translator, "/h/sub");

        let rescans = translator.translate([
            RawEvent::new(wd, EventMask::CREATE).with_name("new.txt"),
            RawEvent::new(wd, EventMask::DELETE).with_name("old.txt"),
        ]);

        assert_eq!(rescans.to_sorted_vec(), vec![PathBuf::from("/h/sub")]);
        assert_eq!(translator.tree().len(), 2);
    }

    #[test]
    fn test_directory_delete_prunes_and_unwatches() {
        let mut translator = translator_with(&["/h", "/h/docs", "/h/docs/deep", "/h/docs2"]);
        let root = handle(&translator, "/h");
        let docs = handle(&translator, "/h/docs");
        let deep = handle(&translator, "/h/docs/deep");
        let docs2 = handle(&translator, "/h/docs2");

        let rescans = translator.translate([
            RawEvent::new(docs, EventMask::CLOSE_WRITE).with_name("a.txt"),
            RawEvent::new(deep, EventMask::CREATE).with_name("b.txt"),
            RawEvent::new(docs2, EventMask::CLOSE_WRITE).with_name("c.txt"),
            RawEvent::new(root, EventMask::DELETE | EventMask::ISDIR).with_name("docs"),
        ]);

        assert_eq!(
            rescans.to_sorted_vec(),
            vec![PathBuf::from("/h"), PathBuf::from("/h/docs2/c.txt")]
        );
        assert!(!translator.tree().contains(Path::new("/h/docs")));
        assert!(!translator.tree().contains(Path::new("/h/docs/deep")));
        assert!(translator.tree().contains(Path::new("/h/docs2")));
    }

    #[test]
    fn test_events_below_deleted_directory_are_dropped() {
        let mut translator = translator_with(&["/h", "/h/d", "/h/d/sub"]);
        let root = handle(&translator, "/h");
        let sub = handle(&translator, "/h/d/sub");

        let rescans = translator.translate([
            RawEvent::new(root, EventMask::DELETE | EventMask::ISDIR).with_name("d"),
            RawEvent::new(sub, EventMask::DELETE).with_name("late.txt"),
        ]);

        assert_eq!(rescans.to_sorted_vec(), vec![PathBuf::from("/h")]);
        assert_eq!(translator.tree().len(), 1);
    }

    #[test]
    fn test_directory_move_within_batch() {
        let mut translator = translator_with(&["/h", "/h/a", "/h/a/x", "/h/b"]);
        let root = handle(&translator, "/h");
        let b = handle(&translator, "/h/b");
        let x = handle(&translator, "/h/a/x");

        let rescans = translator.translate([
            RawEvent::new(root, EventMask::MOVED_FROM | EventMask::ISDIR)
                .with_name("a")
                .with_cookie(5),
            RawEvent::new(b, EventMask::MOVED_TO | EventMask::ISDIR)
                .with_name("a")
                .with_cookie(5),
            RawEvent::new(x, EventMask::CLOSE_WRITE).with_name("f"),
        ]);

        assert_eq!(
            rescans.to_sorted_vec(),
            vec![
                PathBuf::from("/h"),
                PathBuf::from("/h/b"),
                PathBuf::from("/h/b/a/x/f"),
            ]
        );
        assert_eq!(translator.moves().pending_count(), 0);
        assert_eq!(
            translator.tree().resolve(x).unwrap(),
            Path::new("/h/b/a/x")
        );
    }

    #[test]
    fn test_file_move_does_not_touch_correlator() {
        let mut translator = translator_with(&["/h"]);
        let root = handle(&translator, "/h");

        translator.translate([RawEvent::new(root, EventMask::MOVED_FROM)
            .with_name("f.txt")
            .with_cookie(8)]);

        assert_eq!(translator.moves().pending_count(), 0);
    }

    #[test]
    fn test_unmatched_move_from_stays_pending() {
        let mut translator = translator_with(&["/h", "/h/gone"]);
        let root = handle(&translator, "/h");

        translator.translate([RawEvent::new(root, EventMask::MOVED_FROM | EventMask::ISDIR)
            .with_name("gone")
            .with_cookie(12)]);

        assert_eq!(translator.moves().pending_count(), 1);
        assert!(translator.tree().contains(Path::new("/h/gone")));
    }

    #[test]
    #[traced_test]
    fn test_unknown_handle_is_skipped() {
        let mut translator = translator_with(&["/h"]);
        let root = handle(&translator, "/h");

        let rescans = translator.translate([
            RawEvent::new(WatchHandle::new(999), EventMask::CLOSE_WRITE).with_name("x"),
            RawEvent::new(root, EventMask::CLOSE_WRITE).with_name("y"),
        ]);

        assert_eq!(rescans.to_sorted_vec(), vec![PathBuf::from("/h/y")]);
        assert!(logs_contain("unknown watch handle wd=999"));
    }

    #[test]
    fn test_ignored_forgets_watch() {
        let mut translator = translator_with(&["/h", "/h/d"]);
        let d = handle(&translator, "/h/d");

        let rescans = translator.translate([RawEvent::new(d, EventMask::IGNORED)]);

        assert!(rescans.is_empty());
        assert!(!translator.tree().contains(Path::new("/h/d")));
    }

    #[test]
    fn test_overflow_is_counted() {
        let mut translator = translator_with(&["/h"]);

        let rescans =
            translator.translate([RawEvent::new(WatchHandle::new(-1), EventMask::Q_OVERFLOW)]);

        assert!(rescans.is_empty());
        assert_eq!(translator.overflows(), 1);
    }

    #[test]
    fn test_created_directory_is_watched_with_contents() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("copied/inner")).unwrap();

        let mut tree = WatchTree::new(FakeBackend::default());
        tree.register(root).unwrap();
        let mut translator = EventTranslator::new(tree);
        let wd = translator.tree().handle_for(root).unwrap();

        let rescans = translator.translate([
            RawEvent::new(wd, EventMask::CREATE | EventMask::ISDIR).with_name("copied"),
        ]);

        assert!(translator.tree().contains(&root.join("copied")));
        assert!(translator.tree().contains(&root.join("copied/inner")));
        assert_eq!(
            rescans.to_sorted_vec(),
            vec![root.to_path_buf(), root.join("copied")]
        );
        assert!(rescans.is_recursive(&root.join("copied")));
        assert!(!rescans.is_recursive(root));
    }

    #[test]
    fn test_repeated_create_does_not_duplicate_watches() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("d")).unwrap();

        let mut tree = WatchTree::new(FakeBackend::default());
        tree.register(root).unwrap();
        let mut translator = EventTranslator::new(tree);
        let wd = translator.tree().handle_for(root).unwrap();

        let created = RawEvent::new(wd, EventMask::CREATE | EventMask::ISDIR).with_name("d");
        translator.translate([created.clone()]);
        let again = translator.translate([created]);

        assert_eq!(again.to_sorted_vec(), vec![root.to_path_buf()]);
        assert_eq!(translator.tree().len(), 2);
        assert_eq!(translator.tree().backend().live.len(), 2);
    }
}
