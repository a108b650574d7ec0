//! # Rescan Watcher
//!
//! This crate watches users' home trees through inotify and turns raw
//! kernel notifications into a small, deduplicated set of paths that the
//! indexer needs to rescan.
//!
//! ## Features
//!
//! - **Recursive Watching**: One kernel watch per directory, kept in sync as
//!   directories are created, deleted and renamed
//! - **Rename Correlation**: Split moved-from / moved-to notifications are
//!   paired by cookie and the watch table is rewritten in place
//! - **Batch Reduction**: Repeated notifications collapse, and targets under a
//!   deleted directory are pruned
//! - **Owner Resolution**: Targets are mapped to an owner and a home-relative
//!   path before they reach the indexer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          EventLoop                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  inotify ──► RawEvent ──► EventTranslator ──► RescanSet         │
//! │                               │                   │             │
//! │                               ▼                   ▼             │
//! │                 WatchTree + MoveCorrelator   ScanDispatcher     │
//! │                                                   │             │
//! │                                                   ▼             │
//! │                                        UserRoots ─► Indexer     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod indexer;
pub mod kernel;
pub mod moves;
pub mod translator;
pub mod tree;
pub mod users;
pub mod watcher;

pub use config::WatcherConfig;
pub use connection::{Connection, reconnect};
pub use dispatcher::{DispatchReport, ScanDispatcher};
pub use error::{Result, WatcherError};
pub use event::{ChangeKind, RawEvent, RescanSet};
pub use indexer::{Indexer, ScanOutcome, ScanRequest};
pub use kernel::{InotifyBackend, KernelEvents};
pub use moves::{CompletedMove, MoveCorrelator, MoveSide, PendingMove};
pub use translator::EventTranslator;
pub use tree::{RegistrationReport, WatchBackend, WatchHandle, WatchTree};
pub use users::{OwnerId, ScanTarget, UserAccount, UserDirectory, UserRoot, UserRoots};
pub use watcher::{BatchReport, Collaborators, EventLoop, LoopState, StopHandle, Wake, WatcherStats};
