//! The event loop: wait for kernel events, translate, dispatch, repeat.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::connection::{Connection, reconnect};
use crate::dispatcher::{DispatchReport, ScanDispatcher};
use crate::error::{Result, WatcherError};
use crate::event::RawEvent;
use crate::indexer::Indexer;
use crate::kernel::{self, InotifyBackend, KernelEvents};
use crate::translator::EventTranslator;
use crate::tree::{WatchBackend, WatchTree};
use crate::users::{UserDirectory, UserRoots};

/// The external services the loop talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Source of user accounts and home directories.
    pub users: Arc<dyn UserDirectory>,

    /// Performs the actual rescans.
    pub indexer: Arc<dyn Indexer>,

    /// The indexer's database connection.
    pub connection: Arc<dyn Connection>,
}

/// Lifecycle of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
    Stopped,
}

/// Why [`EventLoop::run_once`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// The poll timeout expired with nothing to read.
    Timeout,

    /// A batch was read and processed.
    Batch(BatchReport),

    /// The loop has stopped.
    Stopped,
}

/// Summary of one processed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Raw events read.
    pub events: usize,

    /// Events that could not be read.
    pub read_errors: usize,

    /// Distinct rescan targets after deduplication and pruning.
    pub rescans: usize,

    /// Failed reconnect attempts before the batch could be dispatched.
    pub reconnect_failures: u32,

    /// Outcome counts.
    pub dispatch: DispatchReport,

    /// When processing finished.
    pub processed_at: DateTime<Utc>,
}

/// Statistics about the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStats {
    /// Directories currently watched.
    pub watched_directories: usize,

    /// Directory moves still waiting for their other half.
    pub pending_moves: usize,

    /// Kernel queue overflows seen.
    pub overflows: u64,
}

/// Cloneable handle used to ask the loop to stop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    requested: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    /// Create a handle with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop at its next wake. Repeated calls are no-ops.
    pub fn request_stop(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            debug!("stop requested");
            self.inner.notify.notify_one();
        }
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested.
    pub async fn requested(&self) {
        while !self.is_requested() {
            self.inner.notify.notified().await;
        }
    }

    /// Request a stop on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) -> io::Result<JoinHandle<()>> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let handle = self.clone();

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => info!("received SIGINT"),
                _ = terminate.recv() => info!("received SIGTERM"),
            }
            handle.request_stop();
        }))
    }
}

/// Watches every user root and feeds changes to the indexer.
///
/// One task owns the loop and everything in it. Work happens in batches:
/// block until the kernel has events or the poll timeout passes, drain
/// everything that is ready, process it to completion, block again.
pub struct EventLoop<B: WatchBackend> {
    config: WatcherConfig,
    translator: EventTranslator<B>,
    dispatcher: ScanDispatcher,
    connection: Arc<dyn Connection>,
    events: Option<KernelEvents>,
    state: LoopState,
    stop: StopHandle,
}

impl EventLoop<InotifyBackend> {
    /// Open an inotify instance and watch every user's home.
    pub async fn open(config: WatcherConfig, collaborators: Collaborators) -> Result<Self> {
        let (backend, events) = kernel::open(config.event_buffer_bytes, config.follow_symlinks)?;
        Self::with_backend(config, backend, events, collaborators).await
    }
}

impl<B: WatchBackend> EventLoop<B> {
    /// Build a loop over an existing backend and event stream.
    pub async fn with_backend(
        config: WatcherConfig,
        backend: B,
        events: KernelEvents,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let accounts = collaborators.users.list_users().await?;
        let roots = UserRoots::new(accounts)?;

        let mut tree = WatchTree::new(backend).with_follow_symlinks(config.follow_symlinks);
        for root in roots.iter() {
            let report = tree.register_subtree(&root.home);
            if report.is_partial() {
                warn!(
                    owner = %root.owner,
                    home = %root.home.display(),
                    failed = report.failed,
                    unreadable = report.unreadable,
                    "home only partly watched"
                );
            }
            info!(
                owner = %root.owner,
                home = %root.home.display(),
                directories = report.registered.len(),
                "watching home"
            );
        }

        Ok(Self {
            config,
            translator: EventTranslator::new(tree),
            dispatcher: ScanDispatcher::new(roots, collaborators.users, collaborators.indexer),
            connection: collaborators.connection,
            events: Some(events),
            state: LoopState::Running,
            stop: StopHandle::new(),
        })
    }

    /// Use an externally created stop handle.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that stops this loop.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Watch statistics.
    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            watched_directories: self.translator.tree().len(),
            pending_moves: self.translator.moves().pending_count(),
            overflows: self.translator.overflows(),
        }
    }

    /// The translator, for inspection.
    pub fn translator(&self) -> &EventTranslator<B> {
        &self.translator
    }

    /// Run until stopped.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            watched = self.translator.tree().len(),
            poll_timeout_secs = self.config.poll_timeout().as_secs(),
            "event loop running"
        );
        loop {
            match self.run_once().await {
                Ok(Wake::Stopped) => return Ok(()),
                Ok(Wake::Timeout | Wake::Batch(_)) => {}
                Err(e) => {
                    error!("event loop failed: {e}");
                    self.shutdown();
                    return Err(e);
                }
            }
        }
    }

    /// Wait once for events and process whatever batch arrives.
    pub async fn run_once(&mut self) -> Result<Wake> {
        if self.state != LoopState::Running {
            return Ok(Wake::Stopped);
        }
        if self.stop.is_requested() {
            self.shutdown();
            return Ok(Wake::Stopped);
        }

        let poll_timeout = self.config.poll_timeout();
        let events = self.events.as_mut().ok_or(WatcherError::Stopped)?;
        let first = tokio::select! {
            biased;
            () = self.stop.requested() => None,
            next = tokio::time::timeout(poll_timeout, events.next()) => match next {
                Err(_) => return Ok(Wake::Timeout),
                Ok(None) => return Err(WatcherError::EventStreamClosed),
                Ok(Some(first)) => Some(first),
            },
        };
        let Some(first) = first else {
            self.shutdown();
            return Ok(Wake::Stopped);
        };

        let reconnect_failures =
            reconnect(self.connection.as_ref(), self.config.reconnect_backoff()).await;

        let (batch, read_errors) = self.drain(first);
        let events = batch.len();
        let rescans = self.translator.translate(batch);
        let rescan_count = rescans.len();
        let dispatch = self.dispatcher.dispatch(rescans).await;

        let report = BatchReport {
            events,
            read_errors,
            rescans: rescan_count,
            reconnect_failures,
            dispatch,
            processed_at: Utc::now(),
        };
        info!(
            events,
            rescans = rescan_count,
            completed = dispatch.completed,
            not_found = dispatch.not_found,
            locked = dispatch.locked,
            failed = dispatch.failed,
            "processed batch"
        );
        Ok(Wake::Batch(report))
    }

    /// Collect `first` and every event that is ready without blocking.
    fn drain(&mut self, first: io::Result<RawEvent>) -> (Vec<RawEvent>, usize) {
        let mut batch = Vec::new();
        let mut read_errors = 0;
        let mut push = |item: io::Result<RawEvent>| match item {
            Ok(event) => batch.push(event),
            Err(e) => {
                error!("failed to read kernel event: {e}");
                read_errors += 1;
            }
        };

        push(first);
        if let Some(events) = self.events.as_mut() {
            while let Some(Some(item)) = events.next().now_or_never() {
                push(item);
            }
        }
        (batch, read_errors)
    }

    /// Stop the loop and close the kernel instance. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopping;
        self.stop.request_stop();
        info!(
            watched = self.translator.tree().len(),
            pending_moves = self.translator.moves().pending_count(),
            "stopping event loop"
        );

        self.events = None;
        if let Err(e) = self.translator.tree_mut().close() {
            warn!("failed to close watch backend: {e}");
        }
        self.state = LoopState::Stopped;
        info!("event loop stopped");
    }
}
