//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rescan_watcher::{
    Connection, Indexer, ScanOutcome, ScanRequest, UserAccount, UserDirectory, WatchBackend,
    WatchHandle,
};

/// Install a test-friendly subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rescan_watcher=debug")
        .with_test_writer()
        .try_init();
}

/// Kernel stand-in that hands out sequential handles.
#[derive(Debug, Default)]
pub struct FakeBackend {
    next: i32,
    pub live: HashMap<WatchHandle, PathBuf>,
}

impl WatchBackend for FakeBackend {
    fn add_watch(&mut self, path: &Path) -> io::Result<WatchHandle> {
        if let Some((handle, _)) = self.live.iter().find(|(_, p)| p.as_path() == path) {
            return Ok(*handle);
        }
        self.next += 1;
        let handle = WatchHandle::new(self.next);
        self.live.insert(handle, path.to_path_buf());
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()> {
        self.live
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
    }
}

/// Fixed list of accounts.
pub struct Users(pub Vec<UserAccount>);

#[async_trait]
impl UserDirectory for Users {
    async fn list_users(&self) -> anyhow::Result<Vec<UserAccount>> {
        Ok(self.0.clone())
    }
}

/// Records every request and reports success.
#[derive(Default)]
pub struct RecordingIndexer {
    requests: Mutex<Vec<(String, PathBuf)>>,
}

impl RecordingIndexer {
    /// Take the requests seen since the last call.
    pub fn take(&self) -> Vec<(String, PathBuf)> {
        let mut requests = std::mem::take(&mut *self.requests.lock().unwrap());
        requests.sort();
        requests
    }
}

#[async_trait]
impl Indexer for RecordingIndexer {
    async fn scan(&self, request: &ScanRequest) -> ScanOutcome {
        self.requests
            .lock()
            .unwrap()
            .push((request.owner.to_string(), request.relative_path.clone()));
        ScanOutcome::Completed
    }
}

/// A database that is always reachable.
pub struct AlwaysConnected;

#[async_trait]
impl Connection for AlwaysConnected {
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }
}

/// `(owner, relative path)` pair as recorded by [`RecordingIndexer`].
pub fn request(owner: &str, relative: &str) -> (String, PathBuf) {
    (owner.to_string(), PathBuf::from(relative))
}
