//! Hands rescan targets to the indexer, one owner-relative path at a time.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::event::RescanSet;
use crate::indexer::{Indexer, ScanOutcome, ScanRequest};
use crate::users::{OwnerId, UserDirectory, UserRoots};

/// Per-outcome counts for one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Targets re-indexed.
    pub completed: usize,

    /// Targets that vanished before the scan.
    pub not_found: usize,

    /// Targets locked by another process.
    pub locked: usize,

    /// Targets whose scan failed for any other reason.
    pub failed: usize,

    /// Targets no current owner could be found for.
    pub unattributed: usize,
}

impl DispatchReport {
    /// Number of scans actually attempted.
    pub fn attempted(&self) -> usize {
        self.completed + self.not_found + self.locked + self.failed
    }
}

/// Resolves rescan targets to owners and invokes the indexer.
pub struct ScanDispatcher {
    roots: UserRoots,
    users: Arc<dyn UserDirectory>,
    indexer: Arc<dyn Indexer>,
}

impl ScanDispatcher {
    /// Create a dispatcher over the startup roots.
    pub fn new(roots: UserRoots, users: Arc<dyn UserDirectory>, indexer: Arc<dyn Indexer>) -> Self {
        Self {
            roots,
            users,
            indexer,
        }
    }

    /// Scan every target in order. A failing target never stops the rest.
    pub async fn dispatch(&self, rescans: RescanSet) -> DispatchReport {
        let mut report = DispatchReport::default();
        if rescans.is_empty() {
            return report;
        }

        let active = self.active_owners().await;

        for path in rescans.to_sorted_vec() {
            let Some(target) = self.roots.resolve(&path) else {
                trace!(path = %path.display(), "no owner for rescan target");
                report.unattributed += 1;
                continue;
            };

            if let Some(active) = &active {
                if !active.contains(&target.owner) {
                    debug!(owner = %target.owner, path = %path.display(), "owner no longer listed");
                    report.unattributed += 1;
                    continue;
                }
            }

            let request = if rescans.is_recursive(&path) {
                ScanRequest::from(target).recursive()
            } else {
                ScanRequest::from(target)
            };
            match self.indexer.scan(&request).await {
                ScanOutcome::Completed => {
                    debug!(owner = %request.owner, path = %request.relative_path.display(), "rescanned");
                    report.completed += 1;
                }
                ScanOutcome::NotFound => {
                    info!(owner = %request.owner, path = %request.relative_path.display(), "rescan target vanished");
                    report.not_found += 1;
                }
                ScanOutcome::Locked => {
                    info!(owner = %request.owner, path = %request.relative_path.display(), "rescan target locked, skipping");
                    report.locked += 1;
                }
                ScanOutcome::Failed(e) => {
                    error!(owner = %request.owner, path = %request.relative_path.display(), "rescan failed: {e:#}");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Owners present right now, or `None` to trust the startup roots.
    async fn active_owners(&self) -> Option<HashSet<OwnerId>> {
        match self.users.list_users().await {
            Ok(accounts) => Some(accounts.into_iter().map(|account| account.owner).collect()),
            Err(e) => {
                warn!("listing users failed, using startup roots: {e:#}");
                None
            }
        }
    }
}
