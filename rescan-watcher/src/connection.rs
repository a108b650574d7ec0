//! Database connection revalidation.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// The indexer's database connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Close the connection.
    async fn close(&self) -> anyhow::Result<()>;

    /// Open the connection.
    async fn connect(&self) -> anyhow::Result<()>;

    /// Whether the connection is usable.
    async fn is_connected(&self) -> bool;
}

/// Close and reopen `connection`, retrying forever with a fixed pause.
///
/// Returns how many attempts failed before the connection came back.
pub async fn reconnect(connection: &dyn Connection, backoff: Duration) -> u32 {
    if let Err(e) = connection.close().await {
        debug!("ignoring close failure: {e}");
    }

    let mut failures = 0u32;
    loop {
        if let Err(e) = connection.connect().await {
            warn!(attempt = failures + 1, "database connect failed: {e}");
        }
        if connection.is_connected().await {
            if failures > 0 {
                info!(failures, "database connection restored");
            }
            return failures;
        }

        failures += 1;
        warn!(
            attempt = failures,
            backoff_secs = backoff.as_secs(),
            "database unavailable, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}
