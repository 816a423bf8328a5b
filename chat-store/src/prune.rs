//! Background pruning of old synced messages.
//!
//! Runs periodically to keep the local replica bounded. Pending and failed
//! sends are never pruned; the store-level query excludes unsynced rows.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::store::LocalStore;

/// Configuration for the background prune task.
#[derive(Debug, Clone)]
pub struct PruneConfig {
    /// Whether pruning is enabled.
    pub enabled: bool,
    /// How often to run.
    pub interval: Duration,
    /// Synced messages older than this are deleted.
    pub max_age: Duration,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60 * 60),
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Spawn a background prune task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_prune_task(
    store: Arc<dyn LocalStore>,
    config: PruneConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("prune task disabled");
            return;
        }

        tracing::info!("prune task started (interval: {:?})", config.interval);
        let mut timer = interval(config.interval);

        loop {
            timer.tick().await;

            match store.prune_older_than(config.max_age).await {
                Ok(deleted) => {
                    if deleted > 0 {
                        tracing::info!("pruned {} old messages", deleted);
                    } else {
                        tracing::debug!("prune: nothing to delete");
                    }
                }
                Err(e) => {
                    tracing::error!("prune error: {}", e);
                }
            }
        }
    })
}
