//! Idle-draft sweeper.
//!
//! Deletes incomplete drafts that have not been touched within the idle
//! window. Runs outside the intake core on its own timer.
//!
//! The sweeper does not take the driver's per-identity locks. A draft
//! deleted while a message for it is in flight is written back by that
//! message's upsert, with the answer applied and a fresh `updated_at`, so
//! the race loses no answers and only postpones expiry.

use std::sync::Arc;

use chrono::Utc;

use crate::config::SweeperConfig;
use crate::error::DatabaseError;
use crate::store::ProfileStore;

/// Run one sweep; returns how many drafts were removed.
pub async fn sweep_once(
    store: &dyn ProfileStore,
    idle_after: std::time::Duration,
) -> Result<usize, DatabaseError> {
    let window = chrono::Duration::from_std(idle_after)
        .map_err(|e| DatabaseError::Query(format!("idle window out of range: {e}")))?;
    store.expire_idle_drafts(Utc::now() - window).await
}

/// Spawn a background task that periodically expires idle drafts.
pub fn spawn_sweeper(
    store: Arc<dyn ProfileStore>,
    config: SweeperConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval);
        loop {
            interval.tick().await;
            match sweep_once(store.as_ref(), config.idle_after).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(expired = n, "Expired idle intake drafts"),
                Err(e) => tracing::warn!("Draft sweep failed: {e}"),
            }
        }
    })
}
