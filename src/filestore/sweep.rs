use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::StoreInner;
use crate::error::{FilesError, Result};
use crate::utils::task::AbortOnDrop;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub(super) fn spawn_sweeper(inner: Arc<StoreInner>, period: Duration) -> AbortOnDrop {
    let period = period.max(MIN_SWEEP_INTERVAL);
    AbortOnDrop::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let inner = inner.clone();
            match tokio::task::spawn_blocking(move || inner.sweep_expired()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "gemini file store: expiry sweep failed");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "gemini file store: expiry sweep task failed");
                }
            }
        }
    })
}

impl StoreInner {
    /// Removes every record past its expiry. Sidecars that fail to parse are
    /// logged and left in place.
    pub(super) fn sweep_expired(&self) -> Result<usize> {
        let guard = self.write_lock();
        let now = self.clock.now();
        let mut removed = 0usize;

        for file_id in self.metadata_ids()? {
            let record = match self.load_record(&file_id) {
                Ok(record) => record,
                Err(FilesError::NotFound) => continue,
                Err(err) => {
                    tracing::warn!(file_id = file_id.as_str(), error = %err, "gemini file store: skipping unreadable metadata during sweep");
                    continue;
                }
            };
            if !record.is_expired(now) {
                continue;
            }
            match self.delete_unlocked(&guard, &file_id) {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(file_id = file_id.as_str(), error = %err, "gemini file store: failed to delete expired file");
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, total_bytes = self.total_bytes(), "gemini file store: swept expired files");
        }
        Ok(removed)
    }
}
