use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};

use crate::db::store::{Store, StoreError};

/// Deletes pings that fall outside the retention horizon.
pub struct RetentionTask {
    store: Arc<dyn Store>,
    retention_days: u32,
}

impl RetentionTask {
    pub fn new(store: Arc<dyn Store>, retention_days: u32) -> Self {
        Self {
            store,
            retention_days,
        }
    }

    /// `None` when the horizon reaches before the earliest representable
    /// time, in which case nothing has expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Duration::try_days(i64::from(self.retention_days))
            .and_then(|retention| now.checked_sub_signed(retention))
    }

    #[instrument(skip(self), fields(retention_days = self.retention_days))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let Some(cutoff) = self.cutoff(now) else {
            debug!("Retention horizon exceeds the time range. Nothing to prune.");
            return Ok(0);
        };
        let deleted = self.store.prune_pings(cutoff).await?;
        if deleted > 0 {
            info!(deleted, %cutoff, "Pruned pings past the retention horizon.");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::PingStatus;
    use crate::db::memory_store::MemoryStore;
    use crate::db::models::NewPing;

    #[tokio::test]
    async fn removes_only_expired_pings() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for age_days in [0, 29, 31, 90] {
            store
                .append_ping(NewPing {
                    target_id: 1,
                    status: PingStatus::Up,
                    http_status_code: 200,
                    latency_ms: 10,
                    error_message: None,
                    checked_at: now - Duration::days(age_days),
                })
                .await
                .unwrap();
        }

        let task = RetentionTask::new(store.clone(), 30);
        assert_eq!(task.run_once(now).await.unwrap(), 2);
        assert_eq!(store.pings(1).await.len(), 2);
        assert_eq!(task.run_once(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_retention_prunes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .append_ping(NewPing {
                target_id: 1,
                status: PingStatus::Up,
                http_status_code: 200,
                latency_ms: 10,
                error_message: None,
                checked_at: now - Duration::days(3650),
            })
            .await
            .unwrap();

        let task = RetentionTask::new(store.clone(), u32::MAX);
        assert_eq!(task.cutoff(now), None);
        assert_eq!(task.run_once(now).await.unwrap(), 0);
        assert_eq!(store.pings(1).await.len(), 1);
    }
}
