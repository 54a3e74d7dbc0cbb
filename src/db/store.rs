use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::entities::{incident, insight, ping, target};
use crate::db::enums::InsightKind;
use crate::db::models::{CheckUpdate, NewIncident, NewInsight, NewPing, WindowStats};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence operations required by the monitoring engine.
///
/// Every write touches rows keyed by a single target, so distinct targets
/// can be processed concurrently against the same store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Verifies the store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Targets that are active, not deleted and due at `now`.
    async fn due_targets(&self, now: DateTime<Utc>) -> Result<Vec<target::Model>, StoreError>;

    /// Targets that are active and not deleted.
    async fn active_targets(&self) -> Result<Vec<target::Model>, StoreError>;

    async fn record_check(&self, update: CheckUpdate) -> Result<(), StoreError>;

    async fn append_ping(&self, ping: NewPing) -> Result<ping::Model, StoreError>;

    /// The most recently started unresolved incident of a target.
    async fn latest_open_incident(
        &self,
        target_id: i32,
    ) -> Result<Option<incident::Model>, StoreError>;

    async fn open_incident(&self, incident: NewIncident) -> Result<incident::Model, StoreError>;

    async fn resolve_incident(
        &self,
        incident_id: i32,
        resolved_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<(), StoreError>;

    async fn active_insight(
        &self,
        target_id: i32,
        kind: InsightKind,
    ) -> Result<Option<insight::Model>, StoreError>;

    async fn insert_insight(&self, insight: NewInsight) -> Result<insight::Model, StoreError>;

    async fn update_insight(
        &self,
        insight_id: i32,
        details: String,
        metric_value: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Deactivates every active insight of `(target_id, kind)` and returns how
    /// many rows changed.
    async fn deactivate_insights(
        &self,
        target_id: i32,
        kind: InsightKind,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Per-status counts and latency sums of pings checked at or after `since`.
    async fn ping_window_stats(
        &self,
        target_id: i32,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, StoreError>;

    /// Deletes pings checked before `older_than` and returns how many were removed.
    async fn prune_pings(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}
