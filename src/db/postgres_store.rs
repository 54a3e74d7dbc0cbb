use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    FromQueryResult, Order, QueryFilter, QueryOrder, QuerySelect, Set,
    sea_query::{Expr, Func},
};
use tracing::{debug, info};

use crate::db::entities::{incident, insight, ping, target};
use crate::db::enums::{InsightKind, PingStatus};
use crate::db::models::{CheckUpdate, NewIncident, NewInsight, NewPing, StatusBucket, WindowStats};
use crate::db::store::{Store, StoreError};

#[derive(FromQueryResult, Debug)]
struct StatusBucketRow {
    status: PingStatus,
    sample_count: i64,
    latency_sum_ms: Option<i64>,
}

/// Postgres-backed [`Store`] built on a sea-orm connection pool.
#[derive(Clone)]
pub struct PgStore {
    db: DatabaseConnection,
}

impl PgStore {
    /// Connects, applies pending migrations and verifies the connection.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(max_connections).sqlx_logging(false);

        let db = Database::connect(opt).await?;
        sqlx::migrate!("./migrations")
            .run(db.get_postgres_connection_pool())
            .await?;
        db.ping().await?;
        info!(max_connections, "Database connection established and migrations applied.");
        Ok(Self { db })
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.db.clone().close().await?;
        info!("Database connection pool closed.");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.db.ping().await.map_err(StoreError::from)
    }

    async fn due_targets(&self, now: DateTime<Utc>) -> Result<Vec<target::Model>, StoreError> {
        let targets = target::Entity::find()
            .filter(target::Column::IsActive.eq(true))
            .filter(target::Column::IsDeleted.eq(false))
            .filter(target::Column::NextDueAt.lte(now))
            .order_by(target::Column::NextDueAt, Order::Asc)
            .all(&self.db)
            .await?;
        Ok(targets)
    }

    async fn active_targets(&self) -> Result<Vec<target::Model>, StoreError> {
        let targets = target::Entity::find()
            .filter(target::Column::IsActive.eq(true))
            .filter(target::Column::IsDeleted.eq(false))
            .order_by(target::Column::Id, Order::Asc)
            .all(&self.db)
            .await?;
        Ok(targets)
    }

    async fn record_check(&self, update: CheckUpdate) -> Result<(), StoreError> {
        let result = target::Entity::update_many()
            .col_expr(target::Column::Status, Expr::value(update.status))
            .col_expr(target::Column::LastCheckedAt, Expr::value(update.last_checked_at))
            .col_expr(
                target::Column::LastResponseTimeMs,
                Expr::value(update.last_response_time_ms),
            )
            .col_expr(target::Column::NextDueAt, Expr::value(update.next_due_at))
            .filter(target::Column::Id.eq(update.target_id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(format!("target {}", update.target_id)));
        }
        Ok(())
    }

    async fn append_ping(&self, new_ping: NewPing) -> Result<ping::Model, StoreError> {
        let model = ping::ActiveModel {
            target_id: Set(new_ping.target_id),
            status: Set(new_ping.status),
            http_status_code: Set(new_ping.http_status_code),
            latency_ms: Set(new_ping.latency_ms),
            error_message: Set(new_ping.error_message),
            checked_at: Set(new_ping.checked_at),
            ..Default::default()
        };
        Ok(model.insert(&self.db).await?)
    }

    async fn latest_open_incident(
        &self,
        target_id: i32,
    ) -> Result<Option<incident::Model>, StoreError> {
        let found = incident::Entity::find()
            .filter(incident::Column::TargetId.eq(target_id))
            .filter(incident::Column::IsResolved.eq(false))
            .order_by(incident::Column::StartedAt, Order::Desc)
            .one(&self.db)
            .await?;
        Ok(found)
    }

    async fn open_incident(
        &self,
        new_incident: NewIncident,
    ) -> Result<incident::Model, StoreError> {
        let model = incident::ActiveModel {
            target_id: Set(new_incident.target_id),
            cause: Set(new_incident.cause),
            started_at: Set(new_incident.started_at),
            resolved_at: Set(None),
            duration_seconds: Set(None),
            is_resolved: Set(false),
            ..Default::default()
        };
        Ok(model.insert(&self.db).await?)
    }

    async fn resolve_incident(
        &self,
        incident_id: i32,
        resolved_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<(), StoreError> {
        let model = incident::ActiveModel {
            id: Set(incident_id),
            resolved_at: Set(Some(resolved_at)),
            duration_seconds: Set(Some(duration_seconds)),
            is_resolved: Set(true),
            ..Default::default()
        };
        model.update(&self.db).await?;
        Ok(())
    }

    async fn active_insight(
        &self,
        target_id: i32,
        kind: InsightKind,
    ) -> Result<Option<insight::Model>, StoreError> {
        let found = insight::Entity::find()
            .filter(insight::Column::TargetId.eq(target_id))
            .filter(insight::Column::Kind.eq(kind))
            .filter(insight::Column::IsActive.eq(true))
            .one(&self.db)
            .await?;
        Ok(found)
    }

    async fn insert_insight(&self, new_insight: NewInsight) -> Result<insight::Model, StoreError> {
        let model = insight::ActiveModel {
            target_id: Set(new_insight.target_id),
            kind: Set(new_insight.kind),
            severity: Set(new_insight.severity),
            details: Set(new_insight.details),
            metric_value: Set(new_insight.metric_value),
            is_active: Set(true),
            created_at: Set(new_insight.raised_at),
            updated_at: Set(new_insight.raised_at),
            ..Default::default()
        };
        Ok(model.insert(&self.db).await?)
    }

    async fn update_insight(
        &self,
        insight_id: i32,
        details: String,
        metric_value: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let model = insight::ActiveModel {
            id: Set(insight_id),
            details: Set(details),
            metric_value: Set(metric_value),
            updated_at: Set(updated_at),
            ..Default::default()
        };
        model.update(&self.db).await?;
        Ok(())
    }

    async fn deactivate_insights(
        &self,
        target_id: i32,
        kind: InsightKind,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = insight::Entity::update_many()
            .col_expr(insight::Column::IsActive, Expr::value(false))
            .col_expr(insight::Column::UpdatedAt, Expr::value(at))
            .filter(insight::Column::TargetId.eq(target_id))
            .filter(insight::Column::Kind.eq(kind))
            .filter(insight::Column::IsActive.eq(true))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn ping_window_stats(
        &self,
        target_id: i32,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, StoreError> {
        let rows = ping::Entity::find()
            .select_only()
            .column(ping::Column::Status)
            .column_as(
                Expr::expr(Func::count(Expr::col(ping::Column::Id))),
                "sample_count",
            )
            .column_as(
                Expr::expr(Func::sum(Expr::col(ping::Column::LatencyMs))),
                "latency_sum_ms",
            )
            .filter(ping::Column::TargetId.eq(target_id))
            .filter(ping::Column::CheckedAt.gte(since))
            .group_by(ping::Column::Status)
            .into_model::<StatusBucketRow>()
            .all(&self.db)
            .await?;

        Ok(WindowStats {
            buckets: rows
                .into_iter()
                .map(|row| StatusBucket {
                    status: row.status,
                    count: row.sample_count,
                    latency_sum_ms: row.latency_sum_ms.unwrap_or(0),
                })
                .collect(),
        })
    }

    async fn prune_pings(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = ping::Entity::delete_many()
            .filter(ping::Column::CheckedAt.lt(older_than))
            .exec(&self.db)
            .await?;
        debug!(deleted = result.rows_affected, %older_than, "Pruned expired pings.");
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{InsightSeverity, TargetStatus};
    use crate::db::memory_store::sample_target;
    use chrono::{Duration, SubsecRound};
    use sea_orm::{ActiveValue::NotSet, ModelTrait};

    async fn connect() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgStore::connect(&url, 2).await.unwrap()
    }

    async fn insert_target(store: &PgStore, url: &str) -> target::Model {
        let mut model: target::ActiveModel = sample_target(0, url).into();
        model.id = NotSet;
        model.insert(&store.db).await.unwrap()
    }

    fn new_ping(
        target_id: i32,
        status: PingStatus,
        latency_ms: i32,
        at: DateTime<Utc>,
    ) -> NewPing {
        NewPing {
            target_id,
            status,
            http_status_code: if status.is_up() { 200 } else { 0 },
            latency_ms,
            error_message: None,
            checked_at: at,
        }
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a disposable Postgres database"]
    async fn round_trips_engine_writes() {
        let store = connect().await;
        store.health_check().await.unwrap();
        let now = Utc::now().trunc_subsecs(0);
        let target = insert_target(&store, "http://pg.test/health").await;

        let due = store.due_targets(now + Duration::seconds(1)).await.unwrap();
        assert!(due.iter().any(|t| t.id == target.id));

        store
            .record_check(CheckUpdate {
                target_id: target.id,
                status: TargetStatus::Up,
                last_checked_at: now,
                last_response_time_ms: 120,
                next_due_at: now + Duration::seconds(60),
            })
            .await
            .unwrap();
        let due = store.due_targets(now + Duration::seconds(1)).await.unwrap();
        assert!(!due.iter().any(|t| t.id == target.id));
        let missing = store
            .record_check(CheckUpdate {
                target_id: -1,
                status: TargetStatus::Up,
                last_checked_at: now,
                last_response_time_ms: 0,
                next_due_at: now,
            })
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        for (status, latency) in [
            (PingStatus::Up, 100),
            (PingStatus::Up, 300),
            (PingStatus::Timeout, 5000),
        ] {
            store
                .append_ping(new_ping(target.id, status, latency, now))
                .await
                .unwrap();
        }
        let stats = store
            .ping_window_stats(target.id, now - Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.up_avg_latency_ms(), 200.0);

        let opened = store
            .open_incident(NewIncident {
                target_id: target.id,
                cause: "connection refused".to_string(),
                started_at: now,
            })
            .await
            .unwrap();
        let open = store.latest_open_incident(target.id).await.unwrap();
        assert_eq!(open.map(|i| i.id), Some(opened.id));
        store
            .resolve_incident(opened.id, now + Duration::seconds(65), 65)
            .await
            .unwrap();
        assert!(store.latest_open_incident(target.id).await.unwrap().is_none());

        let raised = store
            .insert_insight(NewInsight {
                target_id: target.id,
                kind: InsightKind::ReliabilityIssue,
                severity: InsightSeverity::Critical,
                details: "High failure rate".to_string(),
                metric_value: 66.7,
                raised_at: now,
            })
            .await
            .unwrap();
        store
            .update_insight(raised.id, "Still failing".to_string(), 80.0, now)
            .await
            .unwrap();
        let active = store
            .active_insight(target.id, InsightKind::ReliabilityIssue)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.details, "Still failing");
        assert_eq!(
            store
                .deactivate_insights(target.id, InsightKind::ReliabilityIssue, now)
                .await
                .unwrap(),
            1
        );

        store
            .append_ping(new_ping(target.id, PingStatus::Up, 10, now - Duration::days(4000)))
            .await
            .unwrap();
        assert!(store.prune_pings(now - Duration::days(3999)).await.unwrap() >= 1);
        let stats = store
            .ping_window_stats(target.id, now - Duration::days(5000))
            .await
            .unwrap();
        assert_eq!(stats.total(), 3);

        target.delete(&store.db).await.unwrap();
        store.close().await.unwrap();
    }
}
