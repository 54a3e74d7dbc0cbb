//! In-process [`Store`] used by tests and local dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::db::entities::{incident, insight, ping, target};
use crate::db::enums::{HttpMethod, InsightKind, TargetStatus};
use crate::db::models::{CheckUpdate, NewIncident, NewInsight, NewPing, StatusBucket, WindowStats};
use crate::db::store::{Store, StoreError};

#[derive(Default)]
struct State {
    targets: HashMap<i32, target::Model>,
    pings: Vec<ping::Model>,
    incidents: Vec<incident::Model>,
    insights: Vec<insight::Model>,
    next_ping_id: i64,
    next_incident_id: i32,
    next_insight_id: i32,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_target(&self, target: target::Model) {
        self.state.lock().await.targets.insert(target.id, target);
    }

    pub async fn target(&self, id: i32) -> Option<target::Model> {
        self.state.lock().await.targets.get(&id).cloned()
    }

    pub async fn pings(&self, target_id: i32) -> Vec<ping::Model> {
        let state = self.state.lock().await;
        state
            .pings
            .iter()
            .filter(|p| p.target_id == target_id)
            .cloned()
            .collect()
    }

    pub async fn incidents(&self, target_id: i32) -> Vec<incident::Model> {
        let state = self.state.lock().await;
        state
            .incidents
            .iter()
            .filter(|i| i.target_id == target_id)
            .cloned()
            .collect()
    }

    pub async fn insights(&self, target_id: i32) -> Vec<insight::Model> {
        let state = self.state.lock().await;
        state
            .insights
            .iter()
            .filter(|i| i.target_id == target_id)
            .cloned()
            .collect()
    }
}

/// A GET target that is active, PENDING and due immediately.
pub fn sample_target(id: i32, url: &str) -> target::Model {
    let now = Utc::now();
    target::Model {
        id,
        name: format!("target-{id}"),
        url: url.to_string(),
        method: HttpMethod::Get,
        headers: serde_json::Value::Array(Vec::new()),
        body: None,
        timeout_ms: 5_000,
        expected_status: 200,
        poll_interval_seconds: 60,
        is_active: true,
        is_deleted: false,
        status: TargetStatus::Pending,
        last_checked_at: None,
        next_due_at: now,
        last_response_time_ms: 0,
        alert_recipient: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn due_targets(&self, now: DateTime<Utc>) -> Result<Vec<target::Model>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<_> = state
            .targets
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.next_due_at, t.id));
        Ok(due)
    }

    async fn active_targets(&self) -> Result<Vec<target::Model>, StoreError> {
        let state = self.state.lock().await;
        let mut active: Vec<_> = state
            .targets
            .values()
            .filter(|t| t.is_active && !t.is_deleted)
            .cloned()
            .collect();
        active.sort_by_key(|t| t.id);
        Ok(active)
    }

    async fn record_check(&self, update: CheckUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let target = state
            .targets
            .get_mut(&update.target_id)
            .ok_or_else(|| StoreError::NotFound(format!("target {}", update.target_id)))?;
        target.status = update.status;
        target.last_checked_at = Some(update.last_checked_at);
        target.last_response_time_ms = update.last_response_time_ms;
        target.next_due_at = update.next_due_at;
        Ok(())
    }

    async fn append_ping(&self, new_ping: NewPing) -> Result<ping::Model, StoreError> {
        let mut state = self.state.lock().await;
        state.next_ping_id += 1;
        let model = ping::Model {
            id: state.next_ping_id,
            target_id: new_ping.target_id,
            status: new_ping.status,
            http_status_code: new_ping.http_status_code,
            latency_ms: new_ping.latency_ms,
            error_message: new_ping.error_message,
            checked_at: new_ping.checked_at,
        };
        state.pings.push(model.clone());
        Ok(model)
    }

    async fn latest_open_incident(
        &self,
        target_id: i32,
    ) -> Result<Option<incident::Model>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .incidents
            .iter()
            .filter(|i| i.target_id == target_id && !i.is_resolved)
            .max_by_key(|i| i.started_at)
            .cloned())
    }

    async fn open_incident(
        &self,
        new_incident: NewIncident,
    ) -> Result<incident::Model, StoreError> {
        let mut state = self.state.lock().await;
        state.next_incident_id += 1;
        let model = incident::Model {
            id: state.next_incident_id,
            target_id: new_incident.target_id,
            cause: new_incident.cause,
            started_at: new_incident.started_at,
            resolved_at: None,
            duration_seconds: None,
            is_resolved: false,
        };
        state.incidents.push(model.clone());
        Ok(model)
    }

    async fn resolve_incident(
        &self,
        incident_id: i32,
        resolved_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let incident = state
            .incidents
            .iter_mut()
            .find(|i| i.id == incident_id)
            .ok_or_else(|| StoreError::NotFound(format!("incident {incident_id}")))?;
        incident.resolved_at = Some(resolved_at);
        incident.duration_seconds = Some(duration_seconds);
        incident.is_resolved = true;
        Ok(())
    }

    async fn active_insight(
        &self,
        target_id: i32,
        kind: InsightKind,
    ) -> Result<Option<insight::Model>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .insights
            .iter()
            .find(|i| i.target_id == target_id && i.kind == kind && i.is_active)
            .cloned())
    }

    async fn insert_insight(&self, new_insight: NewInsight) -> Result<insight::Model, StoreError> {
        let mut state = self.state.lock().await;
        state.next_insight_id += 1;
        let model = insight::Model {
            id: state.next_insight_id,
            target_id: new_insight.target_id,
            kind: new_insight.kind,
            severity: new_insight.severity,
            details: new_insight.details,
            metric_value: new_insight.metric_value,
            is_active: true,
            created_at: new_insight.raised_at,
            updated_at: new_insight.raised_at,
        };
        state.insights.push(model.clone());
        Ok(model)
    }

    async fn update_insight(
        &self,
        insight_id: i32,
        details: String,
        metric_value: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let insight = state
            .insights
            .iter_mut()
            .find(|i| i.id == insight_id)
            .ok_or_else(|| StoreError::NotFound(format!("insight {insight_id}")))?;
        insight.details = details;
        insight.metric_value = metric_value;
        insight.updated_at = updated_at;
        Ok(())
    }

    async fn deactivate_insights(
        &self,
        target_id: i32,
        kind: InsightKind,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for insight in state
            .insights
            .iter_mut()
            .filter(|i| i.target_id == target_id && i.kind == kind && i.is_active)
        {
            insight.is_active = false;
            insight.updated_at = at;
            changed += 1;
        }
        Ok(changed)
    }

    async fn ping_window_stats(
        &self,
        target_id: i32,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, StoreError> {
        let state = self.state.lock().await;
        let mut buckets: Vec<StatusBucket> = Vec::new();
        for p in state
            .pings
            .iter()
            .filter(|p| p.target_id == target_id && p.checked_at >= since)
        {
            match buckets.iter_mut().find(|b| b.status == p.status) {
                Some(bucket) => {
                    bucket.count += 1;
                    bucket.latency_sum_ms += i64::from(p.latency_ms);
                }
                None => buckets.push(StatusBucket {
                    status: p.status,
                    count: 1,
                    latency_sum_ms: i64::from(p.latency_ms),
                }),
            }
        }
        Ok(WindowStats { buckets })
    }

    async fn prune_pings(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.pings.len();
        state.pings.retain(|p| p.checked_at >= older_than);
        Ok((before - state.pings.len()) as u64)
    }
}
