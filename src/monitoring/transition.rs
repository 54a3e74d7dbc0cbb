use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::db::entities::target;
use crate::db::enums::TargetStatus;
use crate::db::models::{CheckUpdate, NewIncident, NewPing};
use crate::db::store::{Store, StoreError};
use crate::monitoring::prober::ProbeResult;
use crate::notifications::Notifier;

/// How a probe result moves a target between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// UP to DOWN or TIMEOUT.
    WentDown,
    /// DOWN or TIMEOUT to UP.
    Recovered,
    /// No change, leaving PENDING, or DOWN <-> TIMEOUT.
    Steady,
}

pub fn classify_transition(prior: TargetStatus, next: TargetStatus) -> Transition {
    match (prior, next) {
        (TargetStatus::Up, next) if next.is_failing() => Transition::WentDown,
        (prior, TargetStatus::Up) if prior.is_failing() => Transition::Recovered,
        _ => Transition::Steady,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Unchanged,
    IncidentOpened {
        incident_id: i32,
    },
    IncidentResolved {
        incident_id: i32,
        duration_seconds: i64,
    },
}

/// `125` -> `"2m 5s"`.
pub fn format_downtime(duration_seconds: i64) -> String {
    let secs = duration_seconds.max(0);
    format!("{}m {}s", secs / 60, secs % 60)
}

pub fn alert_subject(name: &str) -> String {
    format!("Alert: {name} is DOWN")
}

pub fn recovery_subject(name: &str) -> String {
    format!("Resolved: {name} is UP")
}

fn alert_body(target: &target::Model, cause: &str, at: DateTime<Utc>) -> String {
    format!(
        "Target {} is unreachable.\nURL: {}\nReason: {}\nTime: {}",
        target.name,
        target.url,
        cause,
        at.to_rfc3339()
    )
}

fn recovery_body(target: &target::Model, duration_seconds: i64, at: DateTime<Utc>) -> String {
    format!(
        "Target {} is back online.\nURL: {}\nDowntime duration: {}\nTime: {}",
        target.name,
        target.url,
        format_downtime(duration_seconds),
        at.to_rfc3339()
    )
}

pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Applies probe results to stored state: ping history, target status and
/// the incident lifecycle.
pub struct TransitionManager {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    notify_timeout: Duration,
}

impl TransitionManager {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    /// Caps how long a single alert or recovery message may take. A message
    /// still pending at the deadline is dropped.
    pub fn with_notify_timeout(mut self, notify_timeout: Duration) -> Self {
        self.notify_timeout = notify_timeout;
        self
    }

    /// `target` is the snapshot taken before probing; its status is the prior state.
    pub async fn apply(
        &self,
        target: &target::Model,
        result: &ProbeResult,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let new_status = TargetStatus::from(result.status);

        self.store
            .append_ping(NewPing {
                target_id: target.id,
                status: result.status,
                http_status_code: result.http_status_code,
                latency_ms: result.latency_ms,
                error_message: result.error_message.clone(),
                checked_at: now,
            })
            .await?;

        self.store
            .record_check(CheckUpdate {
                target_id: target.id,
                status: new_status,
                last_checked_at: now,
                last_response_time_ms: result.latency_ms,
                next_due_at: now + target.poll_interval(),
            })
            .await?;

        match classify_transition(target.status, new_status) {
            Transition::WentDown => self.open_incident(target, result, new_status, now).await,
            Transition::Recovered => self.resolve_incident(target, now).await,
            Transition::Steady => Ok(TransitionOutcome::Unchanged),
        }
    }

    async fn open_incident(
        &self,
        target: &target::Model,
        result: &ProbeResult,
        new_status: TargetStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        // At most one unresolved incident per target.
        if let Some(existing) = self.store.latest_open_incident(target.id).await? {
            warn!(
                target_id = target.id,
                incident_id = existing.id,
                "Target went down with an incident already open. Keeping the existing one."
            );
            return Ok(TransitionOutcome::IncidentOpened {
                incident_id: existing.id,
            });
        }

        let cause = result
            .error_message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("Status changed to {new_status}"));

        let incident = self
            .store
            .open_incident(NewIncident {
                target_id: target.id,
                cause: cause.clone(),
                started_at: now,
            })
            .await?;
        info!(
            target_id = target.id,
            target_name = %target.name,
            incident_id = incident.id,
            %cause,
            "Target went DOWN. Incident opened."
        );

        self.notify(
            target,
            &alert_subject(&target.name),
            &alert_body(target, &cause, now),
        )
        .await;

        Ok(TransitionOutcome::IncidentOpened {
            incident_id: incident.id,
        })
    }

    async fn resolve_incident(
        &self,
        target: &target::Model,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let Some(incident) = self.store.latest_open_incident(target.id).await? else {
            info!(
                target_id = target.id,
                "Target recovered with no open incident to resolve."
            );
            return Ok(TransitionOutcome::Unchanged);
        };

        let duration_seconds = (now - incident.started_at).num_seconds().max(0);
        self.store
            .resolve_incident(incident.id, now, duration_seconds)
            .await?;
        info!(
            target_id = target.id,
            target_name = %target.name,
            incident_id = incident.id,
            duration_seconds,
            "Target recovered. Incident resolved."
        );

        self.notify(
            target,
            &recovery_subject(&target.name),
            &recovery_body(target, duration_seconds, now),
        )
        .await;

        Ok(TransitionOutcome::IncidentResolved {
            incident_id: incident.id,
            duration_seconds,
        })
    }

    async fn notify(&self, target: &target::Model, subject: &str, body: &str) {
        let recipient = target.alert_recipient.as_deref().unwrap_or_default();
        let delivery = self.notifier.send(recipient, subject, body);
        match tokio::time::timeout(self.notify_timeout, delivery).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    target_id = target.id,
                    error = %e,
                    %subject,
                    "Failed to deliver notification."
                );
            }
            Err(_) => {
                warn!(
                    target_id = target.id,
                    timeout_ms = self.notify_timeout.as_millis() as u64,
                    %subject,
                    "Notification delivery timed out. Dropping it."
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::enums::PingStatus;
    use crate::db::memory_store::{MemoryStore, sample_target};
    use crate::notifications::NotificationError;
    use crate::notifications::senders::SenderError;
    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::Mutex;

    /// Records every message it is asked to deliver.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            recipient: &str,
            subject: &str,
            body: &str,
        ) -> Result<(), NotificationError> {
            self.sent.lock().await.push((
                recipient.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    pub(crate) struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), NotificationError> {
            Err(NotificationError::SenderError {
                channel: "webhook",
                source: SenderError::SendFailed("unreachable".to_string()),
            })
        }
    }

    /// Never completes a delivery.
    pub(crate) struct HangingNotifier;

    #[async_trait]
    impl Notifier for HangingNotifier {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), NotificationError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn result(status: PingStatus, error: Option<&str>) -> ProbeResult {
        ProbeResult {
            status,
            http_status_code: if status.is_up() { 200 } else { 0 },
            latency_ms: 42,
            error_message: error.map(str::to_string),
        }
    }

    async fn setup(
        status: TargetStatus,
    ) -> (Arc<MemoryStore>, Arc<RecordingNotifier>, TransitionManager) {
        let store = Arc::new(MemoryStore::new());
        let mut target = sample_target(7, "http://api.test/health");
        target.name = "api".to_string();
        target.status = status;
        target.alert_recipient = Some("ops@example.com".to_string());
        store.insert_target(target).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = TransitionManager::new(store.clone(), notifier.clone());
        (store, notifier, manager)
    }

    #[test]
    fn classifies_transitions() {
        use TargetStatus::*;
        assert_eq!(classify_transition(Up, Down), Transition::WentDown);
        assert_eq!(classify_transition(Up, Timeout), Transition::WentDown);
        assert_eq!(classify_transition(Down, Up), Transition::Recovered);
        assert_eq!(classify_transition(Timeout, Up), Transition::Recovered);
        assert_eq!(classify_transition(Down, Timeout), Transition::Steady);
        assert_eq!(classify_transition(Timeout, Down), Transition::Steady);
        assert_eq!(classify_transition(Pending, Down), Transition::Steady);
        assert_eq!(classify_transition(Pending, Up), Transition::Steady);
        assert_eq!(classify_transition(Up, Up), Transition::Steady);
    }

    #[test]
    fn formats_downtime_as_minutes_and_seconds() {
        assert_eq!(format_downtime(0), "0m 0s");
        assert_eq!(format_downtime(59), "0m 59s");
        assert_eq!(format_downtime(125), "2m 5s");
        assert_eq!(format_downtime(-3), "0m 0s");
    }

    #[tokio::test]
    async fn every_probe_appends_ping_and_advances_next_due() {
        let (store, notifier, manager) = setup(TargetStatus::Pending).await;
        let target = store.target(7).await.unwrap();
        let now = Utc::now();

        let outcome = manager
            .apply(&target, &result(PingStatus::Up, None), now)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged);

        let updated = store.target(7).await.unwrap();
        assert_eq!(updated.status, TargetStatus::Up);
        assert_eq!(updated.last_checked_at, Some(now));
        assert_eq!(updated.last_response_time_ms, 42);
        assert_eq!(updated.next_due_at, now + Duration::seconds(60));
        assert_eq!(store.pings(7).await.len(), 1);
        assert!(notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn down_then_up_opens_and_resolves_one_incident() {
        let (store, notifier, manager) = setup(TargetStatus::Up).await;
        let down_at = Utc::now();

        let target = store.target(7).await.unwrap();
        let outcome = manager
            .apply(&target, &result(PingStatus::Down, Some("connection refused")), down_at)
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::IncidentOpened { .. }));

        let incidents = store.incidents(7).await;
        assert_eq!(incidents.len(), 1);
        assert!(!incidents[0].is_resolved);
        assert_eq!(incidents[0].cause, "connection refused");
        assert_eq!(incidents[0].started_at, down_at);

        let up_at = down_at + Duration::seconds(125);
        let target = store.target(7).await.unwrap();
        let outcome = manager
            .apply(&target, &result(PingStatus::Up, None), up_at)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::IncidentResolved {
                incident_id: incidents[0].id,
                duration_seconds: 125,
            }
        );

        let incidents = store.incidents(7).await;
        assert_eq!(incidents.len(), 1);
        assert!(incidents[0].is_resolved);
        assert_eq!(incidents[0].resolved_at, Some(up_at));
        assert_eq!(incidents[0].duration_seconds, Some(125));

        let sent = notifier.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "ops@example.com");
        assert_eq!(sent[0].1, "Alert: api is DOWN");
        assert!(sent[0].2.contains("connection refused"));
        assert_eq!(sent[1].1, "Resolved: api is UP");
        assert!(sent[1].2.contains("2m 5s"));
    }

    #[tokio::test]
    async fn cause_falls_back_to_status_change() {
        let (store, _, manager) = setup(TargetStatus::Up).await;
        let target = store.target(7).await.unwrap();
        manager
            .apply(&target, &result(PingStatus::Down, None), Utc::now())
            .await
            .unwrap();
        assert_eq!(store.incidents(7).await[0].cause, "Status changed to DOWN");
    }

    #[tokio::test]
    async fn down_timeout_flapping_leaves_incidents_alone() {
        let (store, notifier, manager) = setup(TargetStatus::Down).await;
        let now = Utc::now();

        let target = store.target(7).await.unwrap();
        let timed_out = result(PingStatus::Timeout, Some("Request timed out after 5000ms"));
        let outcome = manager.apply(&target, &timed_out, now).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged);

        let target = store.target(7).await.unwrap();
        assert_eq!(target.status, TargetStatus::Timeout);
        let refused = result(PingStatus::Down, Some("refused"));
        manager
            .apply(&target, &refused, now + Duration::seconds(60))
            .await
            .unwrap();

        assert!(store.incidents(7).await.is_empty());
        assert!(notifier.sent.lock().await.is_empty());
        assert_eq!(store.pings(7).await.len(), 2);
    }

    #[tokio::test]
    async fn failing_notifier_does_not_block_writes() {
        let store = Arc::new(MemoryStore::new());
        let mut target = sample_target(3, "http://api.test");
        target.status = TargetStatus::Up;
        store.insert_target(target.clone()).await;
        let manager = TransitionManager::new(store.clone(), Arc::new(FailingNotifier));

        let timed_out = result(PingStatus::Timeout, Some("Request timed out after 5000ms"));
        let outcome = manager.apply(&target, &timed_out, Utc::now()).await.unwrap();

        assert!(matches!(outcome, TransitionOutcome::IncidentOpened { .. }));
        assert_eq!(store.incidents(3).await.len(), 1);
        assert_eq!(store.target(3).await.unwrap().status, TargetStatus::Timeout);
    }

    #[tokio::test]
    async fn stalled_notifier_is_abandoned_after_the_deadline() {
        let store = Arc::new(MemoryStore::new());
        let mut target = sample_target(4, "http://api.test");
        target.status = TargetStatus::Up;
        store.insert_target(target.clone()).await;
        let manager = TransitionManager::new(store.clone(), Arc::new(HangingNotifier))
            .with_notify_timeout(std::time::Duration::from_millis(100));

        let refused = result(PingStatus::Down, Some("connection refused"));
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            manager.apply(&target, &refused, Utc::now()),
        )
        .await
        .expect("apply must not wait on a stalled notifier")
        .unwrap();

        assert!(matches!(outcome, TransitionOutcome::IncidentOpened { .. }));
        assert_eq!(store.incidents(4).await.len(), 1);
        assert_eq!(store.target(4).await.unwrap().status, TargetStatus::Down);
    }
}
