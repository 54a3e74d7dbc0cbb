use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use tracing::{debug, error, info};

use crate::db::entities::target;
use crate::db::enums::{InsightKind, InsightSeverity};
use crate::db::models::{NewInsight, WindowStats};
use crate::db::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Store error for target {target_id}: {source}")]
    StoreError {
        target_id: i32,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsSettings {
    pub check_window_secs: u64,
    /// Must be longer than the check window, which it contains.
    pub baseline_window_secs: u64,
    pub reliability_threshold_percent: f64,
    pub min_samples: i64,
    pub degradation_factor: f64,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            check_window_secs: 60,
            baseline_window_secs: 600,
            reliability_threshold_percent: 10.0,
            min_samples: 2,
            degradation_factor: 1.5,
        }
    }
}

/// What a single check concluded for one (target, kind).
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Raise {
        severity: InsightSeverity,
        details: String,
        metric_value: f64,
    },
    Resolve,
    /// Not enough signal to decide either way.
    Skip,
}

pub fn reliability_verdict(stats: &WindowStats, settings: &AnalyticsSettings) -> Verdict {
    if stats.total() < settings.min_samples.max(1) {
        return Verdict::Skip;
    }
    let Some(failure_rate) = stats.failure_rate_percent() else {
        return Verdict::Skip;
    };
    if failure_rate > settings.reliability_threshold_percent {
        Verdict::Raise {
            severity: InsightSeverity::Critical,
            details: format!(
                "High failure rate detected: {failure_rate:.1}% over the last {}s.",
                settings.check_window_secs
            ),
            metric_value: failure_rate,
        }
    } else {
        Verdict::Resolve
    }
}

pub fn latency_verdict(
    current_avg: f64,
    baseline_avg: f64,
    settings: &AnalyticsSettings,
) -> Verdict {
    if current_avg <= 0.0 || baseline_avg <= 0.0 {
        return Verdict::Skip;
    }
    if current_avg > baseline_avg * settings.degradation_factor {
        Verdict::Raise {
            severity: InsightSeverity::Warning,
            details: format!(
                "Response time is slower than usual. Current: {}ms (Normal: {}ms)",
                current_avg.round(),
                baseline_avg.round()
            ),
            metric_value: current_avg,
        }
    } else {
        Verdict::Resolve
    }
}

/// Counts for one analytics cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsSummary {
    pub targets: usize,
    /// Insights inserted or updated.
    pub raised: usize,
    /// Insight rows deactivated.
    pub resolved: u64,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct TargetAnalysis {
    raised: usize,
    resolved: u64,
}

/// Compares short-term against baseline ping statistics and raises or
/// clears insights. Performs no network I/O.
pub struct AnalyticsService {
    store: Arc<dyn Store>,
    settings: AnalyticsSettings,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn Store>, settings: AnalyticsSettings) -> Self {
        Self { store, settings }
    }

    pub async fn run_analytics_cycle(&self) -> Result<AnalyticsSummary, StoreError> {
        self.run_analytics_cycle_at(Utc::now()).await
    }

    pub async fn run_analytics_cycle_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsSummary, StoreError> {
        let targets = self.store.active_targets().await?;
        let mut summary = AnalyticsSummary {
            targets: targets.len(),
            ..Default::default()
        };

        let results = join_all(targets.iter().map(|t| self.analyze_target(t, now))).await;
        for result in results {
            match result {
                Ok(analysis) => {
                    summary.raised += analysis.raised;
                    summary.resolved += analysis.resolved;
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "Error analysing target.");
                }
            }
        }

        info!(
            targets = summary.targets,
            raised = summary.raised,
            resolved = summary.resolved,
            failed = summary.failed,
            "Analytics cycle finished."
        );
        Ok(summary)
    }

    async fn analyze_target(
        &self,
        target: &target::Model,
        now: DateTime<Utc>,
    ) -> Result<TargetAnalysis, AnalyticsError> {
        let wrap = |source| AnalyticsError::StoreError {
            target_id: target.id,
            source,
        };
        let check_start = window_start(now, self.settings.check_window_secs);
        let baseline_start = window_start(now, self.settings.baseline_window_secs);

        let current = self
            .store
            .ping_window_stats(target.id, check_start)
            .await
            .map_err(wrap)?;
        let baseline = self
            .store
            .ping_window_stats(target.id, baseline_start)
            .await
            .map_err(wrap)?;

        let current_avg = current.up_avg_latency_ms();
        let baseline_avg = baseline.up_avg_latency_ms();
        debug!(
            target_id = target.id,
            samples = current.total(),
            current_avg_ms = current_avg,
            baseline_avg_ms = baseline_avg,
            "Window statistics."
        );

        let mut analysis = TargetAnalysis::default();
        for (kind, verdict) in [
            (
                InsightKind::ReliabilityIssue,
                reliability_verdict(&current, &self.settings),
            ),
            (
                InsightKind::DegradedPerformance,
                latency_verdict(current_avg, baseline_avg, &self.settings),
            ),
        ] {
            self.apply_verdict(target.id, kind, verdict, now, &mut analysis)
                .await
                .map_err(wrap)?;
        }
        Ok(analysis)
    }

    async fn apply_verdict(
        &self,
        target_id: i32,
        kind: InsightKind,
        verdict: Verdict,
        now: DateTime<Utc>,
        analysis: &mut TargetAnalysis,
    ) -> Result<(), StoreError> {
        match verdict {
            Verdict::Raise {
                severity,
                details,
                metric_value,
            } => {
                // Upsert keyed by (target, kind).
                match self.store.active_insight(target_id, kind).await? {
                    Some(existing) => {
                        self.store
                            .update_insight(existing.id, details, metric_value, now)
                            .await?;
                        debug!(target_id, %kind, insight_id = existing.id, "Updated insight.");
                    }
                    None => {
                        let created = self
                            .store
                            .insert_insight(NewInsight {
                                target_id,
                                kind,
                                severity,
                                details,
                                metric_value,
                                raised_at: now,
                            })
                            .await?;
                        info!(
                            target_id,
                            %kind,
                            %severity,
                            insight_id = created.id,
                            "Raised new insight."
                        );
                    }
                }
                analysis.raised += 1;
            }
            Verdict::Resolve => {
                let resolved = self.store.deactivate_insights(target_id, kind, now).await?;
                if resolved > 0 {
                    info!(target_id, %kind, resolved, "Insight cleared.");
                }
                analysis.resolved += resolved;
            }
            Verdict::Skip => {}
        }
        Ok(())
    }
}

/// Start of a trailing window. Windows reaching past the representable range
/// cover all history.
fn window_start(now: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    i64::try_from(window_secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::PingStatus;
    use crate::db::memory_store::{MemoryStore, sample_target};
    use crate::db::models::{NewPing, StatusBucket};

    async fn ping(store: &MemoryStore, status: PingStatus, latency_ms: i32, at: DateTime<Utc>) {
        store
            .append_ping(NewPing {
                target_id: 1,
                status,
                http_status_code: if status.is_up() { 200 } else { 0 },
                latency_ms,
                error_message: None,
                checked_at: at,
            })
            .await
            .unwrap();
    }

    async fn setup() -> (Arc<MemoryStore>, AnalyticsService) {
        let store = Arc::new(MemoryStore::new());
        store.insert_target(sample_target(1, "http://api.test")).await;
        let service = AnalyticsService::new(store.clone(), AnalyticsSettings::default());
        (store, service)
    }

    fn active(insights: &[crate::db::entities::insight::Model], kind: InsightKind) -> usize {
        insights.iter().filter(|i| i.kind == kind && i.is_active).count()
    }

    #[test]
    fn reliability_needs_min_samples() {
        let settings = AnalyticsSettings::default();
        let stats = WindowStats {
            buckets: vec![StatusBucket {
                status: PingStatus::Down,
                count: 1,
                latency_sum_ms: 0,
            }],
        };
        assert_eq!(reliability_verdict(&stats, &settings), Verdict::Skip);
        assert_eq!(
            reliability_verdict(&WindowStats::default(), &settings),
            Verdict::Skip
        );
    }

    #[test]
    fn latency_skips_without_samples() {
        let settings = AnalyticsSettings::default();
        assert_eq!(latency_verdict(0.0, 200.0, &settings), Verdict::Skip);
        assert_eq!(latency_verdict(350.0, 0.0, &settings), Verdict::Skip);
        assert_eq!(latency_verdict(300.0, 200.0, &settings), Verdict::Resolve);
        assert!(matches!(
            latency_verdict(301.0, 200.0, &settings),
            Verdict::Raise { .. }
        ));
    }

    #[tokio::test]
    async fn high_failure_rate_raises_then_clears() {
        let (store, service) = setup().await;
        let now = Utc::now();
        ping(&store, PingStatus::Up, 100, now - ChronoDuration::seconds(40)).await;
        ping(&store, PingStatus::Down, 5, now - ChronoDuration::seconds(30)).await;
        ping(&store, PingStatus::Timeout, 5000, now - ChronoDuration::seconds(20)).await;

        let summary = service.run_analytics_cycle_at(now).await.unwrap();
        assert_eq!(summary.targets, 1);
        assert_eq!(summary.raised, 1);

        let insights = store.insights(1).await;
        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.kind, InsightKind::ReliabilityIssue);
        assert_eq!(insight.severity, InsightSeverity::Critical);
        assert!((insight.metric_value - 66.67).abs() < 0.01);
        assert_eq!(
            insight.details,
            "High failure rate detected: 66.7% over the last 60s."
        );

        let later = now + ChronoDuration::seconds(120);
        ping(&store, PingStatus::Up, 100, later - ChronoDuration::seconds(20)).await;
        ping(&store, PingStatus::Up, 100, later - ChronoDuration::seconds(10)).await;

        let summary = service.run_analytics_cycle_at(later).await.unwrap();
        assert_eq!(summary.resolved, 1);
        assert_eq!(active(&store.insights(1).await, InsightKind::ReliabilityIssue), 0);
    }

    #[tokio::test]
    async fn slow_responses_raise_degraded_performance_then_clear() {
        let (store, service) = setup().await;
        let now = Utc::now();
        // Baseline window: three fast responses plus the slow current one, mean 200ms.
        for offset in [500, 400, 300] {
            ping(&store, PingStatus::Up, 150, now - ChronoDuration::seconds(offset)).await;
        }
        ping(&store, PingStatus::Up, 350, now - ChronoDuration::seconds(10)).await;

        service.run_analytics_cycle_at(now).await.unwrap();
        let insights = store.insights(1).await;
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].kind, InsightKind::DegradedPerformance);
        assert_eq!(insights[0].severity, InsightSeverity::Warning);
        assert!((insights[0].metric_value - 350.0).abs() < f64::EPSILON);
        assert_eq!(
            insights[0].details,
            "Response time is slower than usual. Current: 350ms (Normal: 200ms)"
        );

        let later = now + ChronoDuration::seconds(60);
        ping(&store, PingStatus::Up, 220, later - ChronoDuration::seconds(5)).await;
        service.run_analytics_cycle_at(later).await.unwrap();
        assert_eq!(
            active(&store.insights(1).await, InsightKind::DegradedPerformance),
            0
        );
    }

    #[tokio::test]
    async fn repeated_raises_keep_a_single_active_insight() {
        let (store, service) = setup().await;
        let start = Utc::now();
        for cycle in 0..3 {
            let now = start + ChronoDuration::seconds(cycle * 30);
            ping(&store, PingStatus::Down, 5, now - ChronoDuration::seconds(2)).await;
            ping(&store, PingStatus::Down, 5, now - ChronoDuration::seconds(1)).await;
            service.run_analytics_cycle_at(now).await.unwrap();
        }

        let insights = store.insights(1).await;
        assert_eq!(active(&insights, InsightKind::ReliabilityIssue), 1);
        assert_eq!(insights.len(), 1);
        assert!((insights[0].metric_value - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn sparse_windows_change_nothing() {
        let (store, service) = setup().await;
        let now = Utc::now();
        ping(&store, PingStatus::Down, 5, now - ChronoDuration::seconds(5)).await;

        let summary = service.run_analytics_cycle_at(now).await.unwrap();
        assert_eq!(summary.raised, 0);
        assert_eq!(summary.resolved, 0);
        assert!(store.insights(1).await.is_empty());
    }

    #[tokio::test]
    async fn windows_beyond_the_time_range_cover_all_history() {
        let store = Arc::new(MemoryStore::new());
        store.insert_target(sample_target(1, "http://api.test")).await;
        let service = AnalyticsService::new(
            store.clone(),
            AnalyticsSettings {
                check_window_secs: u64::MAX - 1,
                baseline_window_secs: u64::MAX,
                ..AnalyticsSettings::default()
            },
        );
        let now = Utc::now();
        ping(&store, PingStatus::Down, 5, now - ChronoDuration::days(400)).await;
        ping(&store, PingStatus::Down, 5, now - ChronoDuration::seconds(1)).await;

        let summary = service.run_analytics_cycle_at(now).await.unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.raised, 1);
        assert_eq!(active(&store.insights(1).await, InsightKind::ReliabilityIssue), 1);
    }
}
