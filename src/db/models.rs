//! Write-side records and aggregate read models exchanged with the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::entities::target::{self, StoredHeader};
use crate::db::enums::{HttpMethod, InsightKind, InsightSeverity, PingStatus, TargetStatus};
use crate::services::encryption_service::{EncryptionError, HeaderCipher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPing {
    pub target_id: i32,
    pub status: PingStatus,
    pub http_status_code: i32,
    pub latency_ms: i32,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Status and timing fields written back to a target after each probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckUpdate {
    pub target_id: i32,
    pub status: TargetStatus,
    pub last_checked_at: DateTime<Utc>,
    pub last_response_time_ms: i32,
    pub next_due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncident {
    pub target_id: i32,
    pub cause: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInsight {
    pub target_id: i32,
    pub kind: InsightKind,
    pub severity: InsightSeverity,
    pub details: String,
    pub metric_value: f64,
    pub raised_at: DateTime<Utc>,
}

/// Pings of one status inside a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBucket {
    pub status: PingStatus,
    pub count: i64,
    pub latency_sum_ms: i64,
}

/// Per-status aggregate of a target's pings since some point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub buckets: Vec<StatusBucket>,
}

impl WindowStats {
    pub fn total(&self) -> i64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Anything that is not UP counts as a failure.
    pub fn failures(&self) -> i64 {
        self.buckets
            .iter()
            .filter(|b| !b.status.is_up())
            .map(|b| b.count)
            .sum()
    }

    pub fn failure_rate_percent(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(self.failures() as f64 / total as f64 * 100.0)
    }

    /// Mean latency of successful pings, 0.0 when there are none.
    pub fn up_avg_latency_ms(&self) -> f64 {
        let (count, sum) = self
            .buckets
            .iter()
            .filter(|b| b.status.is_up())
            .fold((0i64, 0i64), |(c, s), b| (c + b.count, s + b.latency_sum_ms));
        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }
}

pub const ALLOWED_POLL_INTERVALS: [i32; 6] = [10, 20, 60, 300, 600, 1800];
pub const MAX_TIMEOUT_MS: i32 = 30_000;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Invalid url '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    #[error("Timeout must be between 1 and 30000 ms, got {0}")]
    InvalidTimeout(i32),
    #[error("Poll interval must be one of 10, 20, 60, 300, 600 or 1800 seconds, got {0}")]
    InvalidPollInterval(i32),
    #[error("Expected status must be a valid HTTP status code, got {0}")]
    InvalidExpectedStatus(i32),
    #[error("Name must not be empty")]
    EmptyName,
    #[error("Failed to encrypt header '{0}': {1}")]
    HeaderEncryption(String, EncryptionError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An explicit partial update of a target's configuration.
///
/// Every field is optional; `apply_to` validates each provided field and
/// merges it into the model. Status and timing fields are owned by the
/// monitoring engine and cannot be patched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    /// Plaintext header pairs; replaces the stored list entirely.
    pub headers: Option<Vec<(String, String)>>,
    /// `Some(None)` clears the body. In JSON, `null` clears and an absent key
    /// leaves it unchanged.
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Option<serde_json::Value>>,
    pub timeout_ms: Option<i32>,
    pub expected_status: Option<i32>,
    pub poll_interval_seconds: Option<i32>,
    pub is_active: Option<bool>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub alert_recipient: Option<Option<String>>,
}

// Only called for keys that are present, so `null` becomes `Some(None)`.
fn present_or_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TargetPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.method.is_none()
            && self.headers.is_none()
            && self.body.is_none()
            && self.timeout_ms.is_none()
            && self.expected_status.is_none()
            && self.poll_interval_seconds.is_none()
            && self.is_active.is_none()
            && self.alert_recipient.is_none()
    }

    /// Validates every provided field, then merges them into `target`.
    ///
    /// Nothing is written unless the whole patch is valid.
    pub fn apply_to(
        self,
        target: &mut target::Model,
        cipher: &HeaderCipher,
        now: DateTime<Utc>,
    ) -> Result<(), PatchError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(PatchError::EmptyName);
            }
        }
        if let Some(url) = &self.url {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| PatchError::InvalidUrl(url.clone(), e.to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(PatchError::InvalidUrl(
                    url.clone(),
                    format!("unsupported scheme '{}'", parsed.scheme()),
                ));
            }
        }
        let method = match &self.method {
            Some(m) => Some(
                m.parse::<HttpMethod>()
                    .map_err(|_| PatchError::UnsupportedMethod(m.clone()))?,
            ),
            None => None,
        };
        if let Some(timeout) = self.timeout_ms {
            if !(1..=MAX_TIMEOUT_MS).contains(&timeout) {
                return Err(PatchError::InvalidTimeout(timeout));
            }
        }
        if let Some(interval) = self.poll_interval_seconds {
            if !ALLOWED_POLL_INTERVALS.contains(&interval) {
                return Err(PatchError::InvalidPollInterval(interval));
            }
        }
        if let Some(code) = self.expected_status {
            if !(100..=599).contains(&code) {
                return Err(PatchError::InvalidExpectedStatus(code));
            }
        }
        let headers = match self.headers {
            Some(pairs) => {
                let mut stored = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let encrypted = cipher
                        .encrypt(&value)
                        .map_err(|e| PatchError::HeaderEncryption(key.clone(), e))?;
                    stored.push(StoredHeader {
                        key,
                        value: encrypted,
                    });
                }
                Some(serde_json::to_value(stored)?)
            }
            None => None,
        };

        if let Some(name) = self.name {
            target.name = name.trim().to_string();
        }
        if let Some(url) = self.url {
            target.url = url;
        }
        if let Some(method) = method {
            target.method = method;
        }
        if let Some(headers) = headers {
            target.headers = headers;
        }
        if let Some(body) = self.body {
            target.body = body;
        }
        if let Some(timeout) = self.timeout_ms {
            target.timeout_ms = timeout;
        }
        if let Some(code) = self.expected_status {
            target.expected_status = code;
        }
        if let Some(interval) = self.poll_interval_seconds {
            target.poll_interval_seconds = interval;
        }
        if let Some(active) = self.is_active {
            target.is_active = active;
        }
        if let Some(recipient) = self.alert_recipient {
            target.alert_recipient = recipient;
        }
        target.updated_at = now;
        Ok(())
    }
}
