use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::db::entities::target;
use crate::db::enums::PingStatus;
use crate::services::encryption_service::HeaderCipher;
use crate::version::user_agent;

/// Classified outcome of a single health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub status: PingStatus,
    /// 0 when no response was received.
    pub http_status_code: i32,
    pub latency_ms: i32,
    pub error_message: Option<String>,
}

impl ProbeResult {
    fn down(latency_ms: i32, error_message: String) -> Self {
        Self {
            status: PingStatus::Down,
            http_status_code: 0,
            latency_ms,
            error_message: Some(error_message),
        }
    }
}

/// Issues one outbound request per target and classifies the response.
/// Performs no persistence.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
    cipher: Arc<HeaderCipher>,
}

impl Prober {
    pub fn new(cipher: Arc<HeaderCipher>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent())
            .build()?;
        Ok(Self { client, cipher })
    }

    pub async fn probe(&self, target: &target::Model) -> ProbeResult {
        let start_time = Instant::now();

        let headers = match target.effective_headers(&self.cipher) {
            Ok(headers) => headers,
            Err(e) => {
                return ProbeResult::down(
                    elapsed_ms(start_time),
                    format!("Failed to decrypt headers: {e}"),
                );
            }
        };

        let timeout_ms = target.timeout_ms.max(1);
        let mut request = self
            .client
            .request(target.method.into(), &target.url)
            .timeout(Duration::from_millis(timeout_ms as u64));
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = target.body.as_ref().filter(|b| has_content(b)) {
            request = request.json(body);
        }

        let result = request.send().await;
        let latency_ms = elapsed_ms(start_time);

        match result {
            Ok(response) => {
                let code = i32::from(response.status().as_u16());
                if code == target.expected_status {
                    ProbeResult {
                        status: PingStatus::Up,
                        http_status_code: code,
                        latency_ms,
                        error_message: None,
                    }
                } else {
                    ProbeResult {
                        status: PingStatus::Down,
                        http_status_code: code,
                        latency_ms,
                        error_message: None,
                    }
                }
            }
            Err(e) if e.is_timeout() => ProbeResult {
                status: PingStatus::Timeout,
                http_status_code: 0,
                latency_ms,
                error_message: Some(format!("Request timed out after {timeout_ms}ms")),
            },
            Err(e) => {
                debug!(target_id = target.id, error = %e, "Probe transport failure.");
                ProbeResult::down(latency_ms, error_chain(&e))
            }
        }
    }
}

fn elapsed_ms(start_time: Instant) -> i32 {
    i32::try_from(start_time.elapsed().as_millis()).unwrap_or(i32::MAX)
}

/// `null` and `{}` are treated as "no body".
fn has_content(body: &Value) -> bool {
    match body {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Joins an error and its sources, e.g. "error sending request: connection refused".
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
