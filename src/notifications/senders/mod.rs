use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use super::models::{ChannelConfig, NotificationMessage};
use crate::version::user_agent;

pub mod log;
pub mod telegram;
pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    TemplatingError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Per-request limit for outbound notification calls.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Delivery to one kind of channel.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError>;
}

/// Reads a non-success response into a `SendFailed` error.
pub(crate) async fn ensure_success(
    channel: &str,
    response: reqwest::Response,
) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::SendFailed(format!(
        "{channel} returned non-success status: {status}. Body: {error_body}"
    )))
}
