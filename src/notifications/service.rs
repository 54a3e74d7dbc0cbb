use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use super::Notifier;
use super::models::{ChannelConfig, NotificationMessage};
use super::senders::{
    DEFAULT_SEND_TIMEOUT, NotificationSender, SenderError, log::LogSender,
    telegram::TelegramSender, webhook::WebhookSender,
};

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Sender error on {channel} channel: {source}")]
    SenderError {
        channel: &'static str,
        #[source]
        source: SenderError,
    },
}

/// Fans each message out to every configured channel.
pub struct NotificationService {
    channels: Vec<ChannelConfig>,
    webhook: WebhookSender,
    telegram: TelegramSender,
    log: LogSender,
}

impl NotificationService {
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self::with_timeout(channels, DEFAULT_SEND_TIMEOUT)
    }

    /// `send_timeout` bounds each outbound HTTP call.
    pub fn with_timeout(channels: Vec<ChannelConfig>, send_timeout: Duration) -> Self {
        Self {
            channels,
            webhook: WebhookSender::with_timeout(send_timeout),
            telegram: TelegramSender::with_timeout(send_timeout),
            log: LogSender,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn sender_for(&self, config: &ChannelConfig) -> &dyn NotificationSender {
        match config {
            ChannelConfig::Webhook { .. } => &self.webhook,
            ChannelConfig::Telegram { .. } => &self.telegram,
            ChannelConfig::Log => &self.log,
        }
    }

    /// Sends to one channel.
    pub async fn send_notification(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        self.sender_for(config)
            .send(config, message)
            .await
            .map_err(|source| NotificationError::SenderError {
                channel: config.channel_type(),
                source,
            })
    }

    /// Sends to every channel, continuing past failures. Returns the last
    /// error, if any.
    pub async fn broadcast(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        if self.channels.is_empty() {
            info!(
                subject = %message.subject,
                "No notification channels configured. Message logged only."
            );
            return Ok(());
        }

        let mut last_error: Option<NotificationError> = None;
        for config in &self.channels {
            match self.send_notification(config, message).await {
                Ok(()) => {
                    info!(
                        channel = config.channel_type(),
                        subject = %message.subject,
                        "Notification sent."
                    );
                }
                Err(e) => {
                    error!(
                        channel = config.channel_type(),
                        error = %e,
                        "Failed to send notification."
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(err) => {
                warn!(
                    subject = %message.subject,
                    "Notification delivery failed on at least one channel."
                );
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        self.broadcast(&NotificationMessage::new(recipient, subject, body))
            .await
    }
}
