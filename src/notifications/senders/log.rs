use async_trait::async_trait;
use tracing::{info, warn};

use super::{NotificationSender, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

/// Emits the notification as a tracing event.
#[derive(Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(
        &self,
        _config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        if message.subject.starts_with("Alert:") {
            warn!(
                recipient = %message.recipient,
                subject = %message.subject,
                body = %message.body,
                "Notification"
            );
        } else {
            info!(
                recipient = %message.recipient,
                subject = %message.subject,
                body = %message.body,
                "Notification"
            );
        }
        Ok(())
    }
}
