use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A configured delivery channel, read from `[[notification_channels]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Webhook {
        url: String,
        #[serde(default = "default_webhook_method")]
        method: String, // "GET", "POST" or "PUT"
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
        /// Tera template; `recipient`, `subject` and `body` are in scope.
        #[serde(default)]
        body_template: Option<String>,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
    },
    Log,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

impl ChannelConfig {
    pub fn channel_type(&self) -> &'static str {
        match self {
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Log => "log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl NotificationMessage {
    pub fn new(recipient: &str, subject: &str, body: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    /// Subject and body as a single plain-text message.
    pub fn text(&self) -> String {
        format!("{}\n\n{}", self.subject, self.body)
    }

    pub fn template_context(&self) -> HashMap<String, String> {
        HashMap::from([
            ("recipient".to_string(), self.recipient.clone()),
            ("subject".to_string(), self.subject.clone()),
            ("body".to_string(), self.body.clone()),
        ])
    }
}
