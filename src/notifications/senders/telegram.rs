use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{DEFAULT_SEND_TIMEOUT, NotificationSender, SenderError, ensure_success, http_client};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Pushes notifications via the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    api_base: String,
}

impl Default for TelegramSender {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramSender {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_api_base(TELEGRAM_API_BASE, timeout)
    }

    pub fn with_api_base(api_base: &str, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

/// Escapes text for Telegram MarkdownV2.
/// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . ! \
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped_text = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*'
                | '['
                | ']'
                | '('
                | ')'
                | '~'
                | '`'
                | '>'
                | '#'
                | '+'
                | '-'
                | '='
                | '|'
                | '{'
                | '}'
                | '.'
                | '!'
                | '\\'
        ) {
            escaped_text.push('\\');
        }
        escaped_text.push(c);
    }
    escaped_text
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Telegram { bot_token, chat_id } = config else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Telegram config, but found a different type.".to_string(),
            ));
        };

        let api_url = format!("{}/bot{bot_token}/sendMessage", self.api_base);
        // Subject in bold, body as plain escaped text.
        let text = format!(
            "*{}*\n\n{}",
            escape_markdown_v2(&message.subject),
            escape_markdown_v2(&message.body)
        );
        let payload = TelegramMessage {
            chat_id,
            text: &text,
            parse_mode: "MarkdownV2",
        };

        let response = self.client.post(&api_url).json(&payload).send().await?;
        ensure_success("Telegram API", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, routing::post};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(
            escape_markdown_v2("Alert: api-v2 is DOWN (99.5%)!"),
            "Alert: api\\-v2 is DOWN \\(99\\.5%\\)\\!"
        );
        assert_eq!(escape_markdown_v2("plain text"), "plain text");
    }

    #[tokio::test]
    async fn posts_markdown_message_to_bot_endpoint() {
        type Captured = Arc<Mutex<Vec<serde_json::Value>>>;
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/botTOKEN/sendMessage",
                post(
                    |State(seen): State<Captured>, Json(body): Json<serde_json::Value>| async move {
                        seen.lock().unwrap().push(body);
                        Json(serde_json::json!({ "ok": true }))
                    },
                ),
            )
            .with_state(captured.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sender =
            TelegramSender::with_api_base(&format!("http://{addr}/"), DEFAULT_SEND_TIMEOUT);
        let config = ChannelConfig::Telegram {
            bot_token: "TOKEN".to_string(),
            chat_id: "42".to_string(),
        };
        let message = NotificationMessage::new("", "Resolved: web is UP", "Down for 1m 5s.");
        sender.send(&config, &message).await.unwrap();

        let bodies = captured.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["chat_id"], "42");
        assert_eq!(bodies[0]["parse_mode"], "MarkdownV2");
        assert_eq!(
            bodies[0]["text"],
            "*Resolved: web is UP*\n\nDown for 1m 5s\\."
        );
    }
}
