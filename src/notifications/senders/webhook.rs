use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, header};
use tera::{Context, Tera};

use super::{DEFAULT_SEND_TIMEOUT, NotificationSender, SenderError, ensure_success, http_client};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

/// Pushes notifications to a custom HTTP endpoint.
pub struct WebhookSender {
    client: Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
        }
    }

    /// Renders the configured template, or a JSON object of the message
    /// fields when no template is set.
    fn render_body(
        body_template: Option<&str>,
        message: &NotificationMessage,
    ) -> Result<String, SenderError> {
        match body_template {
            Some(template) => {
                let mut tera_context = Context::new();
                for (key, value) in message.template_context() {
                    tera_context.insert(key, &value);
                }
                Tera::one_off(template, &tera_context, false)
                    .map_err(|e| SenderError::TemplatingError(e.to_string()))
            }
            None => Ok(serde_json::to_string(message)?),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Webhook {
            url,
            method,
            headers,
            body_template,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Webhook config, but found a different type.".to_string(),
            ));
        };

        let http_method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "GET" => Method::GET,
            _ => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {method}"
                )));
            }
        };

        let mut request_builder = self.client.request(http_method.clone(), url);

        if let Some(h) = headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in h {
                let header_name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header name: {e}"))
                })?;
                let header_value = header::HeaderValue::from_str(value).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header value: {e}"))
                })?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        if http_method != Method::GET {
            let rendered_body = Self::render_body(body_template.as_deref(), message)?;
            request_builder = request_builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(rendered_body);
        }

        let response = request_builder.send().await?;
        ensure_success("Webhook", response).await
    }
}
