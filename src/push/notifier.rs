use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::app::Result;
use crate::domain::ChannelKind;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{channel} delivery failed: {message}")]
pub struct ChannelDeliveryError {
    pub channel: String,
    pub message: String,
}

impl ChannelDeliveryError {
    fn new(channel: ChannelKind, message: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            message: message.into(),
        }
    }
}

/// Delivers one text message to a messaging channel.
#[async_trait]
pub trait Notifier {
    /// `target` is the webhook URL, or the chat id for telegram.
    async fn send(
        &self,
        channel: ChannelKind,
        target: &str,
        text: &str,
    ) -> std::result::Result<(), ChannelDeliveryError>;
}

pub struct HttpNotifier {
    client: Client,
    telegram_api_base: String,
    telegram_bot_token: Option<String>,
}

impl HttpNotifier {
    pub fn new(
        timeout: Duration,
        telegram_api_base: &str,
        telegram_bot_token: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fastfish/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            telegram_api_base: telegram_api_base.trim_end_matches('/').to_string(),
            telegram_bot_token: telegram_bot_token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    async fn post_json(
        &self,
        channel: ChannelKind,
        url: &str,
        payload: &Value,
    ) -> std::result::Result<(reqwest::StatusCode, Option<Value>), ChannelDeliveryError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ChannelDeliveryError::new(channel, e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ChannelDeliveryError::new(channel, e.to_string()))?;
        Ok((status, serde_json::from_slice(&body).ok()))
    }
}

fn text_field(body: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(String::from)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(
        &self,
        channel: ChannelKind,
        target: &str,
        text: &str,
    ) -> std::result::Result<(), ChannelDeliveryError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ChannelDeliveryError::new(channel, "empty webhook target"));
        }

        match channel {
            ChannelKind::Feishu => {
                let payload = json!({"msg_type": "text", "content": {"text": text}});
                let (_, body) = self.post_json(channel, target, &payload).await?;
                let body =
                    body.ok_or_else(|| ChannelDeliveryError::new(channel, "non-JSON response"))?;
                let ok = body.get("code").and_then(Value::as_i64) == Some(0)
                    || body.get("StatusCode").and_then(Value::as_i64) == Some(0);
                if ok {
                    Ok(())
                } else {
                    Err(ChannelDeliveryError::new(channel, text_field(&body, &["msg", "message"])))
                }
            }
            ChannelKind::DingTalk => {
                let payload = json!({"msgtype": "text", "text": {"content": text}});
                let (_, body) = self.post_json(channel, target, &payload).await?;
                let body =
                    body.ok_or_else(|| ChannelDeliveryError::new(channel, "non-JSON response"))?;
                if body.get("errcode").and_then(Value::as_i64) == Some(0) {
                    Ok(())
                } else {
                    Err(ChannelDeliveryError::new(channel, text_field(&body, &["errmsg"])))
                }
            }
            ChannelKind::Telegram => {
                let token = self.telegram_bot_token.as_deref().ok_or_else(|| {
                    ChannelDeliveryError::new(channel, "telegram bot token not configured")
                })?;
                let url = format!("{}/bot{}/sendMessage", self.telegram_api_base, token);
                let payload = json!({"chat_id": target, "text": text});
                let (_, body) = self.post_json(channel, &url, &payload).await?;
                let body =
                    body.ok_or_else(|| ChannelDeliveryError::new(channel, "non-JSON response"))?;
                if body.get("ok").and_then(Value::as_bool) == Some(true) {
                    Ok(())
                } else {
                    Err(ChannelDeliveryError::new(channel, text_field(&body, &["description"])))
                }
            }
            ChannelKind::Webhook => {
                let payload = json!({"text": text});
                let (status, _) = self.post_json(channel, target, &payload).await?;
                if status.is_success() {
                    Ok(())
                } else {
                    Err(ChannelDeliveryError::new(channel, format!("HTTP {}", status)))
                }
            }
        }
    }
}
