use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{error, info, warn};

use super::ChatSender;
use crate::config::ChatConfig;
use crate::error::Result;

pub struct WebhookChatSender {
    config: ChatConfig,
    client: reqwest::Client,
}

impl WebhookChatSender {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn post(&self, webhook: &str, text: &str, recipients: &[String]) -> Result<bool> {
        let mut request = self.client.post(webhook).json(&reminder_payload(text, recipients));

        if let Some(secret) = self.config.secret.as_deref() {
            let timestamp_ms = chrono::Utc::now().timestamp_millis();
            if let Some(sign) = sign_request(secret, timestamp_ms) {
                request = request.query(&[
                    ("timestamp", timestamp_ms.to_string()),
                    ("sign", sign),
                ]);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        info!(%status, ok = status.is_success(), "chat webhook responded");
        Ok(status.is_success())
    }
}

#[async_trait]
impl ChatSender for WebhookChatSender {
    async fn send_chat_message(&self, text: &str, recipients: &[String]) -> bool {
        let Some(webhook) = self.config.webhook_url.as_deref() else {
            warn!("chat webhook not configured, skipping send");
            return false;
        };

        info!(len = text.len(), recipients = recipients.len(), "sending chat reminder");
        match self.post(webhook, text, recipients).await {
            Ok(ok) => ok,
            Err(e) => {
                error!(error = %e, "chat reminder send failed");
                false
            }
        }
    }
}

/// Base64 HMAC-SHA256 over `"{timestamp_ms}\n{secret}"`, keyed by the secret.
pub fn sign_request(secret: &str, timestamp_ms: i64) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{timestamp_ms}\n{secret}").as_bytes());
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

fn reminder_payload(text: &str, recipients: &[String]) -> serde_json::Value {
    let mut body = format!(
        "**Weekly report reminder**\n\n{text}\n\nPlease submit before 18:00 today."
    );
    if !recipients.is_empty() {
        let mentions: Vec<String> = recipients.iter().map(|handle| format!("@{handle}")).collect();
        body.push_str("\n\n");
        body.push_str(&mentions.join(" "));
    }

    json!({
        "msgtype": "markdown",
        "markdown": {
            "title": "Weekly report reminder",
            "text": body,
        },
        "at": {
            "atMobiles": recipients,
            "isAtAll": false,
        },
    })
}
