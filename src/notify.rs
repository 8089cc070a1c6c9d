use crate::effects::{Notification, Recipient};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

pub const SIGNATURE_HEADER: &str = "X-Ledger-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Ledger-Timestamp";

/// Receives fire-and-forget ledger events. Delivery is best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes every notification to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        match &notification.recipient {
            Recipient::User(user_id) => info!("Notify {}: {:?}", user_id, notification.event),
            Recipient::Broadcast => info!("Broadcast: {:?}", notification.event),
        }
        Ok(())
    }
}

/// Posts notifications as JSON to the dispatcher endpoint, signed with
/// HMAC-SHA256 over `timestamp.body`.
pub struct WebhookNotifier {
    client: Client,
    url: Url,
    secret: Vec<u8>,
}

impl WebhookNotifier {
    pub fn new(url: &str, secret: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid WEBHOOK_URL {}", url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("WEBHOOK_URL must be http(s), got {}", url.scheme()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build webhook client")?;
        Ok(Self {
            client,
            url,
            secret: secret.as_bytes().to_vec(),
        })
    }

    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String> {
        sign_payload(&self.secret, timestamp, body)
    }
}

pub fn sign_payload(secret: &[u8], timestamp: &str, body: &[u8]) -> Result<String> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).map_err(|e| anyhow!("bad webhook secret: {}", e))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let body = serde_json::to_vec(notification).context("serialize notification")?;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&timestamp, &body)?;

        let resp = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(TIMESTAMP_HEADER, &timestamp)
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .context("Webhook network error")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_text = resp.text().await.unwrap_or_default();
            error!("Webhook rejected notification: {} | Body: {}", status, err_text);
            return Err(anyhow!("webhook returned {}", status));
        }
        Ok(())
    }
}
