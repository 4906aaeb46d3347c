//! HTTP client for the WhatsApp bridge.
//!
//! Implements the [`MessageSender`] capability used by the notification
//! dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::WhatsAppError;
use crate::notify::{MessageSender, SendReceipt, TransportError};

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Client for one bridge instance.
pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: Url,
    instance_id: String,
    token: String,
}

/// Reply from `messages/chat`.
#[derive(Debug, Deserialize)]
struct SendReply {
    #[serde(default)]
    sent: Value,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl SendReply {
    /// The bridge reports `sent` as a bool or as the string `"true"`.
    fn accepted(&self) -> bool {
        match &self.sent {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    fn message_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn error_text(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "bridge did not report the message as sent".to_owned(),
        }
    }
}

impl WhatsAppClient {
    /// Create a client for `instance_id` at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(
        base_url: &str,
        instance_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, WhatsAppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client,
            base_url,
            instance_id: instance_id.into(),
            token: token.into(),
        })
    }

    /// URL of an instance endpoint, e.g. `messages/chat`.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::InvalidUrl`] if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url, WhatsAppError> {
        let mut url = self
            .base_url
            .join(&format!("{}/{path}", self.instance_id))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    /// Send a text message to a normalized phone key.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::Http`] on network failure or
    /// [`WhatsAppError::Rejected`] if the bridge did not accept the message.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>, WhatsAppError> {
        let url = self.endpoint("messages/chat")?;
        let payload = serde_json::json!({ "to": to, "body": body });
        let resp = self.client.post(url).json(&payload).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            warn!(%status, to, "bridge send failed");
            return Err(WhatsAppError::Rejected(format!("HTTP {status}")));
        }
        let reply: SendReply = serde_json::from_str(&text)?;
        if !reply.accepted() {
            return Err(WhatsAppError::Rejected(reply.error_text()));
        }
        let id = reply.message_id();
        debug!(to, message_id = ?id, "message sent via WhatsApp");
        Ok(id)
    }

    /// Base URL of the bridge.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<SendReceipt, TransportError> {
        self.send_text(recipient, text)
            .await
            .map(|transport_message_id| SendReceipt {
                transport_message_id,
            })
            .map_err(|e| TransportError(e.to_string()))
    }
}
