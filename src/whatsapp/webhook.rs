//! Inbound webhook payload parsing.
//!
//! The bridge delivers either a flat object or one nested under `data`.
//! Only text messages are routed; everything else is acknowledged and
//! ignored.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::WhatsAppError;

/// Message `type` values treated as text.
const TEXT_MARKERS: &[&str] = &["chat", "text"];

/// One inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Raw sender identifier.
    pub from: String,
    /// Raw recipient identifier.
    pub to: String,
    /// Message text.
    pub body: String,
    /// Transport message id.
    pub message_id: Option<String>,
    /// Whether we sent this message ourselves.
    pub from_me: bool,
    /// Sender's display name, if the bridge supplied one.
    pub sender_name: Option<String>,
}

/// Why a payload was not routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Media, reactions, receipts and similar.
    NonText(String),
    /// Text message with an empty body.
    EmptyBody,
    /// No sender.
    MissingSender,
    /// A field had the wrong JSON type.
    Malformed(String),
}

/// Result of parsing one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A text message to route.
    Text(InboundEvent),
    /// Acknowledge and drop.
    Ignored(IgnoreReason),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    from_me: Value,
    #[serde(default)]
    pushname: Option<String>,
    #[serde(default)]
    sender_name: Option<String>,
}

/// Parse a JSON webhook body.
///
/// # Errors
///
/// Returns [`WhatsAppError::InvalidPayload`] if `body` is not JSON.
pub fn parse_body(body: &str) -> Result<WebhookOutcome, WhatsAppError> {
    let value: Value = serde_json::from_str(body)?;
    Ok(parse_payload(&value))
}

/// Interpret a decoded payload, flat or nested under `data`.
pub fn parse_payload(payload: &Value) -> WebhookOutcome {
    let inner = match payload.get("data") {
        Some(data) if data.is_object() => data,
        _ => payload,
    };
    let raw: RawMessage = match serde_json::from_value(inner.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "webhook payload has a mistyped field, ignoring");
            return WebhookOutcome::Ignored(IgnoreReason::Malformed(e.to_string()));
        }
    };

    let kind = raw.kind.unwrap_or_else(|| "text".to_owned());
    if !TEXT_MARKERS.iter().any(|m| kind.eq_ignore_ascii_case(m)) {
        return WebhookOutcome::Ignored(IgnoreReason::NonText(kind));
    }
    if raw.from.trim().is_empty() {
        return WebhookOutcome::Ignored(IgnoreReason::MissingSender);
    }
    if raw.body.trim().is_empty() {
        return WebhookOutcome::Ignored(IgnoreReason::EmptyBody);
    }

    let message_id = raw.id.and_then(|id| match id {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    WebhookOutcome::Text(InboundEvent {
        from: raw.from,
        to: raw.to,
        body: raw.body,
        message_id,
        from_me: sent_by_us(&raw.from_me),
        sender_name: raw
            .pushname
            .or(raw.sender_name)
            .filter(|n| !n.trim().is_empty()),
    })
}

/// The bridge reports `fromMe` as a bool or as the string `"true"`.
fn sent_by_us(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
