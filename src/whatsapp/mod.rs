//! WhatsApp adapter: HTTP bridge client, webhook payload parsing, event
//! listener, and the message router.
//!
//! Talks to an UltraMsg-style bridge: outbound text is posted to
//! `{base}/{instance}/messages/chat`, inbound events arrive as webhook
//! payloads or are long-polled from `{base}/{instance}/events/poll`.

pub mod client;
pub mod events;
pub mod router;
pub mod webhook;

use crate::store::StoreError;

/// Errors from the WhatsApp adapter.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// HTTP request to the bridge failed. The request URL is stripped, since
    /// it carries the instance token.
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    /// The bridge URL could not be built.
    #[error("invalid bridge URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The bridge answered but did not accept the message.
    #[error("bridge rejected message: {0}")]
    Rejected(String),

    /// A webhook body was not valid JSON.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Participant or conversation store failure while routing.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for WhatsAppError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}
