//! Outbound notifications: templates, dispatch, delivery history, and the
//! background dispatch queue.
//!
//! The dispatcher never fails a caller's workflow: every attempt yields a
//! [`DeliveryResult`], successful or not. Only a template rendered with
//! missing data is treated as a programming error, and even that is turned
//! into a failed result after being logged at `error`.

pub mod dispatcher;
pub mod history;
pub mod queue;
pub mod templates;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named values substituted into a template.
pub type TemplateData = BTreeMap<String, String>;

/// Errors from the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// A template placeholder has no value in the supplied data.
    #[error("template {message_type} is missing data for {{{field}}}")]
    MissingTemplateData {
        /// Template being rendered.
        message_type: MessageType,
        /// First placeholder with no value.
        field: String,
    },

    /// A configured template key does not name a message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The dispatch queue is at capacity.
    #[error("dispatch queue full")]
    QueueFull,

    /// The dispatch worker has stopped.
    #[error("dispatch queue closed")]
    QueueClosed,
}

/// Failure reported by the message-sender capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// Successful send acknowledgement from the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Transport-assigned message id, if the transport returns one.
    pub transport_message_id: Option<String>,
}

/// Capability to deliver one text message to one normalized recipient.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send `text` to the normalized phone key `recipient`.
    async fn send_message(&self, recipient: &str, text: &str)
        -> Result<SendReceipt, TransportError>;
}

/// Kinds of outbound message, each bound to one template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// New booking awaiting the coordinator's decision.
    CoordinatorApprovalRequest,
    /// Client's booking was confirmed.
    ClientConfirmation,
    /// Client's booking was declined.
    ClientDeclineNotification,
    /// Coordinator asks the client for a change.
    ClientModificationRequest,
    /// Acknowledgement of a coordinator action.
    CoordinatorFeedback,
    /// Coordinator reply could not be understood.
    CoordinatorClarification,
    /// A client request needs the coordinator's judgement.
    ClientEscalation,
    /// Drafted client message awaiting coordinator confirmation.
    RecommendationReview,
    /// Coordinator-approved guidance delivered to a client.
    ClientGuidance,
    /// Consultation offer after withdrawn guidance.
    ClientConsultationOffer,
    /// Free-form conversational reply.
    ConversationReply,
    /// Generic client fallback after an internal failure.
    ServiceUnavailable,
}

impl MessageType {
    /// Every message type.
    pub const ALL: [Self; 12] = [
        Self::CoordinatorApprovalRequest,
        Self::ClientConfirmation,
        Self::ClientDeclineNotification,
        Self::ClientModificationRequest,
        Self::CoordinatorFeedback,
        Self::CoordinatorClarification,
        Self::ClientEscalation,
        Self::RecommendationReview,
        Self::ClientGuidance,
        Self::ClientConsultationOffer,
        Self::ConversationReply,
        Self::ServiceUnavailable,
    ];

    /// Stable tag used in logs, config keys and the delivery log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoordinatorApprovalRequest => "coordinator_approval_request",
            Self::ClientConfirmation => "client_confirmation",
            Self::ClientDeclineNotification => "client_decline_notification",
            Self::ClientModificationRequest => "client_modification_request",
            Self::CoordinatorFeedback => "coordinator_feedback",
            Self::CoordinatorClarification => "coordinator_clarification",
            Self::ClientEscalation => "client_escalation",
            Self::RecommendationReview => "recommendation_review",
            Self::ClientGuidance => "client_guidance",
            Self::ClientConsultationOffer => "client_consultation_offer",
            Self::ConversationReply => "conversation_reply",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }

    /// Parse a message type tag.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::UnknownMessageType`] if the tag is unrecognized.
    pub fn parse(s: &str) -> Result<Self, NotifyError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| NotifyError::UnknownMessageType(s.to_owned()))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority declared by each template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Informational.
    Low,
    /// Default.
    Normal,
    /// Time-sensitive.
    High,
    /// Must go out before anything else.
    Urgent,
}

impl Priority {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// Whether the dispatch queue serves this priority ahead of normal traffic.
    pub fn is_expedited(&self) -> bool {
        matches!(self, Self::High | Self::Urgent)
    }
}

/// Outcome of one attempt to send one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Whether the transport accepted the message.
    pub success: bool,
    /// What was sent.
    pub message_type: MessageType,
    /// Normalized recipient key.
    pub recipient: String,
    /// Related appointment, if any.
    pub appointment_id: Option<i64>,
    /// Transport-assigned id on success.
    pub transport_message_id: Option<String>,
    /// Failure description.
    pub error: Option<String>,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
}

/// A notification to render and deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Raw recipient identifier (normalized on send).
    pub recipient: String,
    /// Template to render.
    pub message_type: MessageType,
    /// Placeholder values.
    pub data: TemplateData,
    /// Related appointment, if any.
    pub appointment_id: Option<i64>,
}

/// A reply the caller wants rendered and sent back to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    /// Template to render.
    pub message_type: MessageType,
    /// Placeholder values.
    pub data: TemplateData,
    /// Related appointment, if any.
    pub appointment_id: Option<i64>,
}

impl OutboundReply {
    /// A reply rendered through `message_type`.
    pub fn new(message_type: MessageType, data: TemplateData) -> Self {
        Self {
            message_type,
            data,
            appointment_id: None,
        }
    }

    /// A plain conversational reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(
            MessageType::ConversationReply,
            data_from([("text", text.into())]),
        )
    }

    /// Attach the related appointment id.
    pub fn for_appointment(mut self, appointment_id: i64) -> Self {
        self.appointment_id = Some(appointment_id);
        self
    }
}

/// Build [`TemplateData`] from key/value pairs.
pub fn data_from<const N: usize>(pairs: [(&str, String); N]) -> TemplateData {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}
