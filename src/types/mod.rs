//! Shared domain types: participants, conversations, messages, and the
//! request-scoped context threaded through routing.

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Role of a participant. Closed set; every branch on role is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A person booking appointments.
    Client,
    /// The single human operator approving bookings.
    Coordinator,
    /// A therapy professional assigned to appointments.
    Therapist,
    /// Back-office administrator.
    Admin,
}

impl Role {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Coordinator => "coordinator",
            Self::Therapist => "therapist",
            Self::Admin => "admin",
        }
    }

    /// Parse a stored role string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptValue`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "client" => Ok(Self::Client),
            "coordinator" => Ok(Self::Coordinator),
            "therapist" | "provider" => Ok(Self::Therapist),
            "admin" => Ok(Self::Admin),
            other => Err(StoreError::CorruptValue {
                field: "role",
                value: other.to_owned(),
            }),
        }
    }
}

/// A person known to the system, keyed by normalized phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Database ID.
    pub id: i64,
    /// Normalized phone key (see [`crate::phone::normalize`]).
    pub phone: String,
    /// Display name.
    pub name: String,
    /// Role in the booking workflow.
    pub role: Role,
    /// Deactivated participants are kept but not offered for new bookings.
    pub is_active: bool,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

/// What a conversation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPurpose {
    /// Client booking chat.
    Booking,
    /// Coordinator administrative chat.
    Admin,
    /// General support chat.
    Support,
}

impl ConversationPurpose {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::Admin => "admin",
            Self::Support => "support",
        }
    }

    /// Parse a stored purpose string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptValue`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "booking" => Ok(Self::Booking),
            "admin" => Ok(Self::Admin),
            "support" => Ok(Self::Support),
            other => Err(StoreError::CorruptValue {
                field: "purpose",
                value: other.to_owned(),
            }),
        }
    }
}

/// A conversation grouping messages for one participant and purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Database ID.
    pub id: i64,
    /// Owning participant.
    pub participant_id: i64,
    /// Conversation purpose.
    pub purpose: ConversationPurpose,
    /// Session id correlating with the conversation responder.
    pub session_id: String,
    /// Only one active conversation exists per (participant, purpose).
    pub is_active: bool,
}

/// Who authored a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderTag {
    /// A client.
    User,
    /// This system.
    Bot,
    /// The coordinator.
    Coordinator,
}

impl SenderTag {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
            Self::Coordinator => "coordinator",
        }
    }

    /// Parse a stored sender tag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptValue`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(Self::User),
            "bot" => Ok(Self::Bot),
            "coordinator" => Ok(Self::Coordinator),
            other => Err(StoreError::CorruptValue {
                field: "sender",
                value: other.to_owned(),
            }),
        }
    }
}

/// An append-only chat message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Database ID.
    pub id: i64,
    /// Owning conversation.
    pub conversation_id: i64,
    /// Author tag.
    pub sender: SenderTag,
    /// Message text.
    pub body: String,
    /// Transport-assigned message id, if any.
    pub transport_message_id: Option<String>,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

/// Per-event context created by the router and passed down the call chain.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The participant who sent the inbound message.
    pub participant: Participant,
    /// The active conversation the message belongs to.
    pub conversation: Conversation,
    /// Transport id of the inbound message, if present.
    pub inbound_message_id: Option<String>,
}

impl RequestContext {
    /// Session id for the conversation responder.
    pub fn session_id(&self) -> &str {
        &self.conversation.session_id
    }
}
