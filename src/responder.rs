//! Conversation responder capability.
//!
//! The router hands every client message (and every coordinator message
//! nothing else claimed) to a [`ConversationResponder`]. The responder is
//! opaque: an HTTP agent in production, a fixed reply in tests and offline
//! runs.
//!
//! The HTTP agent may ask for a booking or an escalation alongside its
//! reply; those go through the [`BookingDesk`] and their outcome is
//! appended to the reply text.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::booking::desk::{BookingDesk, BookingRequest};
use crate::booking::{BookingError, ServiceDescriptor, ServiceKind};
use crate::coordinator::review::EscalationReason;
use crate::types::RequestContext;

/// Date-time formats accepted from the agent.
const AGENT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Longest error body kept in a [`ResponderError::HttpStatus`].
const MAX_ERROR_BODY_CHARS: usize = 256;

/// HTTP connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Errors from a conversation responder.
#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    /// The HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The agent answered with a non-success status.
    #[error("agent returned HTTP {status}: {body}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// The agent's reply could not be parsed.
    #[error("invalid agent reply: {0}")]
    InvalidReply(String),
}

/// Produces a conversational reply to one inbound message.
#[async_trait]
pub trait ConversationResponder: Send + Sync {
    /// Reply to `text` within the conversation described by `ctx`.
    async fn respond(&self, ctx: &RequestContext, text: &str) -> Result<String, ResponderError>;
}

// ---------------------------------------------------------------------------
// HTTP agent
// ---------------------------------------------------------------------------

/// Request body posted to the agent.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AgentRequest<'a> {
    /// Inbound text.
    pub message: &'a str,
    /// Normalized participant key.
    pub participant: &'a str,
    /// Participant role tag.
    pub role: &'a str,
    /// Conversation session id.
    pub session_id: &'a str,
}

/// Reply body returned by the agent.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AgentReply {
    /// Reply text.
    #[serde(alias = "response", alias = "text")]
    pub reply: String,
    /// Booking the agent wants created.
    #[serde(default)]
    pub booking: Option<AgentBooking>,
    /// Escalation the agent wants opened.
    #[serde(default)]
    pub escalation: Option<AgentEscalation>,
}

/// Booking requested by the agent.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AgentBooking {
    /// Therapist participant id.
    pub provider_id: i64,
    /// Session kind.
    pub service: ServiceKind,
    /// Length in minutes.
    pub duration_minutes: u32,
    /// Clinic-local start, `YYYY-MM-DD HH:MM`.
    pub datetime: String,
    /// Service description.
    #[serde(default)]
    pub description: String,
    /// Client notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Escalation requested by the agent.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AgentEscalation {
    /// Reason tag, e.g. `medical_clarification`.
    pub reason: String,
    /// Question to forward; defaults to the client's message.
    #[serde(default)]
    pub message: Option<String>,
    /// Related appointment.
    #[serde(default)]
    pub appointment_id: Option<i64>,
}

/// Calls a conversational agent over HTTP.
pub struct HttpResponder {
    client: reqwest::Client,
    url: String,
    desk: Option<BookingDesk>,
}

impl HttpResponder {
    /// Create a responder posting to `url`, bounded by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            url: url.into(),
            desk: None,
        }
    }

    /// Let the agent create bookings and escalations through `desk`.
    pub fn with_booking_desk(mut self, desk: BookingDesk) -> Self {
        self.desk = Some(desk);
        self
    }
}

#[async_trait]
impl ConversationResponder for HttpResponder {
    async fn respond(&self, ctx: &RequestContext, text: &str) -> Result<String, ResponderError> {
        let body = AgentRequest {
            message: text,
            participant: &ctx.participant.phone,
            role: ctx.participant.role.as_str(),
            session_id: ctx.session_id(),
        };
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        let payload = response.text().await?;
        if !status.is_success() {
            return Err(ResponderError::HttpStatus {
                status: status.as_u16(),
                body: payload.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        let reply: AgentReply = serde_json::from_str(&payload)
            .map_err(|e| ResponderError::InvalidReply(e.to_string()))?;
        debug!(session_id = ctx.session_id(), chars = reply.reply.len(), "agent replied");
        Ok(apply_agent_reply(self.desk.as_ref(), ctx, text, reply).await)
    }
}

/// Carry out any booking or escalation in `reply` and return the text to
/// send the client. Without a desk, requested actions are ignored.
pub async fn apply_agent_reply(
    desk: Option<&BookingDesk>,
    ctx: &RequestContext,
    inbound: &str,
    reply: AgentReply,
) -> String {
    let mut text = reply.reply;
    let Some(desk) = desk else {
        if reply.booking.is_some() || reply.escalation.is_some() {
            warn!(session_id = ctx.session_id(), "agent requested an action but no booking desk is attached");
        }
        return text;
    };

    if let Some(booking) = reply.booking {
        let outcome = book(desk, ctx, booking).await;
        append_line(&mut text, &outcome);
    }

    if let Some(escalation) = reply.escalation {
        let reason = EscalationReason::parse(&escalation.reason).unwrap_or_else(|| {
            warn!(reason = %escalation.reason, "unknown escalation reason, treating as complex request");
            EscalationReason::ComplexRequest
        });
        let message = escalation.message.as_deref().unwrap_or(inbound);
        match desk
            .escalate(&ctx.participant.phone, message, reason, escalation.appointment_id)
            .await
        {
            Ok(_) => append_line(
                &mut text,
                "I've passed your question to our coordinator and will get back to you.",
            ),
            Err(e) => {
                error!(error = %e, client = %ctx.participant.phone, "escalation failed");
                append_line(&mut text, GENERIC_FAILURE);
            }
        }
    }
    text
}

/// Client-facing text for an internal failure.
const GENERIC_FAILURE: &str = "Something went wrong on our side. Please try again shortly.";

async fn book(desk: &BookingDesk, ctx: &RequestContext, booking: AgentBooking) -> String {
    let Some(requested) = parse_agent_datetime(&booking.datetime) else {
        warn!(datetime = %booking.datetime, "agent sent an unparseable booking time");
        return "I couldn't read the requested time. Could you give the date and time again?"
            .to_owned();
    };
    let provider_id = booking.provider_id;
    let request = BookingRequest {
        client_phone: ctx.participant.phone.clone(),
        client_name: Some(ctx.participant.name.clone()),
        provider_id: booking.provider_id,
        service: ServiceDescriptor {
            kind: booking.service,
            duration_minutes: booking.duration_minutes,
            description: booking.description,
        },
        requested_datetime: requested,
        notes: booking.notes,
    };
    match desk.create_appointment(request).await {
        Ok(receipt) => {
            info!(appointment_id = receipt.appointment.id, "agent booking created");
            format!(
                "Your request #{} for {} at {} has been sent for confirmation. \
                 We'll message you as soon as it is approved.",
                receipt.appointment.id,
                receipt.appointment.date_label(),
                receipt.appointment.time_label()
            )
        }
        Err(BookingError::Validation(problems)) => {
            format!("I couldn't book that: {}.", problems.join("; "))
        }
        Err(BookingError::Ineligible(problems)) => {
            warn!(?problems, client = %ctx.participant.phone, "agent booking refused");
            GENERIC_FAILURE.to_owned()
        }
        Err(BookingError::ParticipantNotFound(id)) if id == provider_id => {
            "That therapist isn't available for booking. Could you choose another?".to_owned()
        }
        Err(e) => {
            error!(error = %e, client = %ctx.participant.phone, "agent booking failed");
            GENERIC_FAILURE.to_owned()
        }
    }
}

fn parse_agent_datetime(s: &str) -> Option<NaiveDateTime> {
    AGENT_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s.trim(), f).ok())
}

fn append_line(text: &mut String, line: &str) {
    if !text.trim().is_empty() {
        text.push_str("\n\n");
    }
    text.push_str(line);
}

// ---------------------------------------------------------------------------
// Fixed reply
// ---------------------------------------------------------------------------

/// Always answers with the same text.
#[derive(Debug, Clone)]
pub struct StaticResponder {
    reply: String,
}

impl StaticResponder {
    /// Create a responder that always returns `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ConversationResponder for StaticResponder {
    async fn respond(&self, _ctx: &RequestContext, _text: &str) -> Result<String, ResponderError> {
        Ok(self.reply.clone())
    }
}
