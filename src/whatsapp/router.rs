//! Route inbound WhatsApp messages to the client or coordinator path.
//!
//! The sender's normalized key decides the branch: the configured
//! coordinator goes through the decision handler, then admin commands,
//! then the conversation responder; everyone else is a client talking to
//! the conversation responder. Every inbound and outbound text is stored
//! on the participant's conversation.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use super::webhook::InboundEvent;
use super::WhatsAppError;
use crate::coordinator::admin::AdminResponder;
use crate::coordinator::handler::{CoordinatorAction, CoordinatorHandler, HandlerOutcome};
use crate::notify::dispatcher::Dispatcher;
use crate::notify::{data_from, DeliveryResult, MessageType, OutboundReply};
use crate::phone;
use crate::responder::ConversationResponder;
use crate::store::{conversations, participants};
use crate::types::{ConversationPurpose, RequestContext, Role, SenderTag};

/// Reply to a coordinator query that could not be answered.
const ADMIN_QUERY_FAILED: &str = "Could not run that query right now. Please try again.";

/// Reply when nothing could make sense of a coordinator message.
const COORDINATOR_FALLBACK: &str =
    "I couldn't process that message. Send `help` for the list of commands.";

/// Why an inbound message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Echo of one of our own sends.
    FromSelf,
    /// Sender did not normalize to a usable key.
    UnknownSender,
}

/// Which coordinator path produced the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorPath {
    /// The decision handler acted.
    Decision(CoordinatorAction),
    /// An admin command was answered.
    AdminQuery,
    /// The conversation responder answered.
    Conversation,
}

/// What routing did with one message.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Not processed; no reply.
    Dropped(DropReason),
    /// Client message answered.
    Client {
        /// Delivery of the reply.
        reply: DeliveryResult,
    },
    /// Coordinator message answered.
    Coordinator {
        /// Which path answered.
        path: CoordinatorPath,
        /// Delivery of the reply.
        reply: DeliveryResult,
    },
}

/// Routes inbound messages.
pub struct MessageRouter {
    db: SqlitePool,
    coordinator_key: String,
    coordinator_name: String,
    handler: Arc<CoordinatorHandler>,
    admin: Arc<AdminResponder>,
    responder: Arc<dyn ConversationResponder>,
    dispatcher: Arc<Dispatcher>,
}

impl MessageRouter {
    /// Create a router. `coordinator_phone` may be in any format.
    pub fn new(
        db: SqlitePool,
        coordinator_phone: &str,
        handler: Arc<CoordinatorHandler>,
        admin: Arc<AdminResponder>,
        responder: Arc<dyn ConversationResponder>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            db,
            coordinator_key: phone::normalize(coordinator_phone),
            coordinator_name: "Coordinator".to_owned(),
            handler,
            admin,
            responder,
            dispatcher,
        }
    }

    /// Display name stored for the coordinator participant.
    pub fn with_coordinator_name(mut self, name: impl Into<String>) -> Self {
        self.coordinator_name = name.into();
        self
    }

    /// Whether `raw` is the coordinator.
    pub fn is_coordinator(&self, raw: &str) -> bool {
        !self.coordinator_key.is_empty() && phone::normalize(raw) == self.coordinator_key
    }

    /// Route one inbound message and send the reply.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::Store`] if the participant, conversation or
    /// message could not be persisted. Reply delivery failures are reported
    /// in the [`RouteOutcome`], not as errors.
    pub async fn route(&self, event: &InboundEvent) -> Result<RouteOutcome, WhatsAppError> {
        if event.from_me {
            debug!(message_id = ?event.message_id, "dropping echo of own message");
            return Ok(RouteOutcome::Dropped(DropReason::FromSelf));
        }
        let key = phone::normalize(&event.from);
        if key.is_empty() {
            warn!(raw = %event.from, "dropping message with unusable sender");
            return Ok(RouteOutcome::Dropped(DropReason::UnknownSender));
        }

        if key == self.coordinator_key {
            self.route_coordinator(event).await
        } else {
            self.route_client(event).await
        }
    }

    async fn context(
        &self,
        event: &InboundEvent,
        role: Role,
        name: Option<&str>,
        purpose: ConversationPurpose,
        sender: SenderTag,
    ) -> Result<RequestContext, WhatsAppError> {
        let participant =
            participants::get_or_create_participant(&self.db, &event.from, role, name).await?;
        let conversation =
            conversations::get_or_create_conversation(&self.db, participant.id, purpose).await?;
        conversations::append_message(
            &self.db,
            conversation.id,
            sender,
            &event.body,
            event.message_id.as_deref(),
        )
        .await?;
        Ok(RequestContext {
            participant,
            conversation,
            inbound_message_id: event.message_id.clone(),
        })
    }

    async fn route_client(&self, event: &InboundEvent) -> Result<RouteOutcome, WhatsAppError> {
        let ctx = self
            .context(
                event,
                Role::Client,
                event.sender_name.as_deref(),
                ConversationPurpose::Booking,
                SenderTag::User,
            )
            .await?;
        info!(
            client = %ctx.participant.phone,
            session_id = ctx.session_id(),
            "client message received"
        );

        let reply = match self.responder.respond(&ctx, &event.body).await {
            Ok(text) if !text.trim().is_empty() => OutboundReply::text(text),
            Ok(_) => {
                warn!(session_id = ctx.session_id(), "responder returned an empty reply");
                OutboundReply::new(MessageType::ServiceUnavailable, data_from([]))
            }
            Err(e) => {
                warn!(error = %e, session_id = ctx.session_id(), "responder failed, sending fallback");
                OutboundReply::new(MessageType::ServiceUnavailable, data_from([]))
            }
        };
        let delivery = self.reply(&ctx, reply).await?;
        Ok(RouteOutcome::Client { reply: delivery })
    }

    async fn route_coordinator(&self, event: &InboundEvent) -> Result<RouteOutcome, WhatsAppError> {
        let ctx = self
            .context(
                event,
                Role::Coordinator,
                Some(&self.coordinator_name),
                ConversationPurpose::Admin,
                SenderTag::Coordinator,
            )
            .await?;

        let (path, reply) = match self.handler.handle(&event.body).await {
            HandlerOutcome::Handled(handled) => {
                (CoordinatorPath::Decision(handled.action), handled.reply)
            }
            HandlerOutcome::NotApplicable => match self.admin.respond(&event.body).await {
                Ok(Some(text)) => (CoordinatorPath::AdminQuery, OutboundReply::text(text)),
                Ok(None) => (
                    CoordinatorPath::Conversation,
                    self.coordinator_conversation(&ctx, &event.body).await,
                ),
                Err(e) => {
                    error!(error = %e, "admin query failed");
                    (CoordinatorPath::AdminQuery, OutboundReply::text(ADMIN_QUERY_FAILED))
                }
            },
        };
        debug!(?path, "coordinator message handled");

        let delivery = self.reply(&ctx, reply).await?;
        Ok(RouteOutcome::Coordinator {
            path,
            reply: delivery,
        })
    }

    async fn coordinator_conversation(&self, ctx: &RequestContext, text: &str) -> OutboundReply {
        match self.responder.respond(ctx, text).await {
            Ok(reply) if !reply.trim().is_empty() => OutboundReply::text(reply),
            Ok(_) => OutboundReply::text(COORDINATOR_FALLBACK),
            Err(e) => {
                warn!(error = %e, "responder failed for coordinator message");
                OutboundReply::text(COORDINATOR_FALLBACK)
            }
        }
    }

    /// Render, send and store a reply on the sender's conversation.
    async fn reply(
        &self,
        ctx: &RequestContext,
        reply: OutboundReply,
    ) -> Result<DeliveryResult, WhatsAppError> {
        let recipient = &ctx.participant.phone;
        let text = match self.dispatcher.render(reply.message_type, &reply.data) {
            Ok(text) => text,
            Err(e) => {
                error!(
                    error = %e,
                    message_type = reply.message_type.as_str(),
                    "reply render failed, sending fallback"
                );
                return Ok(self
                    .dispatcher
                    .send(
                        recipient,
                        MessageType::ServiceUnavailable,
                        &data_from([]),
                        reply.appointment_id,
                    )
                    .await);
            }
        };

        let delivery = self
            .dispatcher
            .deliver(recipient, reply.message_type, &text, reply.appointment_id)
            .await;
        conversations::append_message(
            &self.db,
            ctx.conversation.id,
            SenderTag::Bot,
            &text,
            delivery.transport_message_id.as_deref(),
        )
        .await?;
        Ok(delivery)
    }
}
