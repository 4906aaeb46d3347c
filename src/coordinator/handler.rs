//! Coordinator-response handler.
//!
//! Turns one coordinator message into at most one ledger action plus the
//! notifications that follow from it:
//!
//! 1. A live recommendation draft is resolved by an exact
//!    `APPROVE` / `REVISE: ...` / `DECLINE` reply. An expired draft is
//!    discarded and the reply is handled as if none were staged.
//! 2. `RECOMMENDATION: ...` (or long free text the classifier cannot place)
//!    answers the latest open escalation with a draft for review.
//! 3. Otherwise the classifier decides approve / decline / modify against
//!    the appointment id quoted in that decision, or the most recently
//!    created pending one.
//! 4. An unclear reply while something is pending gets a clarification;
//!    with nothing pending the message is not ours to handle.
//!
//! Coordinator-facing replies are returned to the caller; client-facing
//! notifications are sent here.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use super::admin::AdminCommand;
use super::intent::{Intent, IntentClassifier};
use super::review::{
    strip_recommendation_prefix, DraftTake, Escalation, RecommendationDraft, ReviewCommand,
    ReviewDesk,
};
use super::CoordinatorError;
use crate::booking::ledger::AppointmentLedger;
use crate::booking::{Appointment, AppointmentStatus, BookingError};
use crate::notify::dispatcher::Dispatcher;
use crate::notify::templates::appointment_data;
use crate::notify::{data_from, DeliveryResult, MessageType, OutboundReply};
use crate::store::participants;
use crate::types::Participant;

/// Unclassified replies with at least this many words count as guidance
/// when an escalation is open.
const GUIDANCE_MIN_WORDS: usize = 5;

/// What the handler did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Appointment confirmed.
    Confirmed(i64),
    /// Appointment declined.
    Declined(i64),
    /// Client asked for changes; ledger untouched.
    ModificationRequested(i64),
    /// Reply was unclear; coordinator asked to rephrase.
    Clarified,
    /// The targeted appointment had already left `pending`.
    AlreadyResolved {
        /// Appointment id.
        id: i64,
        /// Its current status.
        status: AppointmentStatus,
    },
    /// Guidance drafted and sent back for confirmation.
    RecommendationStaged,
    /// Confirmed guidance delivered to the client.
    RecommendationSent,
    /// Draft replaced and sent back for confirmation.
    RecommendationRevised,
    /// Draft withdrawn; client offered a consultation.
    RecommendationWithdrawn,
    /// Draft expired before confirmation.
    RecommendationExpired,
    /// Guidance sent with no escalation open.
    NoOpenEscalation,
    /// Internal failure; coordinator told to retry.
    Failed,
}

/// A handled coordinator message.
#[derive(Debug, Clone)]
pub struct HandledReply {
    /// What happened.
    pub action: CoordinatorAction,
    /// Reply for the coordinator.
    pub reply: OutboundReply,
    /// Client notification sent as part of the action, if any.
    pub client_delivery: Option<DeliveryResult>,
}

/// Result of [`CoordinatorHandler::handle`].
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// Not an appointment decision or review reply.
    NotApplicable,
    /// Handled; send `reply` to the coordinator.
    Handled(HandledReply),
}

/// Executes coordinator decisions.
pub struct CoordinatorHandler {
    db: SqlitePool,
    ledger: Arc<AppointmentLedger>,
    dispatcher: Arc<Dispatcher>,
    review: Arc<ReviewDesk>,
    classifier: IntentClassifier,
    provider_scope: Option<i64>,
}

impl CoordinatorHandler {
    /// Create a handler acting on the global pending queue.
    pub fn new(
        db: SqlitePool,
        ledger: Arc<AppointmentLedger>,
        dispatcher: Arc<Dispatcher>,
        review: Arc<ReviewDesk>,
    ) -> Self {
        Self {
            db,
            ledger,
            dispatcher,
            review,
            classifier: IntentClassifier::default(),
            provider_scope: None,
        }
    }

    /// Restrict the pending queue to one provider.
    pub fn with_provider_scope(mut self, provider_id: Option<i64>) -> Self {
        self.provider_scope = provider_id;
        self
    }

    /// Use custom classifier tables.
    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Handle one coordinator message. Internal failures are logged and
    /// answered with a generic retry notice.
    pub async fn handle(&self, text: &str) -> HandlerOutcome {
        match self.try_handle(text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "coordinator reply handling failed");
                HandlerOutcome::Handled(HandledReply {
                    action: CoordinatorAction::Failed,
                    reply: feedback(
                        "Something went wrong while processing your reply.".to_owned(),
                        "Please send `pending` to check the queue before retrying.".to_owned(),
                    ),
                    client_delivery: None,
                })
            }
        }
    }

    async fn try_handle(&self, text: &str) -> Result<HandlerOutcome, CoordinatorError> {
        let mut expired = None;
        if let Some(command) = ReviewCommand::parse(text) {
            match self.review.take_draft() {
                DraftTake::Ready(draft) => {
                    return self
                        .resolve_review(command, draft)
                        .await
                        .map(HandlerOutcome::Handled);
                }
                DraftTake::Expired(draft) => {
                    warn!(escalation_id = %draft.escalation.id, "recommendation draft expired");
                    expired = Some(draft);
                }
                DraftTake::None => {}
            }
        }

        let outcome = self.decide(text).await?;
        match (outcome, expired) {
            (HandlerOutcome::NotApplicable, Some(draft)) => {
                Ok(HandlerOutcome::Handled(HandledReply {
                    action: CoordinatorAction::RecommendationExpired,
                    reply: feedback(
                        format!(
                            "The draft for {} expired and was not sent.",
                            draft.escalation.client_name
                        ),
                        "Send a new RECOMMENDATION: to start again.".to_owned(),
                    ),
                    client_delivery: None,
                }))
            }
            (outcome, _) => Ok(outcome),
        }
    }

    /// Guidance, or an appointment decision against the pending queue.
    async fn decide(&self, text: &str) -> Result<HandlerOutcome, CoordinatorError> {
        if let Some(guidance) = strip_recommendation_prefix(text) {
            return self.answer_escalation(guidance).await.map(HandlerOutcome::Handled);
        }

        let verdict = self.classifier.classify(text);
        debug!(
            intent = verdict.intent.as_str(),
            confidence = verdict.confidence,
            appointment_id = ?verdict.appointment_id,
            "coordinator reply classified"
        );

        if verdict.intent == Intent::Unknown
            && text.split_whitespace().count() >= GUIDANCE_MIN_WORDS
            && self.review.latest_escalation().is_some()
        {
            return self.answer_escalation(text.trim()).await.map(HandlerOutcome::Handled);
        }

        // A number in an unclear reply is not an appointment reference.
        let quoted = match verdict.intent {
            Intent::Unknown => None,
            _ => verdict.appointment_id,
        };
        let Some(target) = self.resolve_target(quoted).await? else {
            debug!("no pending appointment, reply not handled as a decision");
            return Ok(HandlerOutcome::NotApplicable);
        };

        let handled = match verdict.intent {
            Intent::Approval => self.approve(&target).await?,
            Intent::Decline => self.decline(&target, text).await?,
            Intent::Modification => self.request_modification(&target, text).await?,
            Intent::Unknown => {
                if AdminCommand::parse(text).is_some() {
                    return Ok(HandlerOutcome::NotApplicable);
                }
                info!(appointment_id = target.id, "coordinator reply unclear, asking again");
                HandledReply {
                    action: CoordinatorAction::Clarified,
                    reply: OutboundReply::new(
                        MessageType::CoordinatorClarification,
                        data_from([("raw_message", text.trim().to_owned())]),
                    )
                    .for_appointment(target.id),
                    client_delivery: None,
                }
            }
        };
        Ok(HandlerOutcome::Handled(handled))
    }

    /// The quoted appointment if it exists and is in scope, else the most
    /// recently created pending one.
    ///
    /// A quoted id only comes from a decisive reply, so a stale decision on
    /// a resolved appointment is still reported back to the coordinator.
    async fn resolve_target(
        &self,
        quoted: Option<i64>,
    ) -> Result<Option<Appointment>, CoordinatorError> {
        if let Some(id) = quoted {
            if let Some(appointment) = self.ledger.find(id).await? {
                if self
                    .provider_scope
                    .map_or(true, |p| p == appointment.provider_id)
                {
                    return Ok(Some(appointment));
                }
            }
            debug!(quoted = id, "quoted number is not a known appointment, using latest pending");
        }
        let latest = match self.provider_scope {
            Some(provider) => self.ledger.latest_pending_for(provider).await?,
            None => self.ledger.latest_pending().await?,
        };
        Ok(latest)
    }

    async fn parties(
        &self,
        appointment: &Appointment,
    ) -> Result<(Participant, Participant), CoordinatorError> {
        let client = participants::get_participant(&self.db, appointment.client_id).await?;
        let provider = participants::get_participant(&self.db, appointment.provider_id).await?;
        Ok((client, provider))
    }

    async fn approve(&self, target: &Appointment) -> Result<HandledReply, CoordinatorError> {
        let appointment = match self
            .ledger
            .transition(target.id, AppointmentStatus::Confirmed, Some("Approved by coordinator"))
            .await
        {
            Ok(a) => a,
            Err(BookingError::InvalidTransition { id, current, .. }) => {
                return Ok(already_resolved(id, current))
            }
            Err(e) => return Err(e.into()),
        };

        let (client, provider) = self.parties(&appointment).await?;
        let data = appointment_data(&appointment, &client, &provider);
        let delivery = self
            .dispatcher
            .send(&client.phone, MessageType::ClientConfirmation, &data, Some(appointment.id))
            .await;

        let result = format!(
            "Approved: booking #{} for {} on {} at {} is confirmed.",
            appointment.id,
            client.name,
            appointment.date_label(),
            appointment.time_label()
        );
        Ok(HandledReply {
            action: CoordinatorAction::Confirmed(appointment.id),
            reply: feedback(result, delivery_status(&delivery, &client, "Confirmation"))
                .for_appointment(appointment.id),
            client_delivery: Some(delivery),
        })
    }

    async fn decline(
        &self,
        target: &Appointment,
        text: &str,
    ) -> Result<HandledReply, CoordinatorError> {
        let notes = format!("Cancelled: {}", text.trim());
        let appointment = match self
            .ledger
            .transition(target.id, AppointmentStatus::Cancelled, Some(&notes))
            .await
        {
            Ok(a) => a,
            Err(BookingError::InvalidTransition { id, current, .. }) => {
                return Ok(already_resolved(id, current))
            }
            Err(e) => return Err(e.into()),
        };

        let (client, provider) = self.parties(&appointment).await?;
        let data = appointment_data(&appointment, &client, &provider);
        let delivery = self
            .dispatcher
            .send(
                &client.phone,
                MessageType::ClientDeclineNotification,
                &data,
                Some(appointment.id),
            )
            .await;

        let result = format!(
            "Declined: booking #{} for {} has been cancelled.",
            appointment.id, client.name
        );
        Ok(HandledReply {
            action: CoordinatorAction::Declined(appointment.id),
            reply: feedback(result, delivery_status(&delivery, &client, "Decline notice"))
                .for_appointment(appointment.id),
            client_delivery: Some(delivery),
        })
    }

    async fn request_modification(
        &self,
        target: &Appointment,
        text: &str,
    ) -> Result<HandledReply, CoordinatorError> {
        if target.status != AppointmentStatus::Pending {
            return Ok(already_resolved(target.id, target.status));
        }

        let (client, provider) = self.parties(target).await?;
        let mut data = appointment_data(target, &client, &provider);
        data.insert(
            "modification_reason".into(),
            modification_reason(text, target.id),
        );
        let delivery = self
            .dispatcher
            .send(
                &client.phone,
                MessageType::ClientModificationRequest,
                &data,
                Some(target.id),
            )
            .await;

        let result = format!(
            "Change requested: {} has been asked to adjust booking #{}. It stays pending.",
            client.name, target.id
        );
        Ok(HandledReply {
            action: CoordinatorAction::ModificationRequested(target.id),
            reply: feedback(result, delivery_status(&delivery, &client, "Change request"))
                .for_appointment(target.id),
            client_delivery: Some(delivery),
        })
    }

    async fn answer_escalation(&self, guidance: &str) -> Result<HandledReply, CoordinatorError> {
        let Some(escalation) = self.review.latest_escalation() else {
            return Ok(HandledReply {
                action: CoordinatorAction::NoOpenEscalation,
                reply: feedback(
                    "There is no open client question to answer.".to_owned(),
                    "Recommendations are only used for escalated requests.".to_owned(),
                ),
                client_delivery: None,
            });
        };
        if guidance.is_empty() {
            return Ok(HandledReply {
                action: CoordinatorAction::Clarified,
                reply: feedback(
                    format!("Please include your guidance for {}.", escalation.client_name),
                    "Example: RECOMMENDATION: a gentle 60 minute session is suitable.".to_owned(),
                ),
                client_delivery: None,
            });
        }
        let draft = self.review.stage_draft(escalation, guidance.to_owned());
        info!(escalation_id = %draft.escalation.id, "recommendation drafted for review");
        Ok(HandledReply {
            action: CoordinatorAction::RecommendationStaged,
            reply: self.review_reply(&draft)?,
            client_delivery: None,
        })
    }

    fn review_reply(&self, draft: &RecommendationDraft) -> Result<OutboundReply, CoordinatorError> {
        let prepared = self
            .dispatcher
            .render(MessageType::ClientGuidance, &guidance_data(draft))?;
        let reply = OutboundReply::new(
            MessageType::RecommendationReview,
            data_from([
                ("client_name", draft.escalation.client_name.clone()),
                ("client_phone", draft.escalation.client_phone.clone()),
                ("prepared_response", prepared),
            ]),
        );
        Ok(match draft.escalation.appointment_id {
            Some(id) => reply.for_appointment(id),
            None => reply,
        })
    }

    async fn resolve_review(
        &self,
        command: ReviewCommand,
        draft: RecommendationDraft,
    ) -> Result<HandledReply, CoordinatorError> {
        let escalation = draft.escalation.clone();
        match command {
            ReviewCommand::Approve => {
                let delivery = self
                    .dispatcher
                    .send(
                        &escalation.client_phone,
                        MessageType::ClientGuidance,
                        &guidance_data(&draft),
                        escalation.appointment_id,
                    )
                    .await;
                self.review.close_escalation(escalation.id);
                info!(escalation_id = %escalation.id, success = delivery.success, "recommendation sent");
                Ok(HandledReply {
                    action: CoordinatorAction::RecommendationSent,
                    reply: feedback(
                        format!("Guidance approved for {}.", escalation.client_name),
                        escalation_delivery_status(&delivery, &escalation, "Guidance"),
                    ),
                    client_delivery: Some(delivery),
                })
            }
            ReviewCommand::Revise(revised) => {
                let draft = self.review.stage_draft(escalation, revised);
                Ok(HandledReply {
                    action: CoordinatorAction::RecommendationRevised,
                    reply: self.review_reply(&draft)?,
                    client_delivery: None,
                })
            }
            ReviewCommand::Decline => {
                let delivery = self
                    .dispatcher
                    .send(
                        &escalation.client_phone,
                        MessageType::ClientConsultationOffer,
                        &data_from([("client_name", escalation.client_name.clone())]),
                        escalation.appointment_id,
                    )
                    .await;
                self.review.close_escalation(escalation.id);
                info!(escalation_id = %escalation.id, "recommendation withdrawn");
                Ok(HandledReply {
                    action: CoordinatorAction::RecommendationWithdrawn,
                    reply: feedback(
                        format!(
                            "Draft withdrawn. {} has been offered a consultation.",
                            escalation.client_name
                        ),
                        escalation_delivery_status(&delivery, &escalation, "Consultation offer"),
                    ),
                    client_delivery: Some(delivery),
                })
            }
        }
    }
}

fn feedback(action_result: String, delivery_status: String) -> OutboundReply {
    OutboundReply::new(
        MessageType::CoordinatorFeedback,
        data_from([
            ("action_result", action_result),
            ("delivery_status", delivery_status),
        ]),
    )
}

fn already_resolved(id: i64, status: AppointmentStatus) -> HandledReply {
    info!(appointment_id = id, status = status.as_str(), "stale coordinator decision ignored");
    HandledReply {
        action: CoordinatorAction::AlreadyResolved { id, status },
        reply: feedback(
            format!("Appointment #{id} is already {status}."),
            "No changes were made.".to_owned(),
        )
        .for_appointment(id),
        client_delivery: None,
    }
}

fn delivery_status(delivery: &DeliveryResult, client: &Participant, what: &str) -> String {
    if delivery.success {
        format!("{what} sent to {}.", client.name)
    } else {
        format!(
            "{what} to {} ({}) failed: {}. Please contact them directly.",
            client.name,
            client.phone,
            delivery.error.as_deref().unwrap_or("unknown error")
        )
    }
}

fn escalation_delivery_status(
    delivery: &DeliveryResult,
    escalation: &Escalation,
    what: &str,
) -> String {
    if delivery.success {
        format!("{what} sent to {}.", escalation.client_name)
    } else {
        format!(
            "{what} to {} ({}) failed: {}. Please contact them directly.",
            escalation.client_name,
            escalation.client_phone,
            delivery.error.as_deref().unwrap_or("unknown error")
        )
    }
}

fn guidance_data(draft: &RecommendationDraft) -> crate::notify::TemplateData {
    data_from([
        ("client_name", draft.escalation.client_name.clone()),
        ("guidance", draft.guidance.clone()),
    ])
}

/// The coordinator's reason, without a leading command word or booking id.
fn modification_reason(text: &str, appointment_id: i64) -> String {
    let trimmed = text.trim();
    let mut rest = trimmed;
    if let Some((first, tail)) = rest.split_once(char::is_whitespace) {
        if matches!(
            first.to_lowercase().as_str(),
            "modify" | "change" | "reschedule" | "adjust" | "update" | "move"
        ) {
            rest = tail.trim_start();
        }
    }
    let id = appointment_id.to_string();
    if let Some(tail) = rest.strip_prefix(id.as_str()) {
        if tail.is_empty() || tail.starts_with(char::is_whitespace) {
            rest = tail.trim_start();
        }
    }
    let rest = rest.trim_start_matches([':', '-']).trim();
    if rest.is_empty() {
        trimmed.to_owned()
    } else {
        rest.to_owned()
    }
}
