//! Booking-creation entry point used by the conversation side.
//!
//! Creating a booking never waits on the coordinator alert: the approval
//! request is queued and the caller gets a receiver for its outcome.

use std::sync::Arc;

use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::ledger::{AppointmentLedger, NewAppointment};
use super::{Appointment, BookingError, ServiceDescriptor};
use crate::coordinator::review::{Escalation, EscalationReason, ReviewDesk};
use crate::notify::queue::DispatchQueue;
use crate::notify::templates::appointment_data;
use crate::notify::{data_from, DeliveryResult, MessageType, NotificationRequest};
use crate::store::participants;
use crate::types::Role;

/// A client's booking request.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    /// Client phone, any format.
    pub client_phone: String,
    /// Client name, if known.
    pub client_name: Option<String>,
    /// Assigned therapist participant id.
    pub provider_id: i64,
    /// Requested service.
    pub service: ServiceDescriptor,
    /// Requested clinic-local start.
    pub requested_datetime: NaiveDateTime,
    /// Free-text notes from the client.
    pub notes: Option<String>,
}

/// A created booking.
#[derive(Debug)]
pub struct BookingReceipt {
    /// The new pending appointment.
    pub appointment: Appointment,
    /// Resolves once the coordinator alert has been sent. `None` if the
    /// alert could not be queued.
    pub coordinator_notice: Option<oneshot::Receiver<DeliveryResult>>,
}

/// Creates bookings and escalations and alerts the coordinator.
#[derive(Clone)]
pub struct BookingDesk {
    db: SqlitePool,
    ledger: Arc<AppointmentLedger>,
    queue: DispatchQueue,
    review: Arc<ReviewDesk>,
    coordinator_phone: String,
}

impl BookingDesk {
    /// Create a desk alerting `coordinator_phone`.
    pub fn new(
        db: SqlitePool,
        ledger: Arc<AppointmentLedger>,
        queue: DispatchQueue,
        review: Arc<ReviewDesk>,
        coordinator_phone: impl Into<String>,
    ) -> Self {
        Self {
            db,
            ledger,
            queue,
            review,
            coordinator_phone: coordinator_phone.into(),
        }
    }

    /// The ledger bookings are written to.
    pub fn ledger(&self) -> &Arc<AppointmentLedger> {
        &self.ledger
    }

    /// Validate and create a pending appointment, then queue the approval
    /// request for the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] for a rejected slot,
    /// [`BookingError::Ineligible`] for an inactive or non-therapist
    /// provider, [`BookingError::ParticipantNotFound`] for an unknown one,
    /// or a store error.
    pub async fn create_appointment(
        &self,
        request: BookingRequest,
    ) -> Result<BookingReceipt, BookingError> {
        let client = participants::get_or_create_participant(
            &self.db,
            &request.client_phone,
            Role::Client,
            request.client_name.as_deref(),
        )
        .await?;

        let appointment = self
            .ledger
            .create(NewAppointment {
                client_id: client.id,
                provider_id: request.provider_id,
                service: request.service,
                requested_datetime: request.requested_datetime,
                client_notes: request.notes,
            })
            .await?;
        let provider = participants::get_participant(&self.db, appointment.provider_id).await?;

        info!(
            appointment_id = appointment.id,
            client = %client.phone,
            provider_id = provider.id,
            "booking created, alerting coordinator"
        );

        let notice = self
            .queue
            .enqueue(NotificationRequest {
                recipient: self.coordinator_phone.clone(),
                message_type: MessageType::CoordinatorApprovalRequest,
                data: appointment_data(&appointment, &client, &provider),
                appointment_id: Some(appointment.id),
            })
            .ok();
        if notice.is_none() {
            warn!(appointment_id = appointment.id, "booking stays pending without a coordinator alert");
        }

        Ok(BookingReceipt {
            appointment,
            coordinator_notice: notice,
        })
    }

    /// Open an escalation for a client request that needs a human and alert
    /// the coordinator. The alert outcome is not awaited.
    ///
    /// # Errors
    ///
    /// Returns a store error if the client cannot be resolved.
    pub async fn escalate(
        &self,
        client_phone: &str,
        message: &str,
        reason: EscalationReason,
        appointment_id: Option<i64>,
    ) -> Result<Escalation, BookingError> {
        let client =
            participants::get_or_create_participant(&self.db, client_phone, Role::Client, None)
                .await?;
        let escalation = self.review.open_escalation(
            client.phone.clone(),
            client.name.clone(),
            message.trim().to_owned(),
            reason,
            appointment_id,
        );

        let context = match appointment_id {
            Some(id) => format!("Related booking: #{id}"),
            None => "No booking yet".to_owned(),
        };
        info!(
            escalation_id = %escalation.id,
            client = %client.phone,
            reason = reason.as_str(),
            "client request escalated"
        );
        let alert = self.queue.enqueue(NotificationRequest {
            recipient: self.coordinator_phone.clone(),
            message_type: MessageType::ClientEscalation,
            data: data_from([
                ("reason", reason.label().to_owned()),
                ("client_name", client.name),
                ("client_phone", client.phone),
                ("client_message", escalation.client_message.clone()),
                ("context", context),
            ]),
            appointment_id,
        });
        match alert {
            // The worker records and logs the delivery; nothing waits on it.
            Ok(_receiver) => debug!(escalation_id = %escalation.id, "escalation alert queued"),
            Err(e) => warn!(
                escalation_id = %escalation.id,
                error = %e,
                "escalation stays open without a coordinator alert"
            ),
        }
        Ok(escalation)
    }
}
