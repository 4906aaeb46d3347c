//! Appointment booking: types, validation rules, the ledger state machine,
//! and the booking-creation entry point.
//!
//! State machine: `pending -> {confirmed, cancelled}` plus in-place
//! reschedule while pending. `confirmed` and `cancelled` are terminal here;
//! `completed` is only ever read, never written.

pub mod desk;
pub mod ledger;
pub mod rules;

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Storage format for clinic-local appointment date-times.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors from booking operations.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// Booking parameters were rejected. Never retried automatically.
    #[error("invalid booking: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Client or provider may not take part in a booking. Operator-facing
    /// detail, not shown to clients.
    #[error("ineligible booking: {}", .0.join("; "))]
    Ineligible(Vec<String>),

    /// No appointment with this id.
    #[error("appointment not found: #{0}")]
    AppointmentNotFound(i64),

    /// No participant with this id.
    #[error("participant not found: #{0}")]
    ParticipantNotFound(i64),

    /// The appointment is not in a state that allows the requested change.
    #[error("appointment #{id} is already {current}, cannot move to {target}")]
    InvalidTransition {
        /// Appointment id.
        id: i64,
        /// Status at the time of the attempt.
        current: AppointmentStatus,
        /// Requested status.
        target: AppointmentStatus,
    },

    /// Participant or conversation store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Lifecycle status of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Awaiting coordinator decision.
    Pending,
    /// Approved by the coordinator.
    Confirmed,
    /// Declined or cancelled.
    Cancelled,
    /// Marked done externally after the appointment time.
    Completed,
}

impl AppointmentStatus {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse a stored status string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptValue`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(StoreError::CorruptValue {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }

    /// Whether no further ledger transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Check whether a ledger transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Confirmed) | (Self::Pending, Self::Cancelled)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the session takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Client visits the clinic.
    InCall,
    /// Therapist visits the client.
    OutCall,
}

impl ServiceKind {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InCall => "in_call",
            Self::OutCall => "out_call",
        }
    }

    /// Parse a stored service kind.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptValue`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "in_call" => Ok(Self::InCall),
            "out_call" => Ok(Self::OutCall),
            other => Err(StoreError::CorruptValue {
                field: "service_kind",
                value: other.to_owned(),
            }),
        }
    }

    /// Human-readable label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InCall => "In-call session",
            Self::OutCall => "Out-call session",
        }
    }
}

/// The requested service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Session kind.
    pub kind: ServiceKind,
    /// Length in minutes.
    pub duration_minutes: u32,
    /// Free-text description from the client.
    pub description: String,
}

impl ServiceDescriptor {
    /// One-line summary, e.g. `In-call session (60 min)`.
    pub fn summary(&self) -> String {
        format!("{} ({} min)", self.kind.label(), self.duration_minutes)
    }
}

/// A booked appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Database id, also the id coordinators quote in replies.
    pub id: i64,
    /// Owning client participant.
    pub client_id: i64,
    /// Assigned therapist participant.
    pub provider_id: i64,
    /// Requested service.
    pub service: ServiceDescriptor,
    /// Requested clinic-local start time.
    pub requested_datetime: NaiveDateTime,
    /// Set exactly when `status` is confirmed.
    pub confirmed_datetime: Option<NaiveDateTime>,
    /// Current status.
    pub status: AppointmentStatus,
    /// Notes from the client.
    pub client_notes: Option<String>,
    /// Notes appended by coordinator actions.
    pub coordinator_notes: Option<String>,
    /// Creation timestamp (RFC 3339, UTC).
    pub created_at: String,
    /// Last update timestamp (RFC 3339, UTC).
    pub updated_at: String,
}

impl Appointment {
    /// The effective start: confirmed time if set, else the requested time.
    pub fn scheduled_datetime(&self) -> NaiveDateTime {
        self.confirmed_datetime.unwrap_or(self.requested_datetime)
    }

    /// Date label for notifications, e.g. `Monday, March 02, 2026`.
    pub fn date_label(&self) -> String {
        self.scheduled_datetime().format("%A, %B %d, %Y").to_string()
    }

    /// Time label for notifications, e.g. `02:30 PM`.
    pub fn time_label(&self) -> String {
        self.scheduled_datetime().format("%I:%M %p").to_string()
    }
}

/// Format a clinic-local date-time for storage.
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a stored clinic-local date-time.
///
/// # Errors
///
/// Returns [`StoreError::CorruptValue`] if the text does not match [`DATETIME_FORMAT`].
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).map_err(|_| StoreError::CorruptValue {
        field: "datetime",
        value: s.to_owned(),
    })
}
