//! Appointment ledger: the only writer of appointment state.
//!
//! Transitions are a single conditional `UPDATE ... WHERE status = 'pending'`.
//! SQLite applies it atomically, so of two racing coordinator replies exactly
//! one sees `rows_affected == 1`; the other gets
//! [`BookingError::InvalidTransition`].

use chrono::{Local, NaiveDateTime};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::rules::BookingRules;
use super::{
    format_datetime, parse_datetime, Appointment, AppointmentStatus, BookingError,
    ServiceDescriptor, ServiceKind,
};
use crate::store::{now_timestamp, participants, StoreError};
use crate::types::Role;

/// Row type returned by SQLite queries for appointments.
type AppointmentRow = (
    i64,
    i64,
    i64,
    String,
    i64,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

const SELECT_COLUMNS: &str = "SELECT id, client_id, provider_id, service_kind, duration_minutes, \
     service_description, requested_datetime, confirmed_datetime, status, client_notes, \
     coordinator_notes, created_at, updated_at FROM appointments";

/// Appends `?2` to `coordinator_notes`, newline-separated, when `?2` is not NULL.
const APPEND_NOTES_SQL: &str = "coordinator_notes = CASE \
     WHEN ?2 IS NULL THEN coordinator_notes \
     WHEN coordinator_notes IS NULL OR coordinator_notes = '' THEN ?2 \
     ELSE coordinator_notes || char(10) || ?2 END";

fn from_row(row: AppointmentRow) -> Result<Appointment, BookingError> {
    let (
        id,
        client_id,
        provider_id,
        kind,
        duration,
        description,
        requested,
        confirmed,
        status,
        client_notes,
        coordinator_notes,
        created_at,
        updated_at,
    ) = row;
    let duration_minutes = u32::try_from(duration).map_err(|_| StoreError::CorruptValue {
        field: "duration_minutes",
        value: duration.to_string(),
    })?;
    Ok(Appointment {
        id,
        client_id,
        provider_id,
        service: ServiceDescriptor {
            kind: ServiceKind::parse(&kind)?,
            duration_minutes,
            description,
        },
        requested_datetime: parse_datetime(&requested)?,
        confirmed_datetime: confirmed.as_deref().map(parse_datetime).transpose()?,
        status: AppointmentStatus::parse(&status)?,
        client_notes,
        coordinator_notes,
        created_at,
        updated_at,
    })
}

/// Parameters for a new appointment.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    /// Client participant id.
    pub client_id: i64,
    /// Therapist participant id.
    pub provider_id: i64,
    /// Requested service.
    pub service: ServiceDescriptor,
    /// Requested clinic-local start.
    pub requested_datetime: NaiveDateTime,
    /// Optional client notes.
    pub client_notes: Option<String>,
}

/// Appointment counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Awaiting decision.
    pub pending: i64,
    /// Confirmed.
    pub confirmed: i64,
    /// Cancelled.
    pub cancelled: i64,
    /// Completed.
    pub completed: i64,
}

impl StatusCounts {
    /// Sum across all statuses.
    pub fn total(&self) -> i64 {
        self.pending
            .saturating_add(self.confirmed)
            .saturating_add(self.cancelled)
            .saturating_add(self.completed)
    }
}

/// The appointment ledger.
#[derive(Debug, Clone)]
pub struct AppointmentLedger {
    db: SqlitePool,
    rules: BookingRules,
}

impl AppointmentLedger {
    /// Create a ledger over an open pool.
    pub fn new(db: SqlitePool, rules: BookingRules) -> Self {
        Self { db, rules }
    }

    /// Business rules in force.
    pub fn rules(&self) -> &BookingRules {
        &self.rules
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Create a pending appointment, validated against the current local time.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] for a past, too-distant or
    /// out-of-hours slot, [`BookingError::Ineligible`] when the provider is
    /// not an active therapist or the client is inactive,
    /// [`BookingError::ParticipantNotFound`] for unknown client or provider
    /// ids, or a store error.
    pub async fn create(&self, request: NewAppointment) -> Result<Appointment, BookingError> {
        self.create_at(request, Local::now().naive_local()).await
    }

    /// Create a pending appointment, validated against an explicit `now`.
    ///
    /// # Errors
    ///
    /// Same as [`AppointmentLedger::create`].
    pub async fn create_at(
        &self,
        request: NewAppointment,
        now: NaiveDateTime,
    ) -> Result<Appointment, BookingError> {
        let client = self.participant(request.client_id).await?;
        let provider = self.participant(request.provider_id).await?;

        let mut ineligible = Vec::new();
        if provider.role != Role::Therapist {
            ineligible.push(format!("participant #{} is not a therapist", provider.id));
        } else if !provider.is_active {
            ineligible.push(format!("therapist {} is not taking bookings", provider.name));
        }
        if !client.is_active {
            ineligible.push(format!("client #{} is inactive", client.id));
        }
        if !ineligible.is_empty() {
            warn!(
                client_id = client.id,
                provider_id = provider.id,
                problems = ?ineligible,
                "booking refused"
            );
            return Err(BookingError::Ineligible(ineligible));
        }

        let problems =
            self.rules
                .problems(request.requested_datetime, request.service.duration_minutes, now);
        if !problems.is_empty() {
            debug!(client_id = client.id, ?problems, "booking rejected");
            return Err(BookingError::Validation(problems));
        }

        let now_ts = now_timestamp();
        let result = sqlx::query(
            "INSERT INTO appointments (client_id, provider_id, service_kind, duration_minutes, \
             service_description, requested_datetime, status, client_notes, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?8)",
        )
        .bind(request.client_id)
        .bind(request.provider_id)
        .bind(request.service.kind.as_str())
        .bind(i64::from(request.service.duration_minutes))
        .bind(&request.service.description)
        .bind(format_datetime(&request.requested_datetime))
        .bind(&request.client_notes)
        .bind(&now_ts)
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        info!(
            appointment_id = id,
            client_id = request.client_id,
            provider_id = request.provider_id,
            requested = %request.requested_datetime,
            "appointment created"
        );
        self.get(id).await
    }

    async fn participant(&self, id: i64) -> Result<crate::types::Participant, BookingError> {
        match participants::get_participant(&self.db, id).await {
            Ok(p) => Ok(p),
            Err(StoreError::ParticipantNotFound(_)) => Err(BookingError::ParticipantNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Load an appointment if it exists.
    ///
    /// # Errors
    ///
    /// Returns a store error on SQLite failure or corrupt row.
    pub async fn find(&self, id: i64) -> Result<Option<Appointment>, BookingError> {
        let row: Option<AppointmentRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.map(from_row).transpose()
    }

    /// Load an appointment.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::AppointmentNotFound`] if no such appointment.
    pub async fn get(&self, id: i64) -> Result<Appointment, BookingError> {
        self.find(id)
            .await?
            .ok_or(BookingError::AppointmentNotFound(id))
    }

    /// Move a pending appointment to `confirmed` or `cancelled`.
    ///
    /// Confirming copies `requested_datetime` into `confirmed_datetime`.
    /// `notes`, when given, are appended to the coordinator notes.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::AppointmentNotFound`] for an unknown id and
    /// [`BookingError::InvalidTransition`] if the appointment is no longer
    /// pending or `target` is not a legal destination.
    pub async fn transition(
        &self,
        id: i64,
        target: AppointmentStatus,
        notes: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        if !AppointmentStatus::Pending.can_transition_to(target) {
            let current = self.get(id).await?.status;
            return Err(BookingError::InvalidTransition {
                id,
                current,
                target,
            });
        }

        let sql = format!(
            "UPDATE appointments SET status = ?1, \
             confirmed_datetime = CASE WHEN ?1 = 'confirmed' THEN requested_datetime ELSE NULL END, \
             {APPEND_NOTES_SQL}, updated_at = ?3 \
             WHERE id = ?4 AND status = 'pending'"
        );
        let result = sqlx::query(&sql)
            .bind(target.as_str())
            .bind(notes)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejection(id, target).await);
        }

        info!(appointment_id = id, status = target.as_str(), "appointment transitioned");
        self.get(id).await
    }

    /// Move a pending appointment to a new slot. It stays pending and
    /// re-enters the approval queue.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] if the new slot breaks a booking
    /// rule, [`BookingError::AppointmentNotFound`] for an unknown id, or
    /// [`BookingError::InvalidTransition`] if the appointment is not pending.
    pub async fn reschedule(
        &self,
        id: i64,
        new_datetime: NaiveDateTime,
        notes: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        self.reschedule_at(id, new_datetime, notes, Local::now().naive_local())
            .await
    }

    /// [`AppointmentLedger::reschedule`] against an explicit `now`.
    ///
    /// # Errors
    ///
    /// Same as [`AppointmentLedger::reschedule`].
    pub async fn reschedule_at(
        &self,
        id: i64,
        new_datetime: NaiveDateTime,
        notes: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Appointment, BookingError> {
        let current = self.get(id).await?;
        if current.status != AppointmentStatus::Pending {
            return Err(BookingError::InvalidTransition {
                id,
                current: current.status,
                target: AppointmentStatus::Pending,
            });
        }
        self.rules
            .validate(new_datetime, current.service.duration_minutes, now)?;

        let sql = format!(
            "UPDATE appointments SET requested_datetime = ?1, {APPEND_NOTES_SQL}, updated_at = ?3 \
             WHERE id = ?4 AND status = 'pending'"
        );
        let result = sqlx::query(&sql)
            .bind(format_datetime(&new_datetime))
            .bind(notes)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejection(id, AppointmentStatus::Pending).await);
        }

        info!(appointment_id = id, requested = %new_datetime, "appointment rescheduled");
        self.get(id).await
    }

    /// Explain why a conditional update touched no rows.
    async fn rejection(&self, id: i64, target: AppointmentStatus) -> BookingError {
        match self.find(id).await {
            Ok(Some(appointment)) => {
                debug!(
                    appointment_id = id,
                    current = appointment.status.as_str(),
                    target = target.as_str(),
                    "transition rejected"
                );
                BookingError::InvalidTransition {
                    id,
                    current: appointment.status,
                    target,
                }
            }
            Ok(None) => BookingError::AppointmentNotFound(id),
            Err(e) => e,
        }
    }

    /// Most recently created pending appointment for a provider.
    ///
    /// # Errors
    ///
    /// Returns a store error on SQLite failure.
    pub async fn latest_pending_for(
        &self,
        provider_id: i64,
    ) -> Result<Option<Appointment>, BookingError> {
        let row: Option<AppointmentRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' AND provider_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(provider_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(from_row).transpose()
    }

    /// Most recently created pending appointment across all providers.
    ///
    /// # Errors
    ///
    /// Returns a store error on SQLite failure.
    pub async fn latest_pending(&self) -> Result<Option<Appointment>, BookingError> {
        let row: Option<AppointmentRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .fetch_optional(&self.db)
        .await?;
        row.map(from_row).transpose()
    }

    /// Pending appointments, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error on SQLite failure.
    pub async fn pending(&self, limit: u32) -> Result<Vec<Appointment>, BookingError> {
        self.query_list(
            &format!("{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY created_at DESC, id DESC LIMIT ?1"),
            limit,
        )
        .await
    }

    /// Most recently created appointments of any status.
    ///
    /// # Errors
    ///
    /// Returns a store error on SQLite failure.
    pub async fn recent(&self, limit: u32) -> Result<Vec<Appointment>, BookingError> {
        self.query_list(
            &format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT ?1"),
            limit,
        )
        .await
    }

    async fn query_list(&self, sql: &str, limit: u32) -> Result<Vec<Appointment>, BookingError> {
        let rows: Vec<AppointmentRow> = sqlx::query_as(sql)
            .bind(i64::from(limit))
            .fetch_all(&self.db)
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// A client's appointments, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error on SQLite failure.
    pub async fn for_client(
        &self,
        client_id: i64,
        limit: u32,
    ) -> Result<Vec<Appointment>, BookingError> {
        let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE client_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))
        .bind(client_id)
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Pending or confirmed appointments whose effective start lies in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns a store error on SQLite failure.
    pub async fn scheduled_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Appointment>, BookingError> {
        let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE status IN ('pending', 'confirmed') \
             AND COALESCE(confirmed_datetime, requested_datetime) >= ?1 \
             AND COALESCE(confirmed_datetime, requested_datetime) < ?2 \
             ORDER BY COALESCE(confirmed_datetime, requested_datetime), id"
        ))
        .bind(format_datetime(&start))
        .bind(format_datetime(&end))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Count appointments per status.
    ///
    /// # Errors
    ///
    /// Returns a store error on SQLite failure.
    pub async fn status_counts(&self) -> Result<StatusCounts, BookingError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM appointments GROUP BY status")
                .fetch_all(&self.db)
                .await?;
        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            match AppointmentStatus::parse(&status)? {
                AppointmentStatus::Pending => counts.pending = n,
                AppointmentStatus::Confirmed => counts.confirmed = n,
                AppointmentStatus::Cancelled => counts.cancelled = n,
                AppointmentStatus::Completed => counts.completed = n,
            }
        }
        Ok(counts)
    }
}
