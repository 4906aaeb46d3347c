//! Administrative query commands for the coordinator.
//!
//! Read-only: every command reads the ledger or participant store and
//! formats plain text. Unrecognized text yields `None` so the caller can
//! fall through to the conversation responder.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDateTime, NaiveTime};
use sqlx::SqlitePool;

use crate::booking::ledger::AppointmentLedger;
use crate::booking::{Appointment, AppointmentStatus, BookingError};
use crate::notify::dispatcher::Dispatcher;
use crate::store::participants;

/// Rows shown by list commands.
const LIST_LIMIT: u32 = 10;

/// A recognized coordinator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Counts by status plus delivery health.
    Status,
    /// Today's schedule.
    Today,
    /// Latest bookings of any status.
    Recent,
    /// Bookings awaiting a decision.
    Pending,
    /// Look up a client by phone or name.
    Client(String),
    /// Command reference.
    Help,
}

impl AdminCommand {
    /// Parse a coordinator message into a command.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();
        let mut words = lower.split_whitespace();
        let first = words.next()?.trim_end_matches(['.', '!', '?']);

        match first {
            "status" | "overview" | "summary" | "stats" if words.next().is_none() => {
                Some(Self::Status)
            }
            "today" | "schedule" | "agenda" if words.next().is_none() => Some(Self::Today),
            "recent" | "latest" | "bookings" if words.next().is_none() => Some(Self::Recent),
            "pending" | "queue" if words.next().is_none() => Some(Self::Pending),
            "help" | "commands" | "menu" if words.next().is_none() => Some(Self::Help),
            "client" | "lookup" | "find" => {
                let term = trimmed
                    .split_once(char::is_whitespace)
                    .map(|(_, rest)| rest.trim())
                    .unwrap_or_default();
                if term.is_empty() {
                    None
                } else {
                    Some(Self::Client(term.to_owned()))
                }
            }
            _ => None,
        }
    }
}

/// Answers [`AdminCommand`]s.
pub struct AdminResponder {
    db: SqlitePool,
    ledger: Arc<AppointmentLedger>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl AdminResponder {
    /// Create a responder over the ledger and participant store.
    pub fn new(db: SqlitePool, ledger: Arc<AppointmentLedger>) -> Self {
        Self {
            db,
            ledger,
            dispatcher: None,
        }
    }

    /// Include the dispatcher's rolling delivery success rate in `status`.
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Answer `text` if it is a command.
    ///
    /// # Errors
    ///
    /// Returns a [`BookingError`] if a ledger or participant query fails.
    pub async fn respond(&self, text: &str) -> Result<Option<String>, BookingError> {
        let Some(command) = AdminCommand::parse(text) else {
            return Ok(None);
        };
        let reply = match command {
            AdminCommand::Status => self.status().await?,
            AdminCommand::Today => self.today(Local::now().naive_local()).await?,
            AdminCommand::Recent => {
                let rows = self.ledger.recent(LIST_LIMIT).await?;
                self.list("Recent bookings", &rows).await?
            }
            AdminCommand::Pending => {
                let rows = self.ledger.pending(LIST_LIMIT).await?;
                self.list("Awaiting your decision", &rows).await?
            }
            AdminCommand::Client(term) => self.client(&term).await?,
            AdminCommand::Help => help_text(),
        };
        Ok(Some(reply))
    }

    async fn status(&self) -> Result<String, BookingError> {
        let counts = self.ledger.status_counts().await?;
        let mut out = String::from("Booking overview\n");
        let _ = writeln!(out, "Pending: {}", counts.pending);
        let _ = writeln!(out, "Confirmed: {}", counts.confirmed);
        let _ = writeln!(out, "Cancelled: {}", counts.cancelled);
        let _ = writeln!(out, "Completed: {}", counts.completed);
        let _ = write!(out, "Total: {}", counts.total());
        if let Some(rate) = self
            .dispatcher
            .as_ref()
            .and_then(|d| d.history().success_rate())
        {
            let _ = write!(out, "\nDelivery success (recent): {:.0}%", rate * 100.0);
        }
        if let Some(latest) = self.ledger.latest_pending().await? {
            let _ = write!(
                out,
                "\n\nNext decision: #{} on {} at {}",
                latest.id,
                latest.date_label(),
                latest.time_label()
            );
        }
        Ok(out)
    }

    /// Schedule for the day containing `now`.
    ///
    /// # Errors
    ///
    /// Returns a [`BookingError`] if a query fails.
    pub async fn today(&self, now: NaiveDateTime) -> Result<String, BookingError> {
        let start = now.date().and_time(NaiveTime::MIN);
        let end = start
            .checked_add_signed(Duration::days(1))
            .unwrap_or(start);
        let rows = self.ledger.scheduled_between(start, end).await?;
        if rows.is_empty() {
            return Ok(format!("No appointments on {}.", now.format("%A, %B %d")));
        }
        let mut out = format!("Schedule for {}\n", now.format("%A, %B %d"));
        for appt in &rows {
            let client = self.client_name(appt.client_id).await?;
            let _ = write!(
                out,
                "\n{} #{} {} - {} ({})",
                appt.scheduled_datetime().format("%H:%M"),
                appt.id,
                client,
                appt.service.summary(),
                appt.status
            );
        }
        Ok(out)
    }

    async fn list(&self, title: &str, rows: &[Appointment]) -> Result<String, BookingError> {
        if rows.is_empty() {
            return Ok(format!("{title}: none."));
        }
        let mut out = format!("{title}\n");
        for appt in rows {
            let client = self.client_name(appt.client_id).await?;
            let _ = write!(
                out,
                "\n#{} {} - {} at {} ({})",
                appt.id,
                client,
                appt.date_label(),
                appt.time_label(),
                appt.status
            );
        }
        Ok(out)
    }

    async fn client(&self, term: &str) -> Result<String, BookingError> {
        let matches = participants::search_participants(&self.db, term, 5).await?;
        if matches.is_empty() {
            return Ok(format!("No client matches \"{term}\"."));
        }
        let mut out = String::new();
        for (i, person) in matches.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            let _ = write!(
                out,
                "{} ({}, {}){}",
                person.name,
                person.phone,
                person.role.as_str(),
                if person.is_active { "" } else { " [inactive]" }
            );
            let history = self.ledger.for_client(person.id, 5).await?;
            if history.is_empty() {
                out.push_str("\nNo bookings.");
            }
            for appt in history {
                let _ = write!(
                    out,
                    "\n#{} {} at {} - {}",
                    appt.id,
                    appt.date_label(),
                    appt.time_label(),
                    appt.status
                );
                if appt.status == AppointmentStatus::Pending {
                    out.push_str(" (awaiting decision)");
                }
            }
        }
        Ok(out)
    }

    async fn client_name(&self, id: i64) -> Result<String, BookingError> {
        Ok(participants::get_participant(&self.db, id).await?.name)
    }
}

fn help_text() -> String {
    "Coordinator commands\n\n\
     APPROVE [id] - confirm a booking (latest if no id)\n\
     DECLINE [id] - decline a booking\n\
     MODIFY [id] [reason] - ask the client for changes\n\
     RECOMMENDATION: [guidance] - answer an escalated question\n\n\
     status - booking counts\n\
     today - today's schedule\n\
     recent - latest bookings\n\
     pending - bookings awaiting a decision\n\
     client [phone or name] - look up a client"
        .to_owned()
}
