//! Booking validation: future-only, advance window, business hours.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};

use super::BookingError;

/// Longest bookable session in minutes.
pub const MAX_DURATION_MINUTES: u32 = 480;

/// Business rules applied to every new or rescheduled booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRules {
    /// Earliest start time of day.
    pub open: NaiveTime,
    /// Latest end time of day.
    pub close: NaiveTime,
    /// Weekdays the clinic accepts bookings.
    pub open_days: Vec<Weekday>,
    /// How far ahead a booking may be placed.
    pub max_advance_days: u32,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            open_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
            max_advance_days: 30,
        }
    }
}

impl BookingRules {
    /// Business hours as `HH:MM-HH:MM`.
    pub fn hours_label(&self) -> String {
        format!("{}-{}", self.open.format("%H:%M"), self.close.format("%H:%M"))
    }

    /// Collect every rule the request violates. Empty means valid.
    pub fn problems(
        &self,
        requested: NaiveDateTime,
        duration_minutes: u32,
        now: NaiveDateTime,
    ) -> Vec<String> {
        let mut problems = Vec::new();

        if duration_minutes == 0 || duration_minutes > MAX_DURATION_MINUTES {
            problems.push(format!(
                "duration must be between 1 and {MAX_DURATION_MINUTES} minutes"
            ));
        }

        if requested <= now {
            problems.push("requested time must be in the future".to_owned());
        }

        let horizon = now.checked_add_signed(Duration::days(i64::from(self.max_advance_days)));
        if horizon.is_some_and(|h| requested > h) {
            problems.push(format!(
                "bookings can be made at most {} days in advance",
                self.max_advance_days
            ));
        }

        let weekday = requested.weekday();
        if !self.open_days.contains(&weekday) {
            problems.push(format!("the clinic is closed on {weekday}"));
        }

        let end = requested.checked_add_signed(Duration::minutes(i64::from(duration_minutes)));
        let within_hours = match end {
            Some(end) => {
                requested.time() >= self.open
                    && end.date() == requested.date()
                    && end.time() <= self.close
            }
            None => false,
        };
        if !within_hours {
            problems.push(format!(
                "appointments must fall within business hours {}",
                self.hours_label()
            ));
        }

        problems
    }

    /// Validate a requested slot against `now` (clinic-local).
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] listing every violated rule.
    pub fn validate(
        &self,
        requested: NaiveDateTime,
        duration_minutes: u32,
        now: NaiveDateTime,
    ) -> Result<(), BookingError> {
        let problems = self.problems(requested, duration_minutes, now);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(BookingError::Validation(problems))
        }
    }
}
