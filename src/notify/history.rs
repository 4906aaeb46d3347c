//! Delivery history: bounded in-memory record plus the durable audit log.

use std::collections::VecDeque;
use std::sync::Mutex;

use sqlx::SqlitePool;
use tracing::trace;

use super::{DeliveryResult, MessageType};

/// Default number of results kept in memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default window for the rolling success rate.
pub const DEFAULT_STATS_WINDOW: usize = 100;

/// Aggregate counts over the in-memory history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Results recorded.
    pub total: usize,
    /// Successful deliveries.
    pub succeeded: usize,
    /// Failed deliveries.
    pub failed: usize,
}

/// Append-only record of delivery attempts.
///
/// Uses a sync [`Mutex`] since every critical section is a push or a scan
/// with no awaits. Once `capacity` is reached the oldest entry is evicted;
/// the durable `delivery_log` keeps everything.
#[derive(Debug)]
pub struct DeliveryHistory {
    records: Mutex<VecDeque<DeliveryResult>>,
    capacity: usize,
    stats_window: usize,
}

impl Default for DeliveryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_STATS_WINDOW)
    }
}

impl DeliveryHistory {
    /// Create a history keeping at most `capacity` results and computing the
    /// success rate over the last `stats_window` of them.
    pub fn new(capacity: usize, stats_window: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            stats_window: stats_window.max(1),
        }
    }

    /// Append a result.
    pub fn record(&self, result: DeliveryResult) {
        if let Ok(mut records) = self.records.lock() {
            if records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(result);
        }
    }

    /// Number of results held in memory.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recent `n` results, oldest first.
    pub fn recent(&self, n: usize) -> Vec<DeliveryResult> {
        match self.records.lock() {
            Ok(records) => {
                let skip = records.len().saturating_sub(n);
                records.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// All held results matching a predicate, oldest first.
    pub fn filter(&self, predicate: impl Fn(&DeliveryResult) -> bool) -> Vec<DeliveryResult> {
        match self.records.lock() {
            Ok(records) => records.iter().filter(|r| predicate(r)).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Results for one appointment.
    pub fn for_appointment(&self, appointment_id: i64) -> Vec<DeliveryResult> {
        self.filter(|r| r.appointment_id == Some(appointment_id))
    }

    /// Results of one message type.
    pub fn of_type(&self, message_type: MessageType) -> Vec<DeliveryResult> {
        self.filter(|r| r.message_type == message_type)
    }

    /// Success ratio over the last `stats_window` results, `None` if empty.
    pub fn success_rate(&self) -> Option<f64> {
        let window = self.recent(self.stats_window);
        if window.is_empty() {
            return None;
        }
        let succeeded = window.iter().filter(|r| r.success).count();
        Some(ratio(succeeded, window.len()))
    }

    /// Totals over everything held in memory.
    pub fn stats(&self) -> DeliveryStats {
        match self.records.lock() {
            Ok(records) => {
                let succeeded = records.iter().filter(|r| r.success).count();
                DeliveryStats {
                    total: records.len(),
                    succeeded,
                    failed: records.len().saturating_sub(succeeded),
                }
            }
            Err(_) => DeliveryStats::default(),
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let part = f64::from(u32::try_from(part).unwrap_or(u32::MAX));
    let whole = f64::from(u32::try_from(whole).unwrap_or(u32::MAX));
    part / whole
}

/// Write one result to the durable delivery log.
///
/// # Errors
///
/// Returns [`sqlx::Error`] on SQLite failure.
pub async fn persist(db: &SqlitePool, result: &DeliveryResult) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO delivery_log (message_type, recipient, appointment_id, success, \
         transport_message_id, error, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(result.message_type.as_str())
    .bind(&result.recipient)
    .bind(result.appointment_id)
    .bind(result.success)
    .bind(&result.transport_message_id)
    .bind(&result.error)
    .bind(result.timestamp.to_rfc3339())
    .execute(db)
    .await?;

    trace!(
        message_type = result.message_type.as_str(),
        success = result.success,
        "delivery logged"
    );
    Ok(())
}

/// Count failed deliveries in the durable log.
///
/// # Errors
///
/// Returns [`sqlx::Error`] on SQLite failure.
pub async fn count_failures(db: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM delivery_log WHERE success = 0")
        .fetch_one(db)
        .await?;
    Ok(n)
}
