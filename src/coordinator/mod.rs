//! Coordinator side of the pipeline: reply classification, the decision
//! handler, the recommendation review sub-flow, and admin queries.

pub mod admin;
pub mod handler;
pub mod intent;
pub mod review;

use crate::booking::BookingError;
use crate::notify::NotifyError;
use crate::store::StoreError;

/// Errors raised while handling a coordinator reply.
///
/// These never reach the coordinator verbatim; the handler turns them into
/// a generic acknowledgement and logs the detail.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Ledger failure.
    #[error("booking error: {0}")]
    Booking(#[from] BookingError),

    /// Participant store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Template rendering failure.
    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),
}
