//! Background dispatch queue.
//!
//! One actor task owns the queue and sends notifications in order, serving
//! high/urgent templates ahead of normal/low ones. Callers enqueue without
//! waiting and receive a [`oneshot`] handle that resolves to the
//! [`DeliveryResult`] once the send completes.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, trace};

use super::dispatcher::Dispatcher;
use super::{DeliveryResult, NotificationRequest, NotifyError};

/// Default bound on queued notifications per lane.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A queued notification with its reply slot.
#[derive(Debug)]
struct QueuedNotification {
    request: NotificationRequest,
    reply: oneshot::Sender<DeliveryResult>,
}

/// Cloneable handle for enqueueing notifications.
#[derive(Clone)]
pub struct DispatchQueue {
    expedited_tx: mpsc::Sender<QueuedNotification>,
    standard_tx: mpsc::Sender<QueuedNotification>,
    dispatcher: Arc<Dispatcher>,
}

/// Owns the worker task; dropping all [`DispatchQueue`] handles and awaiting
/// [`DispatchWorker::shutdown`] drains what is left.
pub struct DispatchWorker {
    handle: JoinHandle<()>,
}

impl DispatchQueue {
    /// Spawn the worker and return the enqueue handle plus the worker.
    pub fn spawn(dispatcher: Arc<Dispatcher>, capacity: usize) -> (Self, DispatchWorker) {
        let capacity = capacity.max(1);
        let (expedited_tx, expedited_rx) = mpsc::channel(capacity);
        let (standard_tx, standard_rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(run_worker(
            Arc::clone(&dispatcher),
            expedited_rx,
            standard_rx,
        ));
        (
            Self {
                expedited_tx,
                standard_tx,
                dispatcher,
            },
            DispatchWorker { handle },
        )
    }

    /// Queue a notification without waiting for it to be sent.
    ///
    /// Failures to enqueue are logged at `error` with recipient, message type
    /// and appointment id so the message can be resent by hand.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::QueueFull`] when the lane is at capacity, or
    /// [`NotifyError::QueueClosed`] if the worker has stopped.
    pub fn enqueue(
        &self,
        request: NotificationRequest,
    ) -> Result<oneshot::Receiver<DeliveryResult>, NotifyError> {
        let priority = self.dispatcher.priority(request.message_type);
        let lane = if priority.is_expedited() {
            &self.expedited_tx
        } else {
            &self.standard_tx
        };

        let (reply, rx) = oneshot::channel();
        match lane.try_send(QueuedNotification { request, reply }) {
            Ok(()) => Ok(rx),
            Err(mpsc::error::TrySendError::Full(item)) => {
                log_dropped(&item.request, "dispatch queue full");
                Err(NotifyError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(item)) => {
                log_dropped(&item.request, "dispatch queue closed");
                Err(NotifyError::QueueClosed)
            }
        }
    }

    /// The dispatcher the worker sends through.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl DispatchWorker {
    /// Wait for the worker to drain and stop. Every [`DispatchQueue`] handle
    /// must be dropped first or this waits forever.
    pub async fn shutdown(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "dispatch worker panicked");
        }
    }
}

fn log_dropped(request: &NotificationRequest, reason: &str) {
    error!(
        recipient = %request.recipient,
        message_type = request.message_type.as_str(),
        appointment_id = request.appointment_id,
        reason,
        "notification not queued, resend manually"
    );
}

async fn run_worker(
    dispatcher: Arc<Dispatcher>,
    mut expedited_rx: mpsc::Receiver<QueuedNotification>,
    mut standard_rx: mpsc::Receiver<QueuedNotification>,
) {
    let mut expedited_open = true;
    let mut standard_open = true;

    while expedited_open || standard_open {
        let next = tokio::select! {
            biased;
            item = expedited_rx.recv(), if expedited_open => {
                if item.is_none() {
                    expedited_open = false;
                }
                item
            }
            item = standard_rx.recv(), if standard_open => {
                if item.is_none() {
                    standard_open = false;
                }
                item
            }
        };

        let Some(queued) = next else {
            continue;
        };

        let result = dispatcher.send_request(&queued.request).await;
        if !result.success {
            error!(
                recipient = %result.recipient,
                message_type = result.message_type.as_str(),
                appointment_id = result.appointment_id,
                error = result.error.as_deref().unwrap_or_default(),
                "background notification failed, resend manually"
            );
        }
        // The caller may have dropped its receiver; the result is already in history.
        let _ = queued.reply.send(result);
    }

    trace!("dispatch worker stopped");
}
