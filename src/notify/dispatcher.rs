//! Notification dispatcher: normalize, render, send with a timeout, record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use super::history::{self, DeliveryHistory};
use super::templates::TemplateSet;
use super::{
    DeliveryResult, MessageSender, MessageType, NotificationRequest, NotifyError, Priority,
    TemplateData,
};
use crate::phone;

/// Default bound on one transport call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Renders templates and delivers them through a [`MessageSender`].
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    templates: TemplateSet,
    history: DeliveryHistory,
    send_timeout: Duration,
    audit: Option<SqlitePool>,
}

impl Dispatcher {
    /// Create a dispatcher with default history sizing and no durable audit.
    pub fn new(sender: Arc<dyn MessageSender>, templates: TemplateSet, send_timeout: Duration) -> Self {
        Self {
            sender,
            templates,
            history: DeliveryHistory::default(),
            send_timeout,
            audit: None,
        }
    }

    /// Replace the in-memory history.
    pub fn with_history(mut self, history: DeliveryHistory) -> Self {
        self.history = history;
        self
    }

    /// Also write every result to the `delivery_log` table.
    pub fn with_audit(mut self, db: SqlitePool) -> Self {
        self.audit = Some(db);
        self
    }

    /// Templates in use.
    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Delivery history.
    pub fn history(&self) -> &DeliveryHistory {
        &self.history
    }

    /// Priority declared for a message type.
    pub fn priority(&self, message_type: MessageType) -> Priority {
        self.templates.priority(message_type)
    }

    /// Render a message type.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::MissingTemplateData`] if `data` lacks a placeholder.
    pub fn render(
        &self,
        message_type: MessageType,
        data: &TemplateData,
    ) -> Result<String, NotifyError> {
        self.templates.render(message_type, data)
    }

    /// Render and deliver. Never fails: every outcome is a [`DeliveryResult`].
    ///
    /// Missing template data is logged at `error` with full context and
    /// recorded as a failed delivery; nothing is sent.
    pub async fn send(
        &self,
        recipient: &str,
        message_type: MessageType,
        data: &TemplateData,
        appointment_id: Option<i64>,
    ) -> DeliveryResult {
        match self.render(message_type, data) {
            Ok(text) => self.deliver(recipient, message_type, &text, appointment_id).await,
            Err(e) => {
                let key = phone::normalize(recipient);
                error!(
                    recipient = %key,
                    message_type = message_type.as_str(),
                    appointment_id,
                    keys = ?data.keys().collect::<Vec<_>>(),
                    error = %e,
                    "template render failed, notification not sent"
                );
                let result = failure(key, message_type, appointment_id, e.to_string());
                self.record(&result).await;
                result
            }
        }
    }

    /// [`Dispatcher::send`] for a prepared request.
    pub async fn send_request(&self, request: &NotificationRequest) -> DeliveryResult {
        self.send(
            &request.recipient,
            request.message_type,
            &request.data,
            request.appointment_id,
        )
        .await
    }

    /// Deliver already-rendered text. The transport call is bounded by the
    /// send timeout; a timeout counts as a failed delivery.
    pub async fn deliver(
        &self,
        recipient: &str,
        message_type: MessageType,
        text: &str,
        appointment_id: Option<i64>,
    ) -> DeliveryResult {
        let key = phone::normalize(recipient);
        if key.is_empty() {
            warn!(raw = recipient, message_type = message_type.as_str(), "empty recipient, not sending");
            let result = failure(key, message_type, appointment_id, "empty recipient".to_owned());
            self.record(&result).await;
            return result;
        }

        debug!(recipient = %key, message_type = message_type.as_str(), appointment_id, "sending notification");
        let outcome = tokio::time::timeout(self.send_timeout, self.sender.send_message(&key, text)).await;

        let result = match outcome {
            Ok(Ok(receipt)) => {
                info!(
                    recipient = %key,
                    message_type = message_type.as_str(),
                    appointment_id,
                    transport_id = ?receipt.transport_message_id,
                    "notification delivered"
                );
                DeliveryResult {
                    success: true,
                    message_type,
                    recipient: key,
                    appointment_id,
                    transport_message_id: receipt.transport_message_id,
                    error: None,
                    timestamp: Utc::now(),
                }
            }
            Ok(Err(e)) => {
                warn!(
                    recipient = %key,
                    message_type = message_type.as_str(),
                    appointment_id,
                    error = %e,
                    "notification delivery failed"
                );
                failure(key, message_type, appointment_id, e.to_string())
            }
            Err(_) => {
                warn!(
                    recipient = %key,
                    message_type = message_type.as_str(),
                    appointment_id,
                    timeout = ?self.send_timeout,
                    "notification delivery timed out"
                );
                failure(
                    key,
                    message_type,
                    appointment_id,
                    format!("send timed out after {}ms", self.send_timeout.as_millis()),
                )
            }
        };

        self.record(&result).await;
        result
    }

    async fn record(&self, result: &DeliveryResult) {
        self.history.record(result.clone());
        if let Some(db) = &self.audit {
            if let Err(e) = history::persist(db, result).await {
                warn!(error = %e, message_type = result.message_type.as_str(), "failed to write delivery log");
            }
        }
    }
}

fn failure(
    recipient: String,
    message_type: MessageType,
    appointment_id: Option<i64>,
    error: String,
) -> DeliveryResult {
    DeliveryResult {
        success: false,
        message_type,
        recipient,
        appointment_id,
        transport_message_id: None,
        error: Some(error),
        timestamp: Utc::now(),
    }
}
