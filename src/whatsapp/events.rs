//! Event listener for incoming WhatsApp messages.
//!
//! Long-polls the bridge's `events/poll` endpoint and forwards each text
//! message to the router over an mpsc channel. Payloads use the same shapes
//! as webhooks.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use super::webhook::{self, InboundEvent, WebhookOutcome};
use super::WhatsAppError;

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Initial reconnect backoff (milliseconds).
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Pause after a non-success poll response (seconds).
const NON_SUCCESS_PAUSE_SECS: u64 = 5;

/// Spawn a listener that forwards inbound text messages to `event_tx`.
///
/// Returns immediately. The listener reconnects with exponential backoff
/// and stops once the receiver is dropped.
pub fn spawn_event_listener(
    poll_url: Url,
    event_tx: mpsc::Sender<InboundEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            info!(host = poll_url.host_str().unwrap_or_default(), "connecting to WhatsApp event stream");

            match poll_events(&poll_url, &event_tx, &mut backoff_ms).await {
                Ok(()) => {
                    info!("WhatsApp event stream closed normally");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms, "WhatsApp event stream error, reconnecting");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                }
            }
        }
    })
}

/// Poll in a loop. Returns `Err` on non-timeout network errors so the
/// caller can reconnect with backoff, `Ok` once the receiver is gone.
async fn poll_events(
    poll_url: &Url,
    event_tx: &mpsc::Sender<InboundEvent>,
    backoff_ms: &mut u64,
) -> Result<(), WhatsAppError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match client.get(poll_url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => {
                *backoff_ms = INITIAL_BACKOFF_MS;
                let payloads = match resp.json::<Vec<Value>>().await {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(error = %e.without_url(), "event poll body was not a list, skipping");
                        continue;
                    }
                };
                for payload in payloads {
                    match webhook::parse_payload(&payload) {
                        WebhookOutcome::Text(event) => {
                            if event_tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                        WebhookOutcome::Ignored(reason) => {
                            debug!(?reason, "ignoring non-routable event");
                        }
                    }
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(Duration::from_secs(NON_SUCCESS_PAUSE_SECS)).await;
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e.into()),
        }
        if event_tx.is_closed() {
            return Ok(());
        }
    }
}
