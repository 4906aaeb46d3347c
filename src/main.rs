//! Carebook CLI entry point.
//!
//! Provides `serve`, `classify`, and `check-config` subcommands for running
//! the booking service, testing the coordinator reply classifier, and
//! validating configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use carebook::booking::desk::BookingDesk;
use carebook::booking::ledger::AppointmentLedger;
use carebook::config::CarebookConfig;
use carebook::coordinator::admin::AdminResponder;
use carebook::coordinator::handler::CoordinatorHandler;
use carebook::coordinator::intent::IntentClassifier;
use carebook::coordinator::review::ReviewDesk;
use carebook::notify::dispatcher::Dispatcher;
use carebook::notify::history::DeliveryHistory;
use carebook::notify::queue::DispatchQueue;
use carebook::notify::MessageSender;
use carebook::responder::{ConversationResponder, HttpResponder, StaticResponder};
use carebook::whatsapp::client::WhatsAppClient;
use carebook::whatsapp::events::spawn_event_listener;
use carebook::whatsapp::router::{MessageRouter, RouteOutcome};
use carebook::whatsapp::webhook::InboundEvent;
use carebook::{logging, store};

/// Inbound events buffered between the poller and the router.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Carebook: therapy booking over WhatsApp with coordinator approval.
#[derive(Parser)]
#[command(name = "carebook", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the booking service.
    Serve,
    /// Classify a coordinator reply and print the verdict as JSON.
    Classify {
        /// Reply text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Load and validate configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => handle_serve().await,
        Command::Classify { text } => handle_classify(&text.join(" ")),
        Command::CheckConfig => handle_check_config(),
    }
}

/// Print the classifier verdict for `text`.
fn handle_classify(text: &str) -> anyhow::Result<()> {
    let verdict = IntentClassifier::default().classify(text);
    let json = serde_json::to_string_pretty(&verdict).context("failed to encode verdict")?;
    println!("{json}");
    Ok(())
}

/// Load config and report every problem.
fn handle_check_config() -> anyhow::Result<()> {
    logging::init_cli();
    let _ = dotenvy::dotenv();
    let config = CarebookConfig::load().context("failed to load configuration")?;
    config.validate()?;
    if let Err(e) = config.transport.token() {
        warn!(error = %e, "bridge token missing, serve will refuse to start");
    }
    println!(
        "configuration ok: coordinator {}, hours {}, database {}",
        config.coordinator.phone,
        config.booking.rules()?.hours_label(),
        config.paths.database_path()?.display()
    );
    Ok(())
}

/// Wire every component, then route inbound events until Ctrl-C.
async fn handle_serve() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = CarebookConfig::load().context("failed to load configuration")?;

    let _logging_guard = logging::init_production(&config.paths.logs_dir()?)?;
    config.validate()?;

    let db_path = config.paths.database_path()?;
    let db = store::open(&db_path).await?;

    let rules = config.booking.rules()?;
    let templates = config.template_set()?;
    let token = config.transport.token()?;

    let client = WhatsAppClient::new(
        &config.transport.base_url,
        config.transport.instance_id.clone(),
        token,
    )
    .context("failed to create WhatsApp client")?;
    let poll_url = client
        .endpoint("events/poll")
        .context("failed to build event poll URL")?;
    let sender: Arc<dyn MessageSender> = Arc::new(client);

    let dispatcher = Arc::new(
        Dispatcher::new(sender, templates, config.transport.send_timeout())
            .with_history(DeliveryHistory::new(
                config.dispatch.history_capacity,
                config.dispatch.stats_window,
            ))
            .with_audit(db.clone()),
    );
    let (queue, worker) = DispatchQueue::spawn(Arc::clone(&dispatcher), config.dispatch.queue_capacity);

    let ledger = Arc::new(AppointmentLedger::new(db.clone(), rules));
    let review = Arc::new(ReviewDesk::new());
    let desk = BookingDesk::new(
        db.clone(),
        Arc::clone(&ledger),
        queue.clone(),
        Arc::clone(&review),
        config.coordinator.phone.clone(),
    );

    let responder: Arc<dyn ConversationResponder> = match &config.responder.url {
        Some(url) => Arc::new(
            HttpResponder::new(url.clone(), Duration::from_secs(config.responder.timeout_secs))
                .with_booking_desk(desk),
        ),
        None => {
            warn!("no responder.url configured, clients get the fallback reply");
            drop(desk);
            Arc::new(StaticResponder::new(config.responder.fallback_reply.clone()))
        }
    };
    drop(queue);

    let handler = Arc::new(
        CoordinatorHandler::new(
            db.clone(),
            Arc::clone(&ledger),
            Arc::clone(&dispatcher),
            Arc::clone(&review),
        )
        .with_provider_scope(config.coordinator.provider_id),
    );
    let admin = Arc::new(
        AdminResponder::new(db.clone(), Arc::clone(&ledger)).with_dispatcher(Arc::clone(&dispatcher)),
    );
    let router = Arc::new(
        MessageRouter::new(
            db.clone(),
            &config.coordinator.phone,
            handler,
            admin,
            responder,
            Arc::clone(&dispatcher),
        )
        .with_coordinator_name(config.coordinator.name.clone()),
    );

    let (event_tx, mut event_rx) = mpsc::channel::<InboundEvent>(EVENT_CHANNEL_CAPACITY);
    let listener = spawn_event_listener(poll_url, event_tx);

    info!(
        database = %db_path.display(),
        hours = %ledger.rules().hours_label(),
        "carebook started"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    warn!("event listener stopped");
                    break;
                };
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    match router.route(&event).await {
                        Ok(RouteOutcome::Dropped(reason)) => {
                            debug!(?reason, "inbound message dropped");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, message_id = ?event.message_id, "routing failed"),
                    }
                });
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    listener.abort();
    // The router holds the last queue handles through the responder.
    drop(router);
    drop(event_rx);
    if tokio::time::timeout(Duration::from_secs(30), worker.shutdown())
        .await
        .is_err()
    {
        warn!("dispatch queue did not drain in time");
    }
    db.close().await;
    info!("carebook stopped");
    Ok(())
}
