//! Tests for `src/whatsapp/router.rs`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use carebook::booking::ledger::AppointmentLedger;
use carebook::booking::AppointmentStatus;
use carebook::coordinator::admin::AdminResponder;
use carebook::coordinator::handler::{CoordinatorAction, CoordinatorHandler};
use carebook::coordinator::review::ReviewDesk;
use carebook::notify::MessageType;
use carebook::responder::{ConversationResponder, ResponderError, StaticResponder};
use carebook::store::{conversations, participants};
use carebook::types::{ConversationPurpose, RequestContext, Role, SenderTag};
use carebook::whatsapp::router::{CoordinatorPath, DropReason, MessageRouter, RouteOutcome};
use carebook::whatsapp::webhook::InboundEvent;

use crate::support::{self, RecordingSender};

struct BrokenResponder;

#[async_trait]
impl ConversationResponder for BrokenResponder {
    async fn respond(&self, _ctx: &RequestContext, _text: &str) -> Result<String, ResponderError> {
        Err(ResponderError::InvalidReply("agent offline".to_owned()))
    }
}

struct Fixture {
    db: SqlitePool,
    ledger: Arc<AppointmentLedger>,
    sender: Arc<RecordingSender>,
    router: MessageRouter,
}

async fn fixture(responder: Arc<dyn ConversationResponder>) -> Fixture {
    let db = support::db().await;
    let ledger = support::ledger(&db);
    let sender = RecordingSender::new();
    let dispatcher = support::dispatcher(sender.clone());
    let handler = Arc::new(CoordinatorHandler::new(
        db.clone(),
        Arc::clone(&ledger),
        Arc::clone(&dispatcher),
        Arc::new(ReviewDesk::new()),
    ));
    let admin = Arc::new(AdminResponder::new(db.clone(), Arc::clone(&ledger)));
    let router = MessageRouter::new(
        db.clone(),
        support::COORDINATOR_PHONE,
        handler,
        admin,
        responder,
        dispatcher,
    )
    .with_coordinator_name("Noor");
    Fixture {
        db,
        ledger,
        sender,
        router,
    }
}

fn event(from: &str, body: &str) -> InboundEvent {
    InboundEvent {
        from: from.to_owned(),
        to: "97455000000@c.us".to_owned(),
        body: body.to_owned(),
        message_id: Some("wamid-1".to_owned()),
        from_me: false,
        sender_name: Some("Sara".to_owned()),
    }
}

#[tokio::test]
async fn client_message_gets_responder_reply_and_is_stored() {
    let fx = fixture(Arc::new(StaticResponder::new("Hello! How can I help?"))).await;

    let outcome = fx
        .router
        .route(&event("97455123456@c.us", "Hi, I'd like a massage"))
        .await
        .expect("route should succeed");

    match outcome {
        RouteOutcome::Client { reply } => {
            assert!(reply.success);
            assert_eq!(reply.message_type, MessageType::ConversationReply);
        }
        other => panic!("expected client outcome, got {other:?}"),
    }
    assert_eq!(
        fx.sender.sent_to(support::CLIENT_KEY),
        vec!["Hello! How can I help?".to_owned()]
    );

    let client = participants::find_participant_by_phone(&fx.db, support::CLIENT_KEY)
        .await
        .expect("lookup")
        .expect("client registered");
    assert_eq!(client.role, Role::Client);
    assert_eq!(client.name, "Sara");

    let conversation =
        conversations::get_or_create_conversation(&fx.db, client.id, ConversationPurpose::Booking)
            .await
            .expect("conversation");
    let messages = conversations::recent_messages(&fx.db, conversation.id, 10)
        .await
        .expect("messages");
    let senders: Vec<SenderTag> = messages.iter().map(|m| m.sender).collect();
    assert_eq!(senders, vec![SenderTag::User, SenderTag::Bot]);
    assert_eq!(messages[0].transport_message_id.as_deref(), Some("wamid-1"));
}

#[tokio::test]
async fn own_echo_is_dropped() {
    let fx = fixture(Arc::new(StaticResponder::new("unused"))).await;
    let mut echo = event("97455123456@c.us", "Hello! How can I help?");
    echo.from_me = true;

    let outcome = fx.router.route(&echo).await.expect("route");

    assert!(matches!(outcome, RouteOutcome::Dropped(DropReason::FromSelf)));
    assert!(fx.sender.sent().is_empty());
}

#[tokio::test]
async fn sender_without_key_is_dropped() {
    let fx = fixture(Arc::new(StaticResponder::new("unused"))).await;

    let outcome = fx.router.route(&event("  ", "hello")).await.expect("route");

    assert!(matches!(
        outcome,
        RouteOutcome::Dropped(DropReason::UnknownSender)
    ));
}

#[tokio::test]
async fn responder_failure_sends_fallback() {
    let fx = fixture(Arc::new(BrokenResponder)).await;

    let outcome = fx
        .router
        .route(&event(support::CLIENT_PHONE, "hello"))
        .await
        .expect("route");

    match outcome {
        RouteOutcome::Client { reply } => {
            assert_eq!(reply.message_type, MessageType::ServiceUnavailable);
        }
        other => panic!("expected client outcome, got {other:?}"),
    }
    let texts = fx.sender.sent_to(support::CLIENT_KEY);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Sorry, we could not process your message"));
}

#[tokio::test]
async fn coordinator_approval_reaches_handler() {
    let fx = fixture(Arc::new(StaticResponder::new("unused"))).await;
    assert!(fx.router.is_coordinator("whatsapp:+97455000001"));
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 10).await;

    let outcome = fx
        .router
        .route(&event("97455000001@c.us", "APPROVE"))
        .await
        .expect("route");

    match outcome {
        RouteOutcome::Coordinator { path, reply } => {
            assert_eq!(path, CoordinatorPath::Decision(CoordinatorAction::Confirmed(appt.id)));
            assert_eq!(reply.recipient, support::COORDINATOR_KEY);
        }
        other => panic!("expected coordinator outcome, got {other:?}"),
    }
    let stored = fx.ledger.get(appt.id).await.expect("get");
    assert_eq!(stored.status, AppointmentStatus::Confirmed);
    assert_eq!(fx.sender.sent_to(support::CLIENT_KEY).len(), 1);
    let feedback = fx.sender.sent_to(support::COORDINATOR_KEY);
    assert_eq!(feedback.len(), 1);
    assert!(feedback[0].starts_with(&format!("Approved: booking #{}", appt.id)));

    let coordinator = participants::find_participant_by_phone(&fx.db, support::COORDINATOR_KEY)
        .await
        .expect("lookup")
        .expect("coordinator registered");
    assert_eq!(coordinator.role, Role::Coordinator);
    assert_eq!(coordinator.name, "Noor");
}

#[tokio::test]
async fn coordinator_command_is_answered_by_admin() {
    let fx = fixture(Arc::new(StaticResponder::new("unused"))).await;

    let outcome = fx
        .router
        .route(&event(support::COORDINATOR_PHONE, "pending"))
        .await
        .expect("route");

    assert!(matches!(
        outcome,
        RouteOutcome::Coordinator {
            path: CoordinatorPath::AdminQuery,
            ..
        }
    ));
    assert_eq!(
        fx.sender.sent_to(support::COORDINATOR_KEY),
        vec!["Awaiting your decision: none.".to_owned()]
    );
}

#[tokio::test]
async fn coordinator_small_talk_goes_to_responder() {
    let fx = fixture(Arc::new(StaticResponder::new("Good morning, Noor."))).await;

    let outcome = fx
        .router
        .route(&event(support::COORDINATOR_PHONE, "good morning"))
        .await
        .expect("route");

    assert!(matches!(
        outcome,
        RouteOutcome::Coordinator {
            path: CoordinatorPath::Conversation,
            ..
        }
    ));
    assert_eq!(
        fx.sender.sent_to(support::COORDINATOR_KEY),
        vec!["Good morning, Noor.".to_owned()]
    );
}
