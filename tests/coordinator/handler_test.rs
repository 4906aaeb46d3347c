//! Tests for `src/coordinator/handler.rs`: coordinator decisions.

use std::sync::Arc;

use sqlx::SqlitePool;

use carebook::booking::ledger::AppointmentLedger;
use carebook::booking::AppointmentStatus;
use carebook::coordinator::handler::{CoordinatorAction, CoordinatorHandler, HandlerOutcome};
use carebook::coordinator::review::ReviewDesk;
use carebook::notify::{MessageSender, MessageType};
use carebook::store::participants;
use carebook::types::Role;

use crate::support::{self, FailingSender, RecordingSender};

struct Fixture {
    db: SqlitePool,
    ledger: Arc<AppointmentLedger>,
    handler: CoordinatorHandler,
}

async fn fixture(sender: Arc<dyn MessageSender>) -> Fixture {
    fixture_on(support::db().await, sender)
}

fn fixture_on(db: SqlitePool, sender: Arc<dyn MessageSender>) -> Fixture {
    let ledger = support::ledger(&db);
    let handler = CoordinatorHandler::new(
        db.clone(),
        Arc::clone(&ledger),
        support::dispatcher(sender),
        Arc::new(ReviewDesk::new()),
    );
    Fixture { db, ledger, handler }
}

fn handled(outcome: HandlerOutcome) -> carebook::coordinator::handler::HandledReply {
    match outcome {
        HandlerOutcome::Handled(reply) => reply,
        HandlerOutcome::NotApplicable => panic!("expected the handler to act"),
    }
}

#[tokio::test]
async fn approve_confirms_latest_pending_and_notifies_client() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 10).await;

    let reply = handled(fx.handler.handle("approve").await);

    assert_eq!(reply.action, CoordinatorAction::Confirmed(appt.id));
    assert_eq!(reply.reply.message_type, MessageType::CoordinatorFeedback);
    assert_eq!(reply.reply.appointment_id, Some(appt.id));
    let result = reply.reply.data.get("action_result").expect("action_result");
    assert!(result.starts_with(&format!("Approved: booking #{}", appt.id)));
    assert_eq!(
        reply.reply.data.get("delivery_status").map(String::as_str),
        Some("Confirmation sent to Sara.")
    );

    let stored = fx.ledger.get(appt.id).await.expect("get");
    assert_eq!(stored.status, AppointmentStatus::Confirmed);
    assert_eq!(stored.confirmed_datetime, Some(appt.requested_datetime));

    let texts = sender.sent_to(support::CLIENT_KEY);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("your appointment is confirmed"));
    let delivery = reply.client_delivery.expect("client delivery");
    assert_eq!(delivery.message_type, MessageType::ClientConfirmation);
}

#[tokio::test]
async fn casual_decline_cancels_with_notes() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 11).await;

    let reply = handled(fx.handler.handle("nope, can't make it").await);

    assert_eq!(reply.action, CoordinatorAction::Declined(appt.id));
    let stored = fx.ledger.get(appt.id).await.expect("get");
    assert_eq!(stored.status, AppointmentStatus::Cancelled);
    assert!(stored.confirmed_datetime.is_none());
    assert_eq!(
        stored.coordinator_notes.as_deref(),
        Some("Cancelled: nope, can't make it")
    );

    let texts = sender.sent_to(support::CLIENT_KEY);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("cannot accommodate"));
}

#[tokio::test]
async fn unclear_reply_asks_for_clarification_only() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 12).await;

    let reply = handled(fx.handler.handle("maybe, let me check").await);

    assert_eq!(reply.action, CoordinatorAction::Clarified);
    assert_eq!(reply.reply.message_type, MessageType::CoordinatorClarification);
    assert_eq!(
        reply.reply.data.get("raw_message").map(String::as_str),
        Some("maybe, let me check")
    );
    assert!(reply.client_delivery.is_none());
    assert!(sender.sent().is_empty());

    let stored = fx.ledger.get(appt.id).await.expect("get");
    assert_eq!(stored.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn concurrent_approvals_confirm_once() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 13).await;

    let text = format!("approve {}", appt.id);
    let (a, b) = tokio::join!(fx.handler.handle(&text), fx.handler.handle(&text));
    let actions = [handled(a).action, handled(b).action];

    let confirmed = actions
        .iter()
        .filter(|a| **a == CoordinatorAction::Confirmed(appt.id))
        .count();
    let stale = actions
        .iter()
        .filter(|a| {
            **a == CoordinatorAction::AlreadyResolved {
                id: appt.id,
                status: AppointmentStatus::Confirmed,
            }
        })
        .count();
    assert_eq!(confirmed, 1);
    assert_eq!(stale, 1);
    assert_eq!(sender.sent_to(support::CLIENT_KEY).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_approvals_on_a_shared_file_confirm_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sender = RecordingSender::new();
    let fx = fixture_on(support::file_db(&dir).await, sender.clone());
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 13).await;

    let handler = Arc::new(fx.handler);
    let text = format!("approve {}", appt.id);
    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let handler = Arc::clone(&handler);
            let text = text.clone();
            tokio::spawn(async move { handler.handle(&text).await })
        })
        .collect();

    let mut actions = Vec::new();
    for task in tasks {
        actions.push(handled(task.await.expect("task should not panic")).action);
    }

    let confirmed = actions
        .iter()
        .filter(|a| **a == CoordinatorAction::Confirmed(appt.id))
        .count();
    let stale = actions
        .iter()
        .filter(|a| {
            **a == CoordinatorAction::AlreadyResolved {
                id: appt.id,
                status: AppointmentStatus::Confirmed,
            }
        })
        .count();
    assert_eq!(confirmed, 1, "{actions:?}");
    assert_eq!(stale, 5, "{actions:?}");
    assert_eq!(sender.sent_to(support::CLIENT_KEY).len(), 1);

    let stored = fx.ledger.get(appt.id).await.expect("get");
    assert_eq!(stored.status, AppointmentStatus::Confirmed);
    assert_eq!(
        stored.coordinator_notes.as_deref(),
        Some("Approved by coordinator")
    );
}

#[tokio::test]
async fn quoted_id_targets_that_appointment() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let older = support::pending_booking(&fx.ledger, &client, &therapist, 9).await;
    let newer = support::pending_booking(&fx.ledger, &client, &therapist, 14).await;

    let reply = handled(fx.handler.handle(&format!("decline {}", older.id)).await);

    assert_eq!(reply.action, CoordinatorAction::Declined(older.id));
    let untouched = fx.ledger.get(newer.id).await.expect("get");
    assert_eq!(untouched.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn decision_on_resolved_appointment_changes_nothing() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 10).await;
    fx.ledger
        .transition(appt.id, AppointmentStatus::Cancelled, None)
        .await
        .expect("cancel");

    let reply = handled(fx.handler.handle(&format!("approve {}", appt.id)).await);

    assert_eq!(
        reply.action,
        CoordinatorAction::AlreadyResolved {
            id: appt.id,
            status: AppointmentStatus::Cancelled,
        }
    );
    assert_eq!(
        reply.reply.data.get("action_result").map(String::as_str),
        Some(format!("Appointment #{} is already cancelled.", appt.id).as_str())
    );
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn modification_keeps_pending_and_forwards_reason() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 10).await;

    let text = format!("MODIFY {} please come at 3pm instead", appt.id);
    let reply = handled(fx.handler.handle(&text).await);

    assert_eq!(reply.action, CoordinatorAction::ModificationRequested(appt.id));
    let stored = fx.ledger.get(appt.id).await.expect("get");
    assert_eq!(stored.status, AppointmentStatus::Pending);

    let texts = sender.sent_to(support::CLIENT_KEY);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("please come at 3pm instead"));
    assert!(!texts[0].contains("MODIFY"));
}

#[tokio::test]
async fn nothing_pending_is_not_a_decision() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;

    assert!(matches!(
        fx.handler.handle("approve").await,
        HandlerOutcome::NotApplicable
    ));
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn small_talk_with_a_number_is_not_a_decision() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 10).await;
    fx.ledger
        .transition(appt.id, AppointmentStatus::Confirmed, None)
        .await
        .expect("confirm");

    let text = format!("thanks, give me {} minute", appt.id);
    assert!(matches!(
        fx.handler.handle(&text).await,
        HandlerOutcome::NotApplicable
    ));
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn number_in_unclear_reply_does_not_pick_the_target() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let resolved = support::pending_booking(&fx.ledger, &client, &therapist, 9).await;
    fx.ledger
        .transition(resolved.id, AppointmentStatus::Cancelled, None)
        .await
        .expect("cancel");
    let pending = support::pending_booking(&fx.ledger, &client, &therapist, 15).await;

    let reply = handled(
        fx.handler
            .handle(&format!("hmm, give me {} minute", resolved.id))
            .await,
    );

    assert_eq!(reply.action, CoordinatorAction::Clarified);
    assert_eq!(reply.reply.appointment_id, Some(pending.id));
}

#[tokio::test]
async fn admin_command_is_left_for_the_admin_responder() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    support::pending_booking(&fx.ledger, &client, &therapist, 10).await;

    assert!(matches!(
        fx.handler.handle("status").await,
        HandlerOutcome::NotApplicable
    ));
}

#[tokio::test]
async fn provider_scope_limits_the_pending_queue() {
    let sender = RecordingSender::new();
    let db = support::db().await;
    let ledger = support::ledger(&db);
    let client = support::client(&db).await;
    let therapist = support::therapist(&db).await;
    let other = participants::get_or_create_participant(
        &db,
        "97455000003",
        Role::Therapist,
        Some("Omar"),
    )
    .await
    .expect("second therapist");
    let appt = support::pending_booking(&ledger, &client, &therapist, 10).await;

    let handler = CoordinatorHandler::new(
        db.clone(),
        Arc::clone(&ledger),
        support::dispatcher(sender.clone()),
        Arc::new(ReviewDesk::new()),
    )
    .with_provider_scope(Some(other.id));

    assert!(matches!(
        handler.handle(&format!("approve {}", appt.id)).await,
        HandlerOutcome::NotApplicable
    ));
    let stored = ledger.get(appt.id).await.expect("get");
    assert_eq!(stored.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn failed_client_notification_is_reported_to_coordinator() {
    let fx = fixture(Arc::new(FailingSender)).await;
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 10).await;

    let reply = handled(fx.handler.handle("yes").await);

    assert_eq!(reply.action, CoordinatorAction::Confirmed(appt.id));
    let status = reply
        .reply
        .data
        .get("delivery_status")
        .expect("delivery_status");
    assert!(status.contains("failed"));
    assert!(status.contains(support::CLIENT_KEY));
    assert!(!reply.client_delivery.expect("delivery").success);
}
