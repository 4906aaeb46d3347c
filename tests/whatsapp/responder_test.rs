//! Tests for agent-requested actions in `src/responder.rs`.

use std::sync::Arc;

use sqlx::SqlitePool;

use carebook::booking::desk::BookingDesk;
use carebook::booking::AppointmentStatus;
use carebook::coordinator::review::ReviewDesk;
use carebook::notify::queue::{DispatchQueue, DispatchWorker};
use carebook::responder::{apply_agent_reply, AgentReply};
use carebook::store::conversations;
use carebook::types::{ConversationPurpose, RequestContext};

use crate::support::{self, RecordingSender};

struct Fixture {
    db: SqlitePool,
    desk: BookingDesk,
    review: Arc<ReviewDesk>,
    worker: DispatchWorker,
    sender: Arc<RecordingSender>,
    ctx: RequestContext,
    therapist_id: i64,
}

async fn fixture() -> Fixture {
    let db = support::db().await;
    let sender = RecordingSender::new();
    let (queue, worker) = DispatchQueue::spawn(support::dispatcher(sender.clone()), 8);
    let review = Arc::new(ReviewDesk::new());
    let desk = BookingDesk::new(
        db.clone(),
        support::ledger(&db),
        queue,
        Arc::clone(&review),
        support::COORDINATOR_PHONE.to_owned(),
    );
    let therapist = support::therapist(&db).await;
    let client = support::client(&db).await;
    let conversation =
        conversations::get_or_create_conversation(&db, client.id, ConversationPurpose::Booking)
            .await
            .expect("conversation");
    let ctx = RequestContext {
        participant: client,
        conversation,
        inbound_message_id: None,
    };
    Fixture {
        db,
        desk,
        review,
        worker,
        sender,
        ctx,
        therapist_id: therapist.id,
    }
}

fn agent_reply(value: serde_json::Value) -> AgentReply {
    serde_json::from_value(value).expect("agent reply should parse")
}

fn slot(hour: u32) -> String {
    support::tomorrow_at(hour).format("%Y-%m-%d %H:%M").to_string()
}

#[tokio::test]
async fn agent_booking_creates_pending_appointment() {
    let fx = fixture().await;
    let reply = agent_reply(serde_json::json!({
        "reply": "Let me book that for you.",
        "booking": {
            "provider_id": fx.therapist_id,
            "service": "in_call",
            "duration_minutes": 60,
            "datetime": slot(10),
        }
    }));

    let text = apply_agent_reply(Some(&fx.desk), &fx.ctx, "book me tomorrow at 10", reply).await;

    assert!(text.starts_with("Let me book that for you.\n\nYour request #"));
    assert!(text.contains("has been sent for confirmation"));
    let pending = fx.desk.ledger().pending(10).await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, AppointmentStatus::Pending);
    assert_eq!(pending[0].client_id, fx.ctx.participant.id);

    drop(fx.desk);
    fx.worker.shutdown().await;
    assert_eq!(fx.sender.sent_to(support::COORDINATOR_KEY).len(), 1);
}

#[tokio::test]
async fn invalid_agent_booking_explains_the_problem() {
    let fx = fixture().await;
    let reply = agent_reply(serde_json::json!({
        "reply": "",
        "booking": {
            "provider_id": fx.therapist_id,
            "service": "out_call",
            "duration_minutes": 60,
            "datetime": slot(22),
        }
    }));

    let text = apply_agent_reply(Some(&fx.desk), &fx.ctx, "late tonight?", reply).await;

    assert!(text.starts_with("I couldn't book that: "));
    assert!(text.contains("business hours"));

    // The client's own id is not a therapist; that detail stays internal.
    let reply = agent_reply(serde_json::json!({
        "reply": "",
        "booking": {
            "provider_id": fx.ctx.participant.id,
            "service": "in_call",
            "duration_minutes": 60,
            "datetime": slot(10),
        }
    }));
    let text = apply_agent_reply(Some(&fx.desk), &fx.ctx, "book with me", reply).await;
    assert!(text.contains("Something went wrong on our side."));
    assert!(!text.contains("therapist"));
    assert!(!text.contains(&format!("#{}", fx.ctx.participant.id)));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM appointments")
        .fetch_one(&fx.db)
        .await
        .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn unknown_therapist_is_reported() {
    let fx = fixture().await;
    let reply = agent_reply(serde_json::json!({
        "reply": "Booking now.",
        "booking": {
            "provider_id": 4242,
            "service": "in_call",
            "duration_minutes": 30,
            "datetime": slot(10),
        }
    }));

    let text = apply_agent_reply(Some(&fx.desk), &fx.ctx, "with Ali please", reply).await;

    assert!(text.ends_with("That therapist isn't available for booking. Could you choose another?"));
}

#[tokio::test]
async fn agent_escalation_opens_review() {
    let fx = fixture().await;
    let reply = agent_reply(serde_json::json!({
        "reply": "Good question.",
        "escalation": { "reason": "medical clarification" }
    }));

    let text = apply_agent_reply(
        Some(&fx.desk),
        &fx.ctx,
        "Can I book with a herniated disc?",
        reply,
    )
    .await;

    assert!(text.contains("passed your question to our coordinator"));
    let escalation = fx.review.latest_escalation().expect("escalation open");
    assert_eq!(escalation.client_message, "Can I book with a herniated disc?");
    assert_eq!(escalation.client_name, "Sara");
}

#[tokio::test]
async fn actions_are_ignored_without_a_desk() {
    let fx = fixture().await;
    let reply = agent_reply(serde_json::json!({
        "response": "Sure.",
        "escalation": { "reason": "urgent_matter" }
    }));

    let text = apply_agent_reply(None, &fx.ctx, "help", reply).await;

    assert_eq!(text, "Sure.");
    assert_eq!(fx.review.open_count(), 0);
}
