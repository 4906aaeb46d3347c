//! Tests for the escalation review loop in `src/coordinator/`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use carebook::booking::ledger::AppointmentLedger;
use carebook::booking::AppointmentStatus;
use carebook::coordinator::handler::{CoordinatorAction, CoordinatorHandler, HandlerOutcome};
use carebook::coordinator::review::{Escalation, EscalationReason, ReviewDesk, DRAFT_EXPIRY_HOURS};
use carebook::notify::MessageType;

use crate::support::{self, RecordingSender};

struct Fixture {
    db: SqlitePool,
    ledger: Arc<AppointmentLedger>,
    review: Arc<ReviewDesk>,
    handler: CoordinatorHandler,
}

async fn fixture(sender: Arc<RecordingSender>) -> Fixture {
    let db = support::db().await;
    let ledger = support::ledger(&db);
    let review = Arc::new(ReviewDesk::new());
    let handler = CoordinatorHandler::new(
        db.clone(),
        Arc::clone(&ledger),
        support::dispatcher(sender),
        Arc::clone(&review),
    );
    Fixture {
        db,
        ledger,
        review,
        handler,
    }
}

/// Stage a draft that expired an hour ago.
fn stage_stale_draft(review: &ReviewDesk, escalation: Escalation) {
    let staged_at = Utc::now()
        .checked_sub_signed(Duration::hours(DRAFT_EXPIRY_HOURS + 1))
        .expect("in range");
    review.stage_draft_at(escalation, "Use light pressure only.".to_owned(), staged_at);
}

fn open_pregnancy_question(review: &ReviewDesk) -> Escalation {
    review.open_escalation(
        support::CLIENT_KEY.to_owned(),
        "Sara".to_owned(),
        "Is massage safe during pregnancy?".to_owned(),
        EscalationReason::MedicalClarification,
        None,
    )
}

async fn action(handler: &CoordinatorHandler, text: &str) -> CoordinatorAction {
    match handler.handle(text).await {
        HandlerOutcome::Handled(reply) => reply.action,
        HandlerOutcome::NotApplicable => panic!("expected {text:?} to be handled"),
    }
}

#[tokio::test]
async fn recommendation_is_reviewed_before_reaching_client() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    open_pregnancy_question(&fx.review);

    let staged = match fx
        .handler
        .handle("RECOMMENDATION: Gentle pressure is fine after the first trimester.")
        .await
    {
        HandlerOutcome::Handled(reply) => reply,
        HandlerOutcome::NotApplicable => panic!("recommendation should be handled"),
    };
    assert_eq!(staged.action, CoordinatorAction::RecommendationStaged);
    assert_eq!(staged.reply.message_type, MessageType::RecommendationReview);
    let prepared = staged
        .reply
        .data
        .get("prepared_response")
        .expect("prepared_response");
    assert!(prepared.contains("Gentle pressure is fine after the first trimester."));
    assert!(sender.sent().is_empty());
    assert!(fx.review.has_draft());

    assert_eq!(
        action(&fx.handler, "approve").await,
        CoordinatorAction::RecommendationSent
    );
    let texts = sender.sent_to(support::CLIENT_KEY);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Gentle pressure is fine"));
    assert!(!fx.review.has_draft());
    assert_eq!(fx.review.open_count(), 0);
}

#[tokio::test]
async fn revise_restages_the_draft() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    open_pregnancy_question(&fx.review);

    action(&fx.handler, "RECOMMENDATION: Yes, any session is fine.").await;
    assert_eq!(
        action(&fx.handler, "REVISE: Please check with your doctor first.").await,
        CoordinatorAction::RecommendationRevised
    );
    assert!(fx.review.has_draft());
    assert!(sender.sent().is_empty());

    action(&fx.handler, "Approve.").await;
    let texts = sender.sent_to(support::CLIENT_KEY);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Please check with your doctor first."));
    assert!(!texts[0].contains("any session is fine"));
}

#[tokio::test]
async fn decline_withdraws_and_offers_consultation() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    open_pregnancy_question(&fx.review);

    action(&fx.handler, "RECOMMENDATION: Short sessions only.").await;
    assert_eq!(
        action(&fx.handler, "DECLINE").await,
        CoordinatorAction::RecommendationWithdrawn
    );

    let texts = sender.sent_to(support::CLIENT_KEY);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("consultation"));
    assert_eq!(fx.review.open_count(), 0);
}

#[tokio::test]
async fn long_unclassified_reply_counts_as_guidance() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    open_pregnancy_question(&fx.review);

    assert_eq!(
        action(&fx.handler, "Light pressure is suitable with extra pillows").await,
        CoordinatorAction::RecommendationStaged
    );
    assert!(fx.review.has_draft());
}

#[tokio::test]
async fn recommendation_without_escalation_is_refused() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;

    assert_eq!(
        action(&fx.handler, "RECOMMENDATION: drink water").await,
        CoordinatorAction::NoOpenEscalation
    );
    assert!(!fx.review.has_draft());
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn review_prompt_names_the_client_and_the_booking_escape() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    open_pregnancy_question(&fx.review);

    let staged = match fx.handler.handle("RECOMMENDATION: Short sessions only.").await {
        HandlerOutcome::Handled(reply) => reply,
        HandlerOutcome::NotApplicable => panic!("recommendation should be handled"),
    };
    let prompt = support::dispatcher(sender)
        .render(staged.reply.message_type, &staged.reply.data)
        .expect("review prompt should render");

    assert!(prompt.contains("Reply APPROVE to send this to Sara"));
    assert!(prompt.contains("APPROVE 12"));
}

#[tokio::test]
async fn expired_draft_lets_approve_reach_the_pending_booking() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let escalation = open_pregnancy_question(&fx.review);
    stage_stale_draft(&fx.review, escalation);
    let client = support::client(&fx.db).await;
    let therapist = support::therapist(&fx.db).await;
    let appt = support::pending_booking(&fx.ledger, &client, &therapist, 10).await;

    assert_eq!(
        action(&fx.handler, "approve").await,
        CoordinatorAction::Confirmed(appt.id)
    );
    assert!(!fx.review.has_draft());
    let stored = fx.ledger.get(appt.id).await.expect("get");
    assert_eq!(stored.status, AppointmentStatus::Confirmed);

    let texts = sender.sent_to(support::CLIENT_KEY);
    assert_eq!(texts.len(), 1);
    assert!(!texts[0].contains("light pressure"));
}

#[tokio::test]
async fn expired_draft_with_nothing_pending_is_reported() {
    let sender = RecordingSender::new();
    let fx = fixture(sender.clone()).await;
    let escalation = open_pregnancy_question(&fx.review);
    stage_stale_draft(&fx.review, escalation);

    assert_eq!(
        action(&fx.handler, "approve").await,
        CoordinatorAction::RecommendationExpired
    );
    assert!(!fx.review.has_draft());
    assert!(sender.sent().is_empty());
}
