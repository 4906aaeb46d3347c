//! Escalations and the two-turn recommendation review.
//!
//! When a client request needs a human, an [`Escalation`] is opened and the
//! coordinator is alerted. Guidance the coordinator sends back is never
//! forwarded directly: it becomes a [`RecommendationDraft`] that must be
//! explicitly approved in a second turn.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Draft lifetime before it must be re-requested.
pub const DRAFT_EXPIRY_HOURS: i64 = 24;

/// Open escalations kept in memory.
const MAX_OPEN_ESCALATIONS: usize = 50;

/// Prefix marking coordinator guidance.
pub const RECOMMENDATION_PREFIX: &str = "recommendation:";

/// Why a client request was escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Needs a therapist's medical judgement.
    MedicalClarification,
    /// Unusual or multi-part request.
    ComplexRequest,
    /// Time-critical.
    UrgentMatter,
    /// Accessibility or special handling.
    SpecialAccommodation,
}

impl EscalationReason {
    /// Stable tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalClarification => "medical_clarification",
            Self::ComplexRequest => "complex_request",
            Self::UrgentMatter => "urgent_matter",
            Self::SpecialAccommodation => "special_accommodation",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MedicalClarification => "medical clarification",
            Self::ComplexRequest => "complex request",
            Self::UrgentMatter => "urgent matter",
            Self::SpecialAccommodation => "special accommodation",
        }
    }

    /// Parse a tag, accepting spaces or underscores.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(' ', "_").as_str() {
            "medical_clarification" => Some(Self::MedicalClarification),
            "complex_request" => Some(Self::ComplexRequest),
            "urgent_matter" => Some(Self::UrgentMatter),
            "special_accommodation" => Some(Self::SpecialAccommodation),
            _ => None,
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A client request waiting on coordinator guidance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    /// Unique id.
    pub id: Uuid,
    /// Client phone key.
    pub client_phone: String,
    /// Client display name.
    pub client_name: String,
    /// What the client asked.
    pub client_message: String,
    /// Why it was escalated.
    pub reason: EscalationReason,
    /// Related appointment, if any.
    pub appointment_id: Option<i64>,
    /// When it was opened.
    pub created_at: DateTime<Utc>,
}

/// A client-facing message drafted from coordinator guidance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationDraft {
    /// The escalation being answered.
    pub escalation: Escalation,
    /// Coordinator guidance, prefix stripped.
    pub guidance: String,
    /// When the draft was staged.
    pub created_at: DateTime<Utc>,
    /// When it stops being approvable.
    pub expires_at: DateTime<Utc>,
}

/// Coordinator's answer to a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewCommand {
    /// Send the draft.
    Approve,
    /// Replace the guidance and review again.
    Revise(String),
    /// Withdraw the draft.
    Decline,
}

impl ReviewCommand {
    /// Parse a review reply. Only exact command shapes count: `APPROVE`,
    /// `REVISE: <text>`, `DECLINE` (case-insensitive, surrounding whitespace
    /// and trailing punctuation ignored).
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();
        if let Some(rest) = lower.strip_prefix("revise:") {
            let offset = trimmed.len().saturating_sub(rest.len());
            let revised = trimmed.get(offset..).unwrap_or(rest).trim();
            return if revised.is_empty() {
                None
            } else {
                Some(Self::Revise(revised.to_owned()))
            };
        }
        match lower.trim_end_matches(['.', '!']) {
            "approve" => Some(Self::Approve),
            "decline" => Some(Self::Decline),
            _ => None,
        }
    }
}

/// Outcome of taking the current draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftTake {
    /// A live draft.
    Ready(RecommendationDraft),
    /// The draft expired; it has been discarded.
    Expired(RecommendationDraft),
    /// No draft is staged.
    None,
}

#[derive(Debug, Default)]
struct ReviewState {
    escalations: VecDeque<Escalation>,
    draft: Option<RecommendationDraft>,
}

/// Tracks open escalations and the single staged draft for the coordinator.
///
/// Uses a sync [`Mutex`] since the critical sections are brief (no awaits).
#[derive(Debug, Default)]
pub struct ReviewDesk {
    state: Mutex<ReviewState>,
}

impl ReviewDesk {
    /// Create an empty desk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new escalation.
    pub fn open_escalation(
        &self,
        client_phone: String,
        client_name: String,
        client_message: String,
        reason: EscalationReason,
        appointment_id: Option<i64>,
    ) -> Escalation {
        let escalation = Escalation {
            id: Uuid::new_v4(),
            client_phone,
            client_name,
            client_message,
            reason,
            appointment_id,
            created_at: Utc::now(),
        };
        if let Ok(mut state) = self.state.lock() {
            if state.escalations.len() >= MAX_OPEN_ESCALATIONS {
                state.escalations.pop_front();
            }
            state.escalations.push_back(escalation.clone());
        }
        escalation
    }

    /// The most recently opened escalation still awaiting guidance.
    pub fn latest_escalation(&self) -> Option<Escalation> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.escalations.back().cloned())
    }

    /// Number of open escalations.
    pub fn open_count(&self) -> usize {
        self.state.lock().map(|s| s.escalations.len()).unwrap_or(0)
    }

    /// Close an escalation once it has been answered.
    pub fn close_escalation(&self, id: Uuid) {
        if let Ok(mut state) = self.state.lock() {
            state.escalations.retain(|e| e.id != id);
        }
    }

    /// Stage a draft, replacing any previous one.
    pub fn stage_draft(&self, escalation: Escalation, guidance: String) -> RecommendationDraft {
        self.stage_draft_at(escalation, guidance, Utc::now())
    }

    /// [`ReviewDesk::stage_draft`] against an explicit clock.
    pub fn stage_draft_at(
        &self,
        escalation: Escalation,
        guidance: String,
        now: DateTime<Utc>,
    ) -> RecommendationDraft {
        let expires_at = now
            .checked_add_signed(Duration::hours(DRAFT_EXPIRY_HOURS))
            .unwrap_or(now);
        let draft = RecommendationDraft {
            escalation,
            guidance,
            created_at: now,
            expires_at,
        };
        if let Ok(mut state) = self.state.lock() {
            state.draft = Some(draft.clone());
        }
        draft
    }

    /// Whether a draft is staged.
    pub fn has_draft(&self) -> bool {
        self.state.lock().map(|s| s.draft.is_some()).unwrap_or(false)
    }

    /// Remove and return the staged draft (single use).
    pub fn take_draft(&self) -> DraftTake {
        self.take_draft_at(Utc::now())
    }

    /// [`ReviewDesk::take_draft`] against an explicit clock.
    pub fn take_draft_at(&self, now: DateTime<Utc>) -> DraftTake {
        let Ok(mut state) = self.state.lock() else {
            return DraftTake::None;
        };
        match state.draft.take() {
            Some(draft) if now > draft.expires_at => DraftTake::Expired(draft),
            Some(draft) => DraftTake::Ready(draft),
            None => DraftTake::None,
        }
    }
}

/// Strip a leading `RECOMMENDATION:` marker, if present.
pub fn strip_recommendation_prefix(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let head = trimmed.get(..RECOMMENDATION_PREFIX.len())?;
    if head.eq_ignore_ascii_case(RECOMMENDATION_PREFIX) {
        trimmed.get(RECOMMENDATION_PREFIX.len()..).map(str::trim)
    } else {
        None
    }
}
