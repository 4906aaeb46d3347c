//! Table-driven intent classifier for coordinator replies.
//!
//! Deterministic keyword scoring: the same tables and input always yield the
//! same verdict. Ambiguity resolves to [`Intent::Unknown`], never to an
//! action.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Minimum score for a category to count.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Two qualifying categories closer than this are a conflict.
pub const CONFLICT_MARGIN: f64 = 0.1;

/// Multiplier for keywords matched inside a longer word.
const PARTIAL_MATCH_PENALTY: f64 = 0.8;

/// Largest id accepted as an appointment reference.
const MAX_APPOINTMENT_ID: i64 = 10_000;

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b(\d+)\b").ok());

/// Approval keywords and weights.
pub const APPROVAL_KEYWORDS: &[(&str, f64)] = &[
    ("approve", 0.95),
    ("approved", 0.95),
    ("yes", 0.9),
    ("ok", 0.85),
    ("okay", 0.85),
    ("confirm", 0.9),
    ("confirmed", 0.9),
    ("accept", 0.85),
    ("good", 0.8),
    ("fine", 0.8),
    ("aprove", 0.8),
    ("aproved", 0.8),
    ("approv", 0.75),
    ("aproov", 0.7),
    ("ye", 0.7),
    ("yea", 0.7),
    ("yeah", 0.7),
    ("yep", 0.75),
    ("yup", 0.75),
    ("oke", 0.7),
    ("okey", 0.7),
    ("k", 0.6),
    ("looks good", 0.85),
    ("sounds good", 0.85),
    ("perfect", 0.9),
    ("great", 0.8),
];

/// Decline keywords and weights.
pub const DECLINE_KEYWORDS: &[(&str, f64)] = &[
    ("decline", 0.95),
    ("declined", 0.95),
    ("no", 0.9),
    ("reject", 0.9),
    ("rejected", 0.9),
    ("cancel", 0.9),
    ("cancelled", 0.9),
    ("deny", 0.85),
    ("denied", 0.85),
    ("refuse", 0.85),
    ("refused", 0.85),
    ("not", 0.8),
    ("declin", 0.8),
    ("declne", 0.75),
    ("nope", 0.85),
    ("nah", 0.7),
    ("n", 0.6),
];

/// Modification keywords and weights.
pub const MODIFICATION_KEYWORDS: &[(&str, f64)] = &[
    ("change", 0.9),
    ("modify", 0.95),
    ("different", 0.8),
    ("reschedule", 0.95),
    ("move", 0.8),
    ("shift", 0.8),
    ("adjust", 0.85),
    ("update", 0.8),
    ("alternative", 0.85),
    ("instead", 0.8),
];

/// What a coordinator reply asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Confirm the appointment.
    Approval,
    /// Decline the appointment.
    Decline,
    /// Ask the client for changes.
    Modification,
    /// Not a decision, or ambiguous.
    Unknown,
}

impl Intent {
    /// Lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Decline => "decline",
            Self::Modification => "modification",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Decided intent.
    pub intent: Intent,
    /// Score of the top category, in `[0, 1]`.
    pub confidence: f64,
    /// First integer in `1..=10000` found in the text.
    pub appointment_id: Option<i64>,
    /// Per-category scores: approval, decline, modification.
    pub scores: [f64; 3],
}

/// Keyword tables for the three decision categories.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    approval: Vec<(String, f64)>,
    decline: Vec<(String, f64)>,
    modification: Vec<(String, f64)>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(APPROVAL_KEYWORDS, DECLINE_KEYWORDS, MODIFICATION_KEYWORDS)
    }
}

impl IntentClassifier {
    /// Build a classifier from explicit keyword tables.
    pub fn new(
        approval: &[(&str, f64)],
        decline: &[(&str, f64)],
        modification: &[(&str, f64)],
    ) -> Self {
        let own = |table: &[(&str, f64)]| -> Vec<(String, f64)> {
            table
                .iter()
                .map(|(k, w)| (k.to_lowercase(), w.clamp(0.0, 1.0)))
                .collect()
        };
        Self {
            approval: own(approval),
            decline: own(decline),
            modification: own(modification),
        }
    }

    /// Classify a coordinator message.
    pub fn classify(&self, text: &str) -> Classification {
        let message = text.trim().to_lowercase();
        let appointment_id = extract_appointment_id(&message);

        let scores = [
            category_score(&message, &self.approval),
            category_score(&message, &self.decline),
            category_score(&message, &self.modification),
        ];
        let intents = [Intent::Approval, Intent::Decline, Intent::Modification];

        let mut top = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[top] {
                top = i;
            }
        }
        let confidence = scores[top];

        let conflicting = scores.iter().enumerate().any(|(i, score)| {
            i != top && *score >= CONFIDENCE_THRESHOLD && confidence - *score < CONFLICT_MARGIN
        });

        let intent = if confidence < CONFIDENCE_THRESHOLD || conflicting {
            Intent::Unknown
        } else {
            intents[top]
        };

        Classification {
            intent,
            confidence,
            appointment_id,
            scores,
        }
    }
}

/// Score one category.
///
/// A keyword that is a substring of another matched keyword in the same
/// table is ignored, so "approve" is not diluted by "approv".
fn category_score(message: &str, table: &[(String, f64)]) -> f64 {
    if message.is_empty() {
        return 0.0;
    }

    let matched: Vec<&(String, f64)> = table
        .iter()
        .filter(|(keyword, _)| !keyword.is_empty() && message.contains(keyword.as_str()))
        .collect();

    let weights: Vec<f64> = matched
        .iter()
        .filter(|(keyword, _)| {
            !matched
                .iter()
                .any(|(other, _)| other.len() > keyword.len() && other.contains(keyword.as_str()))
        })
        .map(|(keyword, weight)| {
            if contains_word(message, keyword) {
                *weight
            } else {
                weight * PARTIAL_MATCH_PENALTY
            }
        })
        .collect();

    let max = weights.iter().copied().fold(0.0_f64, f64::max);
    if weights.len() <= 1 {
        return max;
    }
    let count = f64::from(u32::try_from(weights.len()).unwrap_or(u32::MAX));
    let mean = weights.iter().sum::<f64>() / count;
    (0.7 * max + 0.3 * mean).clamp(0.0, 1.0)
}

/// Whether `keyword` occurs in `message` bounded by non-alphanumerics.
fn contains_word(message: &str, keyword: &str) -> bool {
    message.match_indices(keyword).any(|(start, matched)| {
        let before = message[..start].chars().next_back();
        let after = message[start.saturating_add(matched.len())..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// First standalone integer in `1..=10000`.
fn extract_appointment_id(message: &str) -> Option<i64> {
    let re = NUMBER.as_ref()?;
    re.captures_iter(message)
        .filter_map(|caps| caps[1].parse::<i64>().ok())
        .find(|n| (1..=MAX_APPOINTMENT_ID).contains(n))
}
