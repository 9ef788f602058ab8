use serde::Serialize;

use crate::triage::VisionTriageResult;

const PEST_PHRASES: &[&str] = &[
    "pest",
    "bug",
    "insect",
    "what is this",
    "identify",
    "this is",
    "attacking",
    "eating",
    "damage",
    "problem",
    "disease",
    "what pest",
    "which pest",
    "name this",
    "tell me about",
    "aphid",
    "whitefly",
    "beetle",
    "caterpillar",
    "worm",
    "कीट",
    "रोग",
    "समस्या",
    "यह क्या है",
    "पहचान",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentWeights {
    pub pest_phrase: f32,
    pub visual_relevance: f32,
    pub visual_confidence: f32,
    pub confidence_threshold: f32,
}

impl Default for IntentWeights {
    fn default() -> Self {
        Self {
            pest_phrase: 0.5,
            visual_relevance: 0.3,
            visual_confidence: 0.2,
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentReason {
    Escalate,
    PestQueryNoVisual,
    VisualNoPestQuery,
    Neither,
}

impl IntentReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Escalate => "escalate",
            Self::PestQueryNoVisual => "pest-query-no-visual",
            Self::VisualNoPestQuery => "visual-no-pest-query",
            Self::Neither => "neither",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntentMatch {
    pub should_escalate: bool,
    pub score: f32,
    pub reason: IntentReason,
}

/// Decides whether an utterance, read against the latest triage verdict, justifies
/// the heavy detection call. Only the pest phrasing and the relevance verdict gate the
/// decision; `score` is diagnostic.
pub fn match_intent(
    transcript: &str,
    triage: Option<&VisionTriageResult>,
    weights: &IntentWeights,
) -> IntentMatch {
    let pest_query = is_pest_query(transcript);
    let visual_relevant = triage.is_some_and(|result| result.has_relevant_content);
    let confident_visual =
        triage.is_some_and(|result| result.confidence > weights.confidence_threshold);

    let mut score = 0.0_f32;
    if pest_query {
        score += weights.pest_phrase;
    }
    if visual_relevant {
        score += weights.visual_relevance;
    }
    if confident_visual {
        score += weights.visual_confidence;
    }

    let reason = match (pest_query, visual_relevant) {
        (true, true) => IntentReason::Escalate,
        (true, false) => IntentReason::PestQueryNoVisual,
        (false, true) => IntentReason::VisualNoPestQuery,
        (false, false) => IntentReason::Neither,
    };

    IntentMatch {
        should_escalate: reason == IntentReason::Escalate,
        score: score.clamp(0.0, 1.0),
        reason,
    }
}

pub fn is_pest_query(transcript: &str) -> bool {
    let normalized = normalize_transcript(transcript);
    if normalized.is_empty() {
        return false;
    }
    PEST_PHRASES
        .iter()
        .any(|phrase| normalized.contains(phrase))
}

fn normalize_transcript(transcript: &str) -> String {
    transcript
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_punctuation() || ch == '।' {
                ' '
            } else {
                ch
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
