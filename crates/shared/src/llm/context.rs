use crate::knowledge::{self, PestKnowledge};
use crate::pest::{PestDetectionRecord, format_percent};
use crate::session::{Language, Session};

use super::gateway::ChatMessage;
use super::prompts::{
    KNOWLEDGE_HEADER, NO_CLEAR_PEST_NOTICE, NO_VISUAL_CONTEXT, fill, template_for_language,
};

pub const DEFAULT_MAX_HISTORY: usize = 8;
pub const DEFAULT_MAX_TOKENS: usize = 6000;
/// Live turns see this many messages, the new utterance included.
pub const LIVE_WINDOW: usize = 10;

const CHARS_PER_TOKEN: usize = 4;
const MAX_LISTED_PRECAUTIONS: usize = 3;

/// Builds the bounded message list sent to the language model for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAssembler {
    pub max_history: usize,
    pub max_tokens: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ContextAssembler {
    pub fn new(max_history: usize, max_tokens: usize) -> Self {
        Self {
            max_history,
            max_tokens,
        }
    }

    /// `[system(prompt + knowledge)] + last max_history messages + [user(utterance)]`.
    pub fn build_context(&self, utterance: &str, session: &Session) -> Vec<ChatMessage> {
        let mut system = system_prompt(session);
        let knowledge = knowledge_block(session);
        if !knowledge.is_empty() {
            system.push_str("\n\n");
            system.push_str(&knowledge);
        }
        let system = truncate_chars(&system, self.max_tokens.saturating_mul(CHARS_PER_TOKEN));

        let mut messages = Vec::with_capacity(self.max_history + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(history_window(session, self.max_history));
        messages.push(ChatMessage::user(utterance));
        messages
    }

    /// Live turn without detection: the triage description stands in for the image.
    pub fn build_fast_path_context(
        &self,
        utterance: &str,
        visual_description: Option<&str>,
        session: &Session,
    ) -> Vec<ChatMessage> {
        let template = template_for_language(session.language);
        let visual = visual_description
            .map(str::trim)
            .filter(|description| !description.is_empty())
            .unwrap_or(NO_VISUAL_CONTEXT);

        let mut messages = vec![ChatMessage::system(template.live_system_prompt)];
        messages.extend(history_window(session, LIVE_WINDOW - 1));
        messages.push(ChatMessage::user(format!(
            "Visual context: {visual}\n\nFarmer asks: {utterance}"
        )));
        messages
    }

    /// Live turn after a heavy detection: the detection result is embedded in the
    /// user turn so the reply is anchored to it.
    pub fn build_escalation_context(
        &self,
        utterance: &str,
        record: &PestDetectionRecord,
        session: &Session,
    ) -> Vec<ChatMessage> {
        let template = template_for_language(session.language);
        let visual_context = if record.is_identified() {
            detection_block(record)
        } else {
            NO_CLEAR_PEST_NOTICE.to_string()
        };

        let mut messages = vec![ChatMessage::system(template.escalation_system_prompt)];
        messages.extend(history_window(session, LIVE_WINDOW - 1));
        messages.push(ChatMessage::user(format!(
            "{visual_context}\n\nFarmer asks: {utterance}"
        )));
        messages
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn system_prompt(session: &Session) -> String {
    let template = template_for_language(session.language);
    let mut prompt = template.system_prompt.to_string();

    if !session.detected_pests().is_empty() {
        let pests = session.detected_pests().join(", ");
        prompt.push_str(&fill(template.detected_pests_line, &[("pests", &pests)]));
    }
    if let Some(crop) = session.crop_type.as_deref() {
        prompt.push_str(&fill(template.crop_type_line, &[("crop", crop)]));
    }
    if let Some(region) = session.region.as_deref() {
        prompt.push_str(&fill(template.region_line, &[("region", region)]));
    }
    prompt
}

fn knowledge_block(session: &Session) -> String {
    let mut sections = Vec::new();

    if let Some(latest) = session.latest_pest_info.as_ref() {
        sections.push(latest_detection_section(latest, session.language));
    }
    for pest in session.detected_pests() {
        sections.push(pest_section(&knowledge::lookup(pest, session.language)));
    }

    if sections.is_empty() {
        return String::new();
    }
    format!("{KNOWLEDGE_HEADER}{}", sections.join("\n\n"))
}

fn latest_detection_section(record: &PestDetectionRecord, language: Language) -> String {
    let known = knowledge::lookup(&record.pest_name, language);
    let scientific_name = record
        .scientific_name
        .clone()
        .unwrap_or(known.scientific_name);
    let affected_crops = if record.affected_crops.is_empty() {
        known.affected_crops
    } else {
        record.affected_crops.clone()
    };
    let spread_method = record.spread_method.clone().unwrap_or(known.spread_method);
    let precautions = if record.precautions.is_empty() {
        known.precautions
    } else {
        record.precautions.clone()
    };

    format!(
        "**Recently Detected Pest Information:**\nPest: {}\nConfidence: {}\nScientific Name: {}\nSeverity: {}\nAffected Crops: {}\nDescription: {}\nSpread Method: {}\nKnown Precautions: {}",
        record.pest_name,
        format_percent(record.confidence),
        scientific_name,
        record.severity.as_str(),
        affected_crops.join(", "),
        record.description,
        spread_method,
        first_precautions(&precautions),
    )
}

fn pest_section(knowledge: &PestKnowledge) -> String {
    format!(
        "**{}** ({}):\n- Severity: {}\n- Affected Crops: {}\n- Description: {}\n- Spread Method: {}\n- Key Precautions: {}",
        knowledge.name,
        knowledge.scientific_name,
        knowledge.severity.as_str(),
        knowledge.affected_crops.join(", "),
        knowledge.description,
        knowledge.spread_method,
        first_precautions(&knowledge.precautions),
    )
}

fn detection_block(record: &PestDetectionRecord) -> String {
    format!(
        "⚠️ PEST IDENTIFIED: {}\nConfidence: {}\nSeverity: {}\nDescription: {}\n\nThe farmer is asking about this detected pest.",
        record.pest_name,
        format_percent(record.confidence),
        record.severity.as_str(),
        record.description,
    )
}

fn first_precautions(precautions: &[String]) -> String {
    precautions
        .iter()
        .take(MAX_LISTED_PRECAUTIONS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn history_window(session: &Session, max_messages: usize) -> impl Iterator<Item = ChatMessage> + '_ {
    let skip = session.messages.len().saturating_sub(max_messages);
    session.messages.iter().skip(skip).map(|message| ChatMessage {
        role: message.role,
        content: message.content.clone(),
    })
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
