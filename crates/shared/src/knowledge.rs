use std::sync::LazyLock;

use serde::Deserialize;
use tracing::error;

use crate::pest::{PestDetectionRecord, Severity, UNKNOWN_PEST_NAME};
use crate::session::Language;

static PEST_KNOWLEDGE: LazyLock<Result<Vec<KnowledgeEntry>, String>> = LazyLock::new(|| {
    serde_json::from_str(include_str!("../data/pest_knowledge.json"))
        .map_err(|err| format!("pest knowledge table is invalid: {err}"))
});

#[derive(Debug, Deserialize)]
struct KnowledgeEntry {
    name: String,
    scientific_name: String,
    harmful: bool,
    severity: Severity,
    affected_crops: Vec<String>,
    text: LocalizedText,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    english: KnowledgeText,
    hindi: KnowledgeText,
}

#[derive(Debug, Deserialize)]
struct KnowledgeText {
    description: String,
    spread_method: String,
    precautions: Vec<String>,
}

/// Localized facts about one pest, as served to farmers and injected into prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct PestKnowledge {
    pub name: String,
    pub scientific_name: String,
    pub is_harmful: bool,
    pub severity: Severity,
    pub affected_crops: Vec<String>,
    pub description: String,
    pub spread_method: String,
    pub precautions: Vec<String>,
    pub in_table: bool,
}

/// Looks a pest up by name: exact case-insensitive match first, then a partial match in
/// either direction, then a cautious generic entry for unknown pests.
pub fn lookup(pest_name: &str, language: Language) -> PestKnowledge {
    find(pest_name, language).unwrap_or_else(|| unknown_pest(pest_name, language))
}

pub fn find(pest_name: &str, language: Language) -> Option<PestKnowledge> {
    let entries = match PEST_KNOWLEDGE.as_ref() {
        Ok(entries) => entries,
        Err(err) => {
            error!(error = %err, "pest knowledge table unavailable");
            return None;
        }
    };

    let needle = pest_name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    entries
        .iter()
        .find(|entry| entry.name.to_lowercase() == needle)
        .or_else(|| {
            entries.iter().find(|entry| {
                let key = entry.name.to_lowercase();
                key.contains(&needle) || needle.contains(&key)
            })
        })
        .map(|entry| localize(entry, language))
}

/// Copies table facts onto a detection so downstream prompts and responses carry
/// them. Sentinel records are returned untouched.
pub fn enrich_record(mut record: PestDetectionRecord, language: Language) -> PestDetectionRecord {
    if !record.is_identified() {
        return record;
    }

    let Some(knowledge) = find(&record.pest_name, language) else {
        return record;
    };

    record.scientific_name = Some(knowledge.scientific_name);
    record.affected_crops = knowledge.affected_crops;
    record.spread_method = Some(knowledge.spread_method);
    record.precautions = knowledge.precautions;
    if knowledge.severity == Severity::Beneficial {
        record.severity = Severity::Beneficial;
    }
    record
}

fn localize(entry: &KnowledgeEntry, language: Language) -> PestKnowledge {
    let text = match language {
        Language::English => &entry.text.english,
        Language::Hindi => &entry.text.hindi,
    };

    PestKnowledge {
        name: entry.name.clone(),
        scientific_name: entry.scientific_name.clone(),
        is_harmful: entry.harmful,
        severity: entry.severity,
        affected_crops: entry.affected_crops.clone(),
        description: text.description.clone(),
        spread_method: text.spread_method.clone(),
        precautions: text.precautions.clone(),
        in_table: true,
    }
}

fn unknown_pest(pest_name: &str, language: Language) -> PestKnowledge {
    let name = pest_name.trim().to_string();
    let (scientific_name, description, spread_method) = match language {
        Language::English => (
            "Unknown".to_string(),
            format!(
                "The pest '{name}' has been detected. Specific information is not available in our database. Please consult with local agricultural experts for detailed guidance."
            ),
            "Spread method information not available.".to_string(),
        ),
        Language::Hindi => (
            "अज्ञात".to_string(),
            format!(
                "'{name}' का पता चला है। विशिष्ट जानकारी उपलब्ध नहीं है। कृपया स्थानीय कृषि विशेषज्ञ से परामर्श लें।"
            ),
            "फैलने की विधि की जानकारी उपलब्ध नहीं है।".to_string(),
        ),
    };

    PestKnowledge {
        name,
        scientific_name,
        // Unknown pests are treated as harmful until an expert says otherwise.
        is_harmful: true,
        severity: Severity::Unknown,
        affected_crops: Vec::new(),
        description,
        spread_method,
        precautions: generic_precautions(language),
        in_table: false,
    }
}

/// Facts served when the detector could not name any pest in the image.
pub fn unidentified(language: Language) -> PestKnowledge {
    let (description, spread_method) = match language {
        Language::English => (
            "No pest could be identified in this image. Try a closer, well-lit photo of the affected leaves, or consult local agricultural experts.",
            "Not applicable.",
        ),
        Language::Hindi => (
            "इस छवि में किसी कीट की पहचान नहीं हो सकी। प्रभावित पत्तियों की पास से और अच्छी रोशनी में फोटो लें, या स्थानीय कृषि विशेषज्ञ से परामर्श लें।",
            "लागू नहीं।",
        ),
    };

    PestKnowledge {
        name: UNKNOWN_PEST_NAME.to_string(),
        scientific_name: String::new(),
        is_harmful: false,
        severity: Severity::Unknown,
        affected_crops: Vec::new(),
        description: description.to_string(),
        spread_method: spread_method.to_string(),
        precautions: generic_precautions(language),
        in_table: false,
    }
}

fn generic_precautions(language: Language) -> Vec<String> {
    let precautions: &[&str] = match language {
        Language::English => &[
            "Monitor your crops regularly for any changes",
            "Consult with local agricultural extension services",
            "Maintain proper field hygiene",
            "Seek expert help if infestation spreads",
        ],
        Language::Hindi => &[
            "नियमित रूप से अपनी फसलों की निगरानी करें",
            "स्थानीय कृषि विस्तार सेवा से परामर्श लें",
            "उचित खेत स्वच्छता बनाए रखें",
            "यदि संक्रमण फैलता है तो विशेषज्ञ सहायता लें",
        ],
    };
    precautions.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::{PEST_KNOWLEDGE, enrich_record, find, lookup, unidentified};
    use crate::pest::{PestDetectionRecord, Severity, SeverityThresholds};
    use crate::session::Language;

    #[test]
    fn knowledge_table_parses() {
        let entries = PEST_KNOWLEDGE
            .as_ref()
            .expect("embedded knowledge table should parse");
        assert!(entries.len() >= 9);
        assert!(entries.iter().all(|entry| !entry.text.english.precautions.is_empty()
            && !entry.text.hindi.precautions.is_empty()));
    }

    #[test]
    fn lookup_prefers_exact_then_partial_matches() {
        let exact = lookup("whitefly", Language::English);
        assert_eq!(exact.name, "Whitefly");
        assert!(exact.in_table);

        let partial = lookup("Aphids", Language::English);
        assert_eq!(partial.name, "Aphid");

        let contained = lookup("rice leaf roller larva", Language::English);
        assert_eq!(contained.name, "Rice Leaf Roller");
    }

    #[test]
    fn lookup_falls_back_to_cautious_default() {
        let english = lookup("Mystery Mite", Language::English);
        assert!(!english.in_table);
        assert!(english.is_harmful);
        assert_eq!(english.severity, Severity::Unknown);
        assert!(english.description.contains("'Mystery Mite'"));

        let hindi = lookup("Mystery Mite", Language::Hindi);
        assert_eq!(hindi.scientific_name, "अज्ञात");
        assert_eq!(hindi.precautions.len(), 4);
    }

    #[test]
    fn unidentified_results_do_not_claim_a_detection() {
        let english = unidentified(Language::English);
        assert_eq!(english.name, "Unknown");
        assert!(!english.is_harmful);
        assert!(english.description.starts_with("No pest could be identified"));
        assert!(!english.description.contains("has been detected"));
        assert_eq!(
            english.precautions,
            lookup("Mystery Mite", Language::English).precautions
        );

        let hindi = unidentified(Language::Hindi);
        assert_eq!(hindi.precautions.len(), 4);
        assert!(!hindi.description.is_ascii());
    }

    #[test]
    fn hindi_lookup_returns_localized_text() {
        let knowledge = find("Ladybug", Language::Hindi).expect("ladybug should be known");
        assert!(!knowledge.is_harmful);
        assert_eq!(knowledge.severity, Severity::Beneficial);
        assert!(!knowledge.description.is_ascii());
    }

    #[test]
    fn enrich_record_copies_table_facts_onto_identified_pests() {
        let thresholds = SeverityThresholds::default();
        let record = enrich_record(
            PestDetectionRecord::detected("Ladybug", 0.92, &thresholds),
            Language::English,
        );
        assert_eq!(record.scientific_name.as_deref(), Some("Coccinellidae"));
        assert_eq!(record.severity, Severity::Beneficial);
        assert!(!record.precautions.is_empty());

        let failed = enrich_record(PestDetectionRecord::failed("timeout"), Language::English);
        assert_eq!(failed, PestDetectionRecord::failed("timeout"));
    }
}
