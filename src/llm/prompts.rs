use serde_json::json;

use crate::config::LlmSettings;
use crate::model::{Candidate, SectionKind};
use crate::segment::SegmentedSections;
use crate::util::floor_char_boundary;

pub const CONTEXT_ORDER: [SectionKind; 6] = [
    SectionKind::Abstract,
    SectionKind::Introduction,
    SectionKind::Methods,
    SectionKind::Participants,
    SectionKind::Results,
    SectionKind::Discussion,
];

const VERIFY_INSTRUCTIONS: &str = r#"You are checking experimental-design parameters extracted from a scientific paper.
For every parameter listed under CANDIDATES decide whether the value is supported by the PAPER TEXT.
Quote the exact sentence fragment that supports your answer as "evidence". If the text does not
state the parameter, set "abstained" to true and leave "evidence" empty. Do not guess.

Return ONLY a JSON object of this shape:
{"parameters": {"<parameter name>": {"verified": true, "value": <value>, "confidence": 0.0-1.0,
 "evidence": "<verbatim quote>", "reasoning": "<one sentence>", "abstained": false}}}"#;

const RECOVER_INSTRUCTIONS: &str = r#"You are extracting experimental-design parameters from a scientific paper.
The LIBRARY lists the parameters we track. ALREADY EXTRACTED lists names we already have; skip them.
Report only library parameters that the PAPER TEXT states explicitly, each with a verbatim quote.

Return ONLY a JSON object of this shape:
{"parameters": [{"parameter_name": "<library name>", "value": <value>, "confidence": 0.0-1.0,
 "evidence": "<verbatim quote>", "evidence_location": "<section name>"}]}"#;

const DISCOVER_INSTRUCTIONS: &str = r#"You are surveying a scientific paper for experimental-design parameters that are NOT in the LIBRARY.
Propose parameters a replication would need, each backed by a verbatim quote. If you notice a LIBRARY
parameter that is stated in the text but missing from ALREADY EXTRACTED, list it under
"missed_library_parameters" instead.

Return ONLY a JSON object of this shape:
{"proposals": [{"parameter_name": "<snake_case>", "description": "...", "category": "...",
 "evidence": "<verbatim quote>", "evidence_location": "<section name>", "example_values": ["..."],
 "units": "...", "prevalence": "high|medium|low", "importance": "high|medium|low",
 "mapping_suggestion": "<closest library parameter or empty>"}],
 "missed_library_parameters": [{"parameter_name": "<library name>", "value": <value>,
 "evidence": "<verbatim quote>", "evidence_location": "<section name>"}]}"#;

const REPAIR_INSTRUCTIONS: &str = r#"The text below was supposed to be a single JSON value but could not be parsed.
Rewrite it as valid JSON with the same content. Return ONLY the JSON, without commentary or code fences."#;

pub fn build_context(sections: &SegmentedSections, settings: &LlmSettings) -> String {
    let mut blocks = Vec::new();
    for kind in CONTEXT_ORDER {
        let Some(text) = sections.text(kind) else {
            continue;
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let budget = settings.section_budget(kind);
        let cut = floor_char_boundary(text, budget);
        let mut block = format!("## {}\n{}", kind.as_str().to_uppercase(), &text[..cut]);
        if cut < text.len() {
            block.push_str(" [...]");
        }
        blocks.push(block);
    }
    blocks.join("\n\n")
}

pub fn verify_prompt(candidates: &[Candidate], context: &str) -> String {
    let listed = candidates
        .iter()
        .map(|candidate| {
            json!({
                "parameter": candidate.parameter,
                "value": candidate.value,
                "evidence": candidate.evidence,
            })
            .to_string()
        })
        .collect::<Vec<String>>()
        .join("\n");
    format!("{VERIFY_INSTRUCTIONS}\n\nCANDIDATES:\n{listed}\n\nPAPER TEXT:\n{context}\n")
}

pub fn recover_prompt(library: &str, extracted: &[String], context: &str) -> String {
    format!(
        "{RECOVER_INSTRUCTIONS}\n\nLIBRARY:\n{library}\n\nALREADY EXTRACTED:\n{}\n\nPAPER TEXT:\n{context}\n",
        names_or_none(extracted)
    )
}

pub fn discover_prompt(library: &str, extracted: &[String], context: &str) -> String {
    format!(
        "{DISCOVER_INSTRUCTIONS}\n\nLIBRARY:\n{library}\n\nALREADY EXTRACTED:\n{}\n\nPAPER TEXT:\n{context}\n",
        names_or_none(extracted)
    )
}

pub fn repair_prompt(broken: &str) -> String {
    format!("{REPAIR_INSTRUCTIONS}\n\nTEXT:\n{broken}\n")
}

fn names_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}
