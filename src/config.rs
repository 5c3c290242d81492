use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::model::SectionKind;
use crate::util::read_json;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub segmentation: SegmentationSettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    pub methods_min_chars: usize,
    pub header_max_line_offset: usize,
    pub header_max_line_chars: usize,
    pub experiment_header_max_line_chars: usize,
    pub shared_methods_search_window: usize,
    pub shared_methods_fallback_span: usize,
    pub overview_drop_min_chars: usize,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            methods_min_chars: 200,
            header_max_line_offset: 5,
            header_max_line_chars: 50,
            experiment_header_max_line_chars: 120,
            shared_methods_search_window: 20_000,
            shared_methods_fallback_span: 6_000,
            overview_drop_min_chars: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub budget_usd: f64,
    pub price_per_1k_tokens_usd: f64,
    pub verify: bool,
    pub recover_missed: bool,
    pub discover: bool,
    pub require_evidence: bool,
    pub evidence_min_chars_confident: usize,
    pub evidence_min_chars_uncertain: usize,
    pub strict_evidence: bool,
    pub evidence_min_chars_strict: usize,
    pub discovery_min_evidence_chars: usize,
    pub section_budgets: BTreeMap<SectionKind, usize>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: ProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            timeout_secs: 120,
            budget_usd: 5.0,
            price_per_1k_tokens_usd: 0.002,
            verify: true,
            recover_missed: true,
            discover: false,
            require_evidence: true,
            evidence_min_chars_confident: 3,
            evidence_min_chars_uncertain: 12,
            strict_evidence: false,
            evidence_min_chars_strict: 20,
            discovery_min_evidence_chars: 20,
            section_budgets: default_section_budgets(),
        }
    }
}

impl LlmSettings {
    pub fn evidence_floor(&self, confidence: f64) -> usize {
        if confidence >= 0.5 {
            self.evidence_min_chars_confident
        } else if self.strict_evidence {
            self.evidence_min_chars_strict
        } else {
            self.evidence_min_chars_uncertain
        }
    }

    pub fn section_budget(&self, kind: SectionKind) -> usize {
        self.section_budgets
            .get(&kind)
            .copied()
            .or_else(|| default_section_budgets().get(&kind).copied())
            .unwrap_or(1_500)
    }
}

fn default_section_budgets() -> BTreeMap<SectionKind, usize> {
    BTreeMap::from([
        (SectionKind::Abstract, 1_500),
        (SectionKind::Introduction, 2_000),
        (SectionKind::Methods, 6_000),
        (SectionKind::Participants, 2_500),
        (SectionKind::Results, 3_000),
        (SectionKind::Discussion, 1_500),
        (SectionKind::Other, 1_000),
    ])
}

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => read_json::<EngineConfig>(path)?,
        None => EngineConfig::default(),
    };
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<()> {
    if config.llm.budget_usd < 0.0 {
        bail!("llm.budget_usd must be non-negative");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be within [0, 2]");
    }
    if config.segmentation.header_max_line_chars == 0 {
        bail!("segmentation.header_max_line_chars must be positive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"llm": {"enabled": true, "strict_evidence": true}}"#)
                .expect("config parses");
        assert!(config.llm.enabled);
        assert_eq!(config.llm.provider, ProviderKind::Ollama);
        assert_eq!(config.segmentation.methods_min_chars, 200);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn evidence_floor_depends_on_confidence_and_strictness() {
        let mut settings = LlmSettings::default();
        assert_eq!(settings.evidence_floor(0.9), 3);
        assert_eq!(settings.evidence_floor(0.5), 3);
        assert_eq!(settings.evidence_floor(0.3), 12);
        settings.strict_evidence = true;
        assert_eq!(settings.evidence_floor(0.3), 20);
        assert_eq!(settings.evidence_floor(0.8), 3);
    }

    #[test]
    fn section_budget_falls_back_to_defaults() {
        let mut settings = LlmSettings::default();
        settings.section_budgets.clear();
        assert_eq!(settings.section_budget(SectionKind::Methods), 6_000);
    }

    #[test]
    fn negative_budget_is_rejected() {
        let mut config = EngineConfig::default();
        config.llm.budget_usd = -1.0;
        assert!(validate_config(&config).is_err());
    }
}
