use std::collections::BTreeMap;

use anyhow::{Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::experiments::{ExperimentBoundaryDetector, ExperimentLayout, SharedMethods};
use crate::extraction::{ExtractionStats, ParameterTable, PatternExtractionEngine, group_by_parameter};
use crate::llm::{CallOutcome, CostBudget, DiscoveryProposal, LlmAssistedEngine, LlmCallRecord, LlmProvider};
use crate::model::{
    Candidate, DocumentInput, ExperimentRange, ParameterRecord, SectionKind, SegmentSource,
};
use crate::normalize::{NormalizationStats, TextNormalizer};
use crate::resolve::{ConflictResolver, PolicyTable};
use crate::segment::{SectionSegmenter, SegmentedSections};
use crate::util::now_utc_string;

pub const REPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMode {
    #[default]
    Standard,
    Raw,
}

impl PreprocessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PreprocessMode::Standard => "standard",
            PreprocessMode::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessed {
    pub normalized_text: String,
    pub stats: NormalizationStats,
    pub segmentation: PaperSegmentation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperSegmentation {
    pub layout: ExperimentLayout,
    pub paper_sections: SegmentedSections,
    pub experiments: Vec<SegmentedExperiment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentedExperiment {
    pub range: ExperimentRange,
    pub shared_methods_spliced: bool,
    pub overview_chars_dropped: usize,
    pub sections: SegmentedSections,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub kind: SectionKind,
    pub source: SegmentSource,
    pub chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub number: u32,
    pub title: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub has_local_methods: bool,
    pub shared_methods_spliced: bool,
    pub overview_chars_dropped: usize,
    pub sections: Vec<SectionSummary>,
    pub stats: ExtractionStats,
    pub records: Vec<ParameterRecord>,
    pub candidates: Vec<Candidate>,
    pub proposals: Vec<DiscoveryProposal>,
    pub llm_calls: Vec<LlmCallRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub report_version: u32,
    pub document_id: String,
    pub generated_at: String,
    pub preprocess_mode: PreprocessMode,
    pub parameter_table_version: String,
    pub policy_table_version: String,
    pub page_count: Option<u32>,
    pub extraction_method: Option<String>,
    pub cache_hit: bool,
    pub normalization: NormalizationStats,
    pub multi_experiment: bool,
    pub shared_methods: Option<SharedMethods>,
    pub paper_level: Vec<ParameterRecord>,
    pub experiments: Vec<ExperimentResult>,
    pub warnings: Vec<String>,
}

impl ExtractionReport {
    pub fn record_count(&self) -> usize {
        self.paper_level.len()
            + self
                .experiments
                .iter()
                .map(|experiment| experiment.records.len())
                .sum::<usize>()
    }
}

#[derive(Clone, Copy)]
pub struct LlmContext<'a> {
    pub provider: &'a dyn LlmProvider,
    pub budget: &'a CostBudget,
}

struct ProcessedSections {
    stats: ExtractionStats,
    records: Vec<ParameterRecord>,
    candidates: Vec<Candidate>,
    proposals: Vec<DiscoveryProposal>,
    llm_calls: Vec<LlmCallRecord>,
}

pub struct ExtractionPipeline {
    config: EngineConfig,
    mode: PreprocessMode,
    normalizer: TextNormalizer,
    segmenter: SectionSegmenter,
    detector: ExperimentBoundaryDetector,
    extractor: PatternExtractionEngine,
    resolver: ConflictResolver,
}

impl ExtractionPipeline {
    pub fn new(
        config: EngineConfig,
        primary: ParameterTable,
        fallback: ParameterTable,
        policies: PolicyTable,
        mode: PreprocessMode,
    ) -> Result<Self> {
        let section_preferences = primary.section_preferences();
        Ok(Self {
            normalizer: TextNormalizer::new()?,
            segmenter: SectionSegmenter::new(config.segmentation.clone())?,
            detector: ExperimentBoundaryDetector::new(config.segmentation.clone())?,
            extractor: PatternExtractionEngine::new(primary, fallback)?,
            resolver: ConflictResolver::new(policies).with_section_preferences(section_preferences),
            config,
            mode,
        })
    }

    pub fn mode(&self) -> PreprocessMode {
        self.mode
    }

    pub fn parameter_table_version(&self) -> &str {
        self.extractor.primary().version()
    }

    pub fn policy_table_version(&self) -> &str {
        self.resolver.policies().version()
    }

    pub fn preprocess(&self, document: &DocumentInput) -> Result<Preprocessed> {
        if document.full_text.trim().is_empty() {
            bail!("document has no extractable text");
        }

        let (normalized_text, stats) = match self.mode {
            PreprocessMode::Standard => self.normalizer.normalize(&document.full_text),
            PreprocessMode::Raw => (document.full_text.clone(), NormalizationStats::default()),
        };
        if normalized_text.trim().is_empty() {
            bail!("document has no extractable text after normalization");
        }

        let segmentation = self.segment_paper(&normalized_text, &document.sections);
        Ok(Preprocessed {
            normalized_text,
            stats,
            segmentation,
        })
    }

    fn segment_paper(&self, text: &str, supplied: &BTreeMap<String, String>) -> PaperSegmentation {
        let layout = self.detector.detect(text);
        if !layout.is_multi_experiment() {
            return PaperSegmentation {
                paper_sections: self.segmenter.segment(text, supplied),
                layout,
                experiments: Vec::new(),
            };
        }

        let paper_sections = self
            .segmenter
            .segment(layout.preamble(text), &BTreeMap::new());
        let experiments = self
            .detector
            .experiment_texts(text, &layout)
            .into_iter()
            .map(|experiment| SegmentedExperiment {
                sections: self.segmenter.segment(&experiment.text, &BTreeMap::new()),
                range: experiment.range,
                shared_methods_spliced: experiment.shared_methods_spliced,
                overview_chars_dropped: experiment.overview_chars_dropped,
            })
            .collect();
        PaperSegmentation {
            layout,
            paper_sections,
            experiments,
        }
    }

    pub fn run(
        &self,
        document_id: &str,
        document: &DocumentInput,
        cached: Option<Preprocessed>,
        llm: Option<LlmContext<'_>>,
    ) -> Result<(ExtractionReport, Preprocessed)> {
        let cache_hit = cached.is_some();
        let preprocessed = match cached {
            Some(preprocessed) => preprocessed,
            None => self.preprocess(document)?,
        };
        let text = preprocessed.normalized_text.as_str();
        let extracted_at = now_utc_string();
        let mut warnings = Vec::new();

        let segmentation = &preprocessed.segmentation;
        let layout = &segmentation.layout;
        let multi_experiment = layout.is_multi_experiment();

        let mut paper_level = Vec::new();
        let mut experiments = Vec::new();

        if multi_experiment {
            if !segmentation.paper_sections.is_empty() {
                let processed = self.process_sections(&segmentation.paper_sections, &extracted_at, None);
                paper_level = processed.records;
            }

            for experiment in &segmentation.experiments {
                let processed = self.process_sections(&experiment.sections, &extracted_at, llm);
                experiments.push(experiment_result(
                    &experiment.range,
                    &experiment.sections,
                    experiment.shared_methods_spliced,
                    experiment.overview_chars_dropped,
                    processed,
                ));
            }
        } else {
            let sections = &segmentation.paper_sections;
            let range = ExperimentRange {
                number: 1,
                title: layout
                    .ranges
                    .first()
                    .map(|range| range.title.clone())
                    .unwrap_or_else(|| "Experiment 1".to_string()),
                start_offset: 0,
                end_offset: text.len(),
                has_local_methods: sections.get(SectionKind::Methods).is_some()
                    || sections.get(SectionKind::Participants).is_some(),
            };
            let processed = self.process_sections(sections, &extracted_at, llm);
            experiments.push(experiment_result(&range, sections, false, 0, processed));
        }

        for experiment in &experiments {
            let has_methods = experiment.sections.iter().any(|section| {
                section.kind.is_methods_like() && section.source != SegmentSource::WholeDocument
            });
            if !has_methods {
                warnings.push(format!(
                    "experiment {} has no detected methods section",
                    experiment.number
                ));
            }
            let refused = experiment
                .llm_calls
                .iter()
                .filter(|call| call.outcome == CallOutcome::BudgetRefused)
                .count();
            if refused > 0 {
                warnings.push(format!(
                    "experiment {}: {refused} llm call(s) refused by the budget",
                    experiment.number
                ));
            }
        }
        for warning in &warnings {
            warn!(document_id, warning = %warning, "extraction warning");
        }

        let report = ExtractionReport {
            report_version: REPORT_VERSION,
            document_id: document_id.to_string(),
            generated_at: extracted_at,
            preprocess_mode: self.mode,
            parameter_table_version: self.parameter_table_version().to_string(),
            policy_table_version: self.policy_table_version().to_string(),
            page_count: document.page_count,
            extraction_method: document.extraction_method.clone(),
            cache_hit,
            normalization: preprocessed.stats,
            multi_experiment,
            shared_methods: layout.shared_methods,
            paper_level,
            experiments,
            warnings,
        };

        info!(
            document_id,
            experiments = report.experiments.len(),
            records = report.record_count(),
            paper_level = report.paper_level.len(),
            cache_hit,
            "document extracted"
        );
        Ok((report, preprocessed))
    }

    fn process_sections(
        &self,
        sections: &SegmentedSections,
        extracted_at: &str,
        llm: Option<LlmContext<'_>>,
    ) -> ProcessedSections {
        let extraction = self.extractor.extract_sections(sections, extracted_at);
        let mut candidates = extraction.candidates;
        let mut proposals = Vec::new();
        let mut llm_calls = Vec::new();

        if let Some(context) = llm
            && self.config.llm.enabled
        {
            let engine = LlmAssistedEngine::new(context.provider, context.budget, &self.config.llm);
            let outcome = engine.run(sections, &candidates, self.extractor.primary(), extracted_at);
            candidates.extend(outcome.candidates);
            proposals = outcome.proposals;
            llm_calls = outcome.calls;
        }

        let records = self.resolver.resolve_all(group_by_parameter(candidates.clone()));
        debug!(
            candidates = candidates.len(),
            records = records.len(),
            "sections resolved"
        );

        ProcessedSections {
            stats: extraction.stats,
            records,
            candidates,
            proposals,
            llm_calls,
        }
    }
}

fn experiment_result(
    range: &ExperimentRange,
    sections: &SegmentedSections,
    shared_methods_spliced: bool,
    overview_chars_dropped: usize,
    processed: ProcessedSections,
) -> ExperimentResult {
    ExperimentResult {
        number: range.number,
        title: range.title.clone(),
        start_offset: range.start_offset,
        end_offset: range.end_offset,
        has_local_methods: range.has_local_methods,
        shared_methods_spliced,
        overview_chars_dropped,
        sections: sections
            .segments()
            .map(|segment| SectionSummary {
                kind: segment.kind,
                source: segment.source,
                chars: segment.text.chars().count(),
            })
            .collect(),
        stats: processed.stats,
        records: processed.records,
        candidates: processed.candidates,
        proposals: processed.proposals,
        llm_calls: processed.llm_calls,
    }
}
