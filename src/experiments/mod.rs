use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SegmentationSettings;
use crate::model::{ExperimentRange, SectionKind};
use crate::segment::HeaderPatterns;
use crate::util::floor_char_boundary;

mod numerals;
#[cfg(test)]
mod tests;

pub use numerals::parse_experiment_numeral;

use numerals::{CARDINAL_ALTERNATION, ORDINAL_ALTERNATION};

const METHODS_KINDS: &[SectionKind] = &[SectionKind::Methods, SectionKind::Participants];
const CLOSING_KINDS: &[SectionKind] = &[SectionKind::Results, SectionKind::Discussion];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderForm {
    Numeric,
    CardinalWord,
    OrdinalWord,
    Roman,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderMatch {
    number: u32,
    start: usize,
    title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedMethods {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentLayout {
    pub ranges: Vec<ExperimentRange>,
    pub shared_methods: Option<SharedMethods>,
}

impl ExperimentLayout {
    pub fn is_multi_experiment(&self) -> bool {
        self.ranges.len() >= 2
    }

    pub fn preamble<'a>(&self, text: &'a str) -> &'a str {
        match self.ranges.first() {
            Some(range) => &text[..range.start_offset],
            None => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentText {
    pub range: ExperimentRange,
    pub text: String,
    pub shared_methods_spliced: bool,
    pub overview_chars_dropped: usize,
}

#[derive(Debug)]
pub struct ExperimentBoundaryDetector {
    forms: Vec<(HeaderForm, Regex)>,
    sections: HeaderPatterns,
    settings: SegmentationSettings,
}

impl ExperimentBoundaryDetector {
    pub fn new(settings: SegmentationSettings) -> Result<Self> {
        let prefix = r"(?m)^[ \t]*(?:\d+(?:\.\d+)*\.?[ \t]+)?";
        let forms = vec![
            (
                HeaderForm::Numeric,
                format!(r"{prefix}(?i:experiment)[ \t]+(\d{{1,2}})[a-zA-Z]?\b([^\n]*)$"),
            ),
            (
                HeaderForm::CardinalWord,
                format!(r"{prefix}(?i:experiment[ \t]+({CARDINAL_ALTERNATION}))\b([^\n]*)$"),
            ),
            (
                HeaderForm::OrdinalWord,
                format!(
                    r"{prefix}(?i:(?:the[ \t]+)?({ORDINAL_ALTERNATION})[ \t]+experiment)\b([^\n]*)$"
                ),
            ),
            (
                HeaderForm::Roman,
                format!(r"{prefix}(?:[Ee]xperiment|EXPERIMENT)[ \t]+([IVX]{{1,5}})\b([^\n]*)$"),
            ),
        ];

        let mut compiled = Vec::with_capacity(forms.len());
        for (form, pattern) in forms {
            compiled.push((
                form,
                Regex::new(&pattern)
                    .with_context(|| format!("failed to compile {form:?} experiment header regex"))?,
            ));
        }

        Ok(Self {
            forms: compiled,
            sections: HeaderPatterns::new()?,
            settings,
        })
    }

    pub fn detect(&self, text: &str) -> ExperimentLayout {
        let headers = self.find_experiment_headers(text);
        if headers.is_empty() {
            return ExperimentLayout::default();
        }

        let mut ranges = headers
            .iter()
            .enumerate()
            .map(|(index, header)| {
                let end_offset = headers
                    .get(index + 1)
                    .map(|next| next.start)
                    .unwrap_or(text.len());
                ExperimentRange {
                    number: header.number,
                    title: header.title.clone(),
                    start_offset: header.start,
                    end_offset,
                    has_local_methods: false,
                }
            })
            .collect::<Vec<ExperimentRange>>();

        for range in &mut ranges {
            let body_start = header_line_end(text, range.start_offset).min(range.end_offset);
            range.has_local_methods = self
                .first_section_header(text, body_start, range.end_offset, METHODS_KINDS)
                .is_some();
        }

        let shared_methods = self.find_shared_methods(text, &ranges);
        debug!(
            experiments = ranges.len(),
            shared_methods = shared_methods.is_some(),
            "experiment boundaries detected"
        );

        ExperimentLayout {
            ranges,
            shared_methods,
        }
    }

    pub fn experiment_texts(&self, text: &str, layout: &ExperimentLayout) -> Vec<ExperimentText> {
        layout
            .ranges
            .iter()
            .enumerate()
            .map(|(index, range)| {
                let header_end = header_line_end(text, range.start_offset).min(range.end_offset);
                let header_line = text[range.start_offset..header_end].trim_end();
                let body = &text[header_end..range.end_offset];

                if let Some(shared) = layout.shared_methods.filter(|_| !range.has_local_methods) {
                    let shared_text = text[shared.start..shared.end].trim();
                    return ExperimentText {
                        range: range.clone(),
                        text: format!("{header_line}\n\n{shared_text}\n\n{}", body.trim()),
                        shared_methods_spliced: true,
                        overview_chars_dropped: 0,
                    };
                }

                if index == 0 && layout.shared_methods.is_none() {
                    if let Some(methods_start) =
                        self.first_section_header(text, header_end, range.end_offset, METHODS_KINDS)
                    {
                        let overview = text[header_end..methods_start].trim();
                        if overview.len() > self.settings.overview_drop_min_chars {
                            return ExperimentText {
                                range: range.clone(),
                                text: format!(
                                    "{header_line}\n\n{}",
                                    text[methods_start..range.end_offset].trim()
                                ),
                                shared_methods_spliced: false,
                                overview_chars_dropped: overview.len(),
                            };
                        }
                    }
                }

                ExperimentText {
                    range: range.clone(),
                    text: text[range.start_offset..range.end_offset].trim().to_string(),
                    shared_methods_spliced: false,
                    overview_chars_dropped: 0,
                }
            })
            .collect()
    }

    fn find_experiment_headers(&self, text: &str) -> Vec<HeaderMatch> {
        let mut matches = Vec::<HeaderMatch>::new();

        for (form, regex) in &self.forms {
            for captures in regex.captures_iter(text) {
                let (Some(whole), Some(numeral)) = (captures.get(0), captures.get(1)) else {
                    continue;
                };
                let rest = captures.get(2).map(|value| value.as_str()).unwrap_or_default();

                let line = whole.as_str().trim();
                if line.chars().count() > self.settings.experiment_header_max_line_chars {
                    continue;
                }
                if !rest_looks_like_title(rest) {
                    continue;
                }
                let Some(number) = parse_experiment_numeral(numeral.as_str()) else {
                    debug!(form = ?form, numeral = numeral.as_str(), "unparseable experiment numeral");
                    continue;
                };

                matches.push(HeaderMatch {
                    number,
                    start: whole.start(),
                    title: header_title(rest, number),
                });
            }
        }

        matches.sort_by_key(|header| header.start);

        let mut seen_numbers = HashSet::<u32>::new();
        let mut seen_starts = HashSet::<usize>::new();
        matches
            .into_iter()
            .filter(|header| seen_starts.insert(header.start))
            .filter(|header| seen_numbers.insert(header.number))
            .collect()
    }

    fn find_shared_methods(&self, text: &str, ranges: &[ExperimentRange]) -> Option<SharedMethods> {
        if ranges.len() < 2 {
            return None;
        }
        let first = ranges.first()?;
        let last = ranges.last()?;
        // A trailing methods block only matters to experiments that lack their own.
        if ranges[..ranges.len() - 1]
            .iter()
            .all(|range| range.has_local_methods)
        {
            return None;
        }

        let search_start = header_line_end(text, last.start_offset);
        let window_end = floor_char_boundary(
            text,
            last.start_offset
                .saturating_add(self.settings.shared_methods_search_window),
        );
        // Header filters measure whole lines, so the window never ends mid-line.
        let search_end = header_line_end(text, window_end).max(search_start);

        let start = self.first_section_header(text, search_start, search_end, METHODS_KINDS)?;
        if start <= first.end_offset {
            return None;
        }

        let fallback_end = floor_char_boundary(
            text,
            start.saturating_add(self.settings.shared_methods_fallback_span),
        );
        let end = self
            .first_section_header(text, header_line_end(text, start), text.len(), CLOSING_KINDS)
            .filter(|closing| *closing <= fallback_end)
            .unwrap_or(fallback_end)
            .max(header_line_end(text, start));

        Some(SharedMethods { start, end })
    }

    fn first_section_header(
        &self,
        text: &str,
        from: usize,
        to: usize,
        kinds: &[SectionKind],
    ) -> Option<usize> {
        if from >= to {
            return None;
        }
        self.sections
            .find_section_headers(&text[from..to], kinds, &self.settings)
            .first()
            .map(|hit| from + hit.line_start)
    }
}

fn header_line_end(text: &str, start: usize) -> usize {
    text[start..]
        .find('\n')
        .map(|index| start + index)
        .unwrap_or(text.len())
}

fn rest_looks_like_title(rest: &str) -> bool {
    match rest.trim().chars().next() {
        None => true,
        Some(character) => {
            character.is_uppercase()
                || character.is_ascii_digit()
                || matches!(character, ':' | '.' | '-' | '(' | '—' | '–')
        }
    }
}

fn header_title(rest: &str, number: u32) -> String {
    let title = rest
        .trim()
        .trim_start_matches([':', '.', '-', '—', '–'])
        .trim();
    if title.is_empty() {
        format!("Experiment {number}")
    } else {
        title.to_string()
    }
}
