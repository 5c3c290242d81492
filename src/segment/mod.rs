use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SegmentationSettings;
use crate::model::{Segment, SectionKind, SegmentSource};

mod fallback;
mod headers;
#[cfg(test)]
mod tests;

pub use headers::{HeaderKind, HeaderPatterns};

use fallback::{KeywordScanner, line_state_sections};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentedSections {
    segments: BTreeMap<SectionKind, Segment>,
}

impl SegmentedSections {
    pub fn get(&self, kind: SectionKind) -> Option<&Segment> {
        self.segments.get(&kind)
    }

    pub fn text(&self, kind: SectionKind) -> Option<&str> {
        self.segments.get(&kind).map(|segment| segment.text.as_str())
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub fn kinds(&self) -> Vec<SectionKind> {
        self.segments.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn text_len(&self, kind: SectionKind) -> usize {
        self.text(kind).map(|text| text.trim().len()).unwrap_or(0)
    }

    fn insert(&mut self, segment: Segment) {
        self.segments.insert(segment.kind, segment);
    }

    /// Methods and participants spans concatenate; other kinds keep their first span.
    fn append(&mut self, kind: SectionKind, text: &str, source: SegmentSource) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        match self.segments.get_mut(&kind) {
            Some(existing) if kind.is_methods_like() => {
                existing.text.push_str("\n\n");
                existing.text.push_str(text);
            }
            Some(_) => {}
            None => {
                self.segments.insert(
                    kind,
                    Segment {
                        kind,
                        text: text.to_string(),
                        source,
                    },
                );
            }
        }
    }
}

impl FromIterator<Segment> for SegmentedSections {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        let mut sections = SegmentedSections::default();
        for segment in iter {
            sections.append(segment.kind, &segment.text, segment.source);
        }
        sections
    }
}

#[derive(Debug)]
pub struct SectionSegmenter {
    patterns: HeaderPatterns,
    keywords: KeywordScanner,
    settings: SegmentationSettings,
}

impl SectionSegmenter {
    pub fn new(settings: SegmentationSettings) -> Result<Self> {
        Ok(Self {
            patterns: HeaderPatterns::new()?,
            keywords: KeywordScanner::new()?,
            settings,
        })
    }

    pub fn patterns(&self) -> &HeaderPatterns {
        &self.patterns
    }

    pub fn settings(&self) -> &SegmentationSettings {
        &self.settings
    }

    pub fn segment(&self, text: &str, supplied: &BTreeMap<String, String>) -> SegmentedSections {
        if let Some(sections) = supplied_sections(supplied) {
            debug!(kinds = sections.len(), "using supplied sections");
            return sections;
        }

        let mut sections = self.segment_by_headers(text);
        let detected_any = !sections.is_empty();

        if sections.text_len(SectionKind::Methods) < self.settings.methods_min_chars {
            self.apply_keyword_fallback(text, &mut sections);
        }
        if sections.text_len(SectionKind::Methods) < self.settings.methods_min_chars {
            self.apply_line_fallback(text, &mut sections);
        }

        if !detected_any && sections.get(SectionKind::Methods).is_none() && !text.trim().is_empty()
        {
            debug!("no sections detected, treating whole document as methods");
            sections.insert(Segment {
                kind: SectionKind::Methods,
                text: text.trim().to_string(),
                source: SegmentSource::WholeDocument,
            });
        }

        sections
    }

    fn segment_by_headers(&self, text: &str) -> SegmentedSections {
        let hits = self.patterns.find_headers(text, &self.settings);
        let mut spans = Vec::<(SectionKind, usize, usize)>::new();
        let mut current: Option<(SectionKind, usize)> = None;
        let mut in_methods_region = false;

        for hit in hits {
            match hit.kind {
                HeaderKind::MethodsSubsection => {
                    if !in_methods_region {
                        continue;
                    }
                    match current {
                        Some((SectionKind::Methods, _)) => {}
                        Some((kind, start)) => {
                            spans.push((kind, start, hit.line_start));
                            current = Some((SectionKind::Methods, hit.line_start));
                        }
                        None => current = Some((SectionKind::Methods, hit.line_start)),
                    }
                }
                HeaderKind::Section(kind) => {
                    match current {
                        Some((previous, start)) => spans.push((previous, start, hit.line_start)),
                        None if hit.line_start > 0 => {
                            spans.push((SectionKind::Other, 0, hit.line_start))
                        }
                        None => {}
                    }
                    current = Some((kind, hit.line_start));
                    in_methods_region = kind.is_methods_like();
                }
            }
        }

        if let Some((kind, start)) = current {
            spans.push((kind, start, text.len()));
        }

        let mut sections = SegmentedSections::default();
        for (kind, start, end) in spans {
            sections.append(kind, &text[start..end], SegmentSource::DetectedByHeader);
        }
        sections
    }

    fn apply_keyword_fallback(&self, text: &str, sections: &mut SegmentedSections) {
        let Some(paragraphs) = self.keywords.methods_paragraphs(text) else {
            return;
        };
        if paragraphs.trim().len() > sections.text_len(SectionKind::Methods) {
            debug!(chars = paragraphs.len(), "methods recovered by keyword density");
            sections.insert(Segment {
                kind: SectionKind::Methods,
                text: paragraphs,
                source: SegmentSource::KeywordFallback,
            });
        }
    }

    fn apply_line_fallback(&self, text: &str, sections: &mut SegmentedSections) {
        let buffers = line_state_sections(text, &self.patterns);

        if buffers.methods.len() > sections.text_len(SectionKind::Methods) {
            debug!(chars = buffers.methods.len(), "methods recovered by line state scan");
            sections.insert(Segment {
                kind: SectionKind::Methods,
                text: buffers.methods,
                source: SegmentSource::LineFallback,
            });
        }
        if sections.get(SectionKind::Participants).is_none() && !buffers.participants.is_empty() {
            sections.insert(Segment {
                kind: SectionKind::Participants,
                text: buffers.participants,
                source: SegmentSource::LineFallback,
            });
        }
    }
}

fn supplied_sections(supplied: &BTreeMap<String, String>) -> Option<SegmentedSections> {
    let mut sections = SegmentedSections::default();
    for (label, text) in supplied {
        if let Some(kind) = SectionKind::from_label(label) {
            sections.append(kind, text, SegmentSource::Supplied);
        }
    }

    if sections.len() >= 2 {
        Some(sections)
    } else {
        None
    }
}
