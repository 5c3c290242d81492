use anyhow::{Context, Result};
use regex::Regex;

use crate::config::SegmentationSettings;
use crate::model::SectionKind;

const SECTION_HEADER_WORDS: &[(SectionKind, &str)] = &[
    (SectionKind::Abstract, r"abstract|summary"),
    (SectionKind::Introduction, r"introduction|background"),
    (
        SectionKind::Methods,
        r"materials?\s+and\s+methods?|methods?\s+and\s+materials?|general\s+methods?|experimental\s+(?:methods?|design|procedures?)|methodology|methods?",
    ),
    (
        SectionKind::Participants,
        r"participants|subjects|observers|sample\s+characteristics",
    ),
    (SectionKind::Results, r"results(?:\s+and\s+discussion)?|findings"),
    (
        SectionKind::Discussion,
        r"general\s+discussion|discussion|conclusions?|concluding\s+remarks",
    ),
];

const METHODS_SUBSECTION_WORDS: &str = r"apparatus|materials|stimuli|stimulus\s+materials|procedures?|design|task\s+description|tasks?|equipment|measures|instruments|setup|data\s+analys[ie]s|statistical\s+analys[ie]s";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Section(SectionKind),
    MethodsSubsection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderHit {
    pub kind: HeaderKind,
    pub start: usize,
    pub end: usize,
    pub line_start: usize,
    pub line_end: usize,
}

#[derive(Debug)]
pub struct HeaderPatterns {
    sections: Vec<(SectionKind, Regex)>,
    subsection: Regex,
    strict_sections: Vec<(SectionKind, Regex)>,
    strict_subsection: Regex,
}

impl HeaderPatterns {
    pub fn new() -> Result<Self> {
        let mut sections = Vec::with_capacity(SECTION_HEADER_WORDS.len());
        let mut strict_sections = Vec::with_capacity(SECTION_HEADER_WORDS.len());
        for (kind, words) in SECTION_HEADER_WORDS {
            sections.push((
                *kind,
                Regex::new(&format!(r"(?i)\b(?:{words})\b"))
                    .with_context(|| format!("failed to compile {kind} header regex"))?,
            ));
            strict_sections.push((
                *kind,
                Regex::new(&strict_line_pattern(words))
                    .with_context(|| format!("failed to compile strict {kind} header regex"))?,
            ));
        }

        Ok(Self {
            sections,
            subsection: Regex::new(&format!(r"(?i)\b(?:{METHODS_SUBSECTION_WORDS})\b"))
                .context("failed to compile methods subsection regex")?,
            strict_subsection: Regex::new(&strict_line_pattern(METHODS_SUBSECTION_WORDS))
                .context("failed to compile strict methods subsection regex")?,
            strict_sections,
        })
    }

    pub fn find_headers(&self, text: &str, settings: &SegmentationSettings) -> Vec<HeaderHit> {
        let mut hits = Vec::<HeaderHit>::new();

        for (kind, regex) in &self.sections {
            for found in regex.find_iter(text) {
                if let Some(hit) =
                    accept_header(text, found.start(), found.end(), HeaderKind::Section(*kind), settings)
                {
                    hits.push(hit);
                }
            }
        }

        for found in self.subsection.find_iter(text) {
            if let Some(hit) = accept_header(
                text,
                found.start(),
                found.end(),
                HeaderKind::MethodsSubsection,
                settings,
            ) {
                hits.push(hit);
            }
        }

        hits.sort_by(|left, right| {
            left.start
                .cmp(&right.start)
                .then_with(|| {
                    matches!(left.kind, HeaderKind::MethodsSubsection)
                        .cmp(&matches!(right.kind, HeaderKind::MethodsSubsection))
                })
                .then_with(|| (right.end - right.start).cmp(&(left.end - left.start)))
        });

        let mut deduped = Vec::<HeaderHit>::with_capacity(hits.len());
        for hit in hits {
            // One header per line; the first (longest, non-subsection) hit wins.
            if deduped
                .last()
                .is_some_and(|previous: &HeaderHit| previous.line_start == hit.line_start)
            {
                continue;
            }
            deduped.push(hit);
        }
        deduped
    }

    pub fn find_section_headers(
        &self,
        text: &str,
        kinds: &[SectionKind],
        settings: &SegmentationSettings,
    ) -> Vec<HeaderHit> {
        self.find_headers(text, settings)
            .into_iter()
            .filter(|hit| match hit.kind {
                HeaderKind::Section(kind) => kinds.contains(&kind),
                HeaderKind::MethodsSubsection => false,
            })
            .collect()
    }

    pub fn strict_line_kind(&self, line: &str) -> Option<HeaderKind> {
        for (kind, regex) in &self.strict_sections {
            if regex.is_match(line) {
                return Some(HeaderKind::Section(*kind));
            }
        }
        if self.strict_subsection.is_match(line) {
            return Some(HeaderKind::MethodsSubsection);
        }
        None
    }
}

fn strict_line_pattern(words: &str) -> String {
    format!(r"(?i)^\s*(?:(?:\d+(?:\.\d+)*|[IVX]+)[.)]?\s+)?(?:{words})\s*[:.]?\s*$")
}

fn accept_header(
    text: &str,
    start: usize,
    end: usize,
    kind: HeaderKind,
    settings: &SegmentationSettings,
) -> Option<HeaderHit> {
    let line_start = text[..start].rfind('\n').map(|index| index + 1).unwrap_or(0);
    let line_end = text[start..]
        .find('\n')
        .map(|index| start + index)
        .unwrap_or(text.len());

    let prefix = &text[line_start..start];
    if prefix.chars().count() > settings.header_max_line_offset {
        return None;
    }
    if !prefix.chars().all(is_numbering_character) {
        return None;
    }

    let line = text[line_start..line_end].trim();
    if line.chars().count() >= settings.header_max_line_chars {
        return None;
    }

    Some(HeaderHit {
        kind,
        start,
        end,
        line_start,
        line_end,
    })
}

fn is_numbering_character(character: char) -> bool {
    character.is_whitespace()
        || character.is_ascii_digit()
        || matches!(character, '.' | ')' | '(' | 'I' | 'V' | 'X' | '#' | '*' | '§')
}
