use anyhow::{Context, Result};
use regex::Regex;

use super::headers::{HeaderKind, HeaderPatterns};
use crate::model::SectionKind;

const METHOD_INDICATIVE_TERMS: &str = r"participants?|subjects|recruited|apparatus|stimul(?:i|us)|procedures?|trials?|blocks?|presented|monitor|screen|randomly|counterbalanced|instructed|sessions?|ms|hz|viewing\s+distance|keypress|informed\s+consent|conditions?|between-subjects|within-subjects";

const METHOD_CONTEXT_TERMS: &str = r"experiments?|trials?|participants?|apparatus";

#[derive(Debug)]
pub struct KeywordScanner {
    indicative: Regex,
    context: Regex,
    paragraph_break: Regex,
}

impl KeywordScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            indicative: Regex::new(&format!(r"(?i)\b(?:{METHOD_INDICATIVE_TERMS})\b"))
                .context("failed to compile method indicative term regex")?,
            context: Regex::new(&format!(r"(?i)\b(?:{METHOD_CONTEXT_TERMS})\b"))
                .context("failed to compile method context term regex")?,
            paragraph_break: Regex::new(r"\n\s*\n").context("failed to compile paragraph regex")?,
        })
    }

    pub fn paragraph_score(&self, paragraph: &str) -> usize {
        self.indicative.find_iter(paragraph).count()
    }

    /// One indicative term is enough only alongside a different context word.
    fn is_methods_paragraph(&self, paragraph: &str) -> bool {
        match self.paragraph_score(paragraph) {
            0 => return false,
            1 => {}
            _ => return true,
        }
        let Some(only) = self.indicative.find(paragraph) else {
            return false;
        };
        self.context
            .find_iter(paragraph)
            .any(|context| context.range() != only.range())
    }

    pub fn methods_paragraphs(&self, text: &str) -> Option<String> {
        let kept = self
            .paragraph_break
            .split(text)
            .map(str::trim)
            .filter(|paragraph| !paragraph.is_empty())
            .filter(|paragraph| self.is_methods_paragraph(paragraph))
            .collect::<Vec<&str>>();

        if kept.is_empty() {
            None
        } else {
            Some(kept.join("\n\n"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Introduction,
    Methods,
    Participants,
    Results,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineStateBuffers {
    pub introduction: String,
    pub methods: String,
    pub participants: String,
    pub results: String,
}

pub fn line_state_sections(text: &str, patterns: &HeaderPatterns) -> LineStateBuffers {
    let mut buffers = LineStateBuffers::default();
    let mut state = LineState::Introduction;

    for line in text.lines() {
        if let Some(kind) = patterns.strict_line_kind(line) {
            state = match kind {
                HeaderKind::Section(SectionKind::Methods) | HeaderKind::MethodsSubsection => {
                    LineState::Methods
                }
                HeaderKind::Section(SectionKind::Participants) => LineState::Participants,
                HeaderKind::Section(SectionKind::Results | SectionKind::Discussion) => {
                    LineState::Results
                }
                HeaderKind::Section(_) => LineState::Introduction,
            };
            continue;
        }

        let buffer = match state {
            LineState::Introduction => &mut buffers.introduction,
            LineState::Methods => &mut buffers.methods,
            LineState::Participants => &mut buffers.participants,
            LineState::Results => &mut buffers.results,
        };
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(line);
    }

    buffers.introduction = buffers.introduction.trim().to_string();
    buffers.methods = buffers.methods.trim().to_string();
    buffers.participants = buffers.participants.trim().to_string();
    buffers.results = buffers.results.trim().to_string();
    buffers
}
