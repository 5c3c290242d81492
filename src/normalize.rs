use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("â€™", "'"),
    ("â€˜", "'"),
    ("â€œ", "\""),
    ("â€\u{9d}", "\""),
    ("â€“", "-"),
    ("â€”", "-"),
    ("â€¦", "..."),
    ("Ã—", "×"),
    ("Â±", "±"),
    ("Â°", "°"),
    ("Âµ", "µ"),
    ("\u{fb00}", "ff"),
    ("\u{fb01}", "fi"),
    ("\u{fb02}", "fl"),
    ("\u{fb03}", "ffi"),
    ("\u{fb04}", "ffl"),
    ("\u{2018}", "'"),
    ("\u{2019}", "'"),
    ("\u{201c}", "\""),
    ("\u{201d}", "\""),
    ("\u{2013}", "-"),
    ("\u{2014}", "-"),
    ("\u{2212}", "-"),
    ("\u{00a0}", " "),
    ("\u{2009}", " "),
    ("\u{202f}", " "),
    ("\u{00ad}", ""),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub substitutions: usize,
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub line_numbers_removed: usize,
    pub line_number_prefixes_stripped: usize,
    pub dehyphenation_merges: usize,
}

#[derive(Debug)]
pub struct TextNormalizer {
    line_number_prefix: Regex,
    bare_number_line: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            line_number_prefix: Regex::new(r"^\s*(\d{1,4})\s+(\S.*)$")
                .context("failed to compile line number prefix regex")?,
            bare_number_line: Regex::new(r"^\s*\d{1,4}\s*$")
                .context("failed to compile bare number line regex")?,
        })
    }

    pub fn normalize(&self, text: &str) -> (String, NormalizationStats) {
        let mut stats = NormalizationStats::default();

        let substituted = apply_substitutions(text, &mut stats);
        let pages = substituted
            .split('\u{c}')
            .map(ToOwned::to_owned)
            .collect::<Vec<String>>();
        let pages = strip_page_furniture(pages, &mut stats);

        let mut lines = pages
            .iter()
            .flat_map(|page| page.lines().map(ToOwned::to_owned))
            .collect::<Vec<String>>();

        let before = lines.len();
        lines.retain(|line| !self.bare_number_line.is_match(line));
        stats.line_numbers_removed = before - lines.len();

        self.strip_line_number_prefixes(&mut lines, &mut stats);

        let (merged, merges) = merge_hyphenated_lines(lines);
        stats.dehyphenation_merges = merges;

        (collapse_blank_runs(&merged), stats)
    }

    fn strip_line_number_prefixes(&self, lines: &mut [String], stats: &mut NormalizationStats) {
        let numbered = lines
            .iter()
            .filter_map(|line| {
                self.line_number_prefix
                    .captures(line)
                    .and_then(|captures| captures.get(1))
                    .and_then(|value| value.as_str().parse::<u32>().ok())
            })
            .collect::<Vec<u32>>();

        if numbered.len() < 10 {
            return;
        }

        let increasing = numbered.windows(2).filter(|pair| pair[1] > pair[0]).count();
        if (increasing as f64) < 0.8 * (numbered.len() - 1) as f64 {
            return;
        }

        for line in lines.iter_mut() {
            let stripped = self
                .line_number_prefix
                .captures(line)
                .and_then(|captures| captures.get(2))
                .map(|body| body.as_str().to_string());
            if let Some(body) = stripped {
                *line = body;
                stats.line_number_prefixes_stripped += 1;
            }
        }
    }
}

fn apply_substitutions(text: &str, stats: &mut NormalizationStats) -> String {
    let mut out = text.to_string();
    for (from, to) in SUBSTITUTIONS {
        let count = out.matches(from).count();
        if count > 0 {
            out = out.replace(from, to);
            stats.substitutions += count;
        }
    }
    out
}

fn strip_page_furniture(pages: Vec<String>, stats: &mut NormalizationStats) -> Vec<String> {
    if pages.len() < 3 {
        return pages;
    }

    let header_candidates = detect_repeated_edge_lines(&pages, true);
    let footer_candidates = detect_repeated_edge_lines(&pages, false);

    pages
        .into_iter()
        .map(|page| {
            let mut lines = page
                .lines()
                .map(ToOwned::to_owned)
                .collect::<Vec<String>>();

            if let Some(index) = lines.iter().position(|line| !line.trim().is_empty()) {
                if header_candidates.contains(&normalize_edge_line(&lines[index])) {
                    lines.remove(index);
                    stats.header_lines_removed += 1;
                }
            }

            if let Some(index) = lines.iter().rposition(|line| !line.trim().is_empty()) {
                if footer_candidates.contains(&normalize_edge_line(&lines[index])) {
                    lines.remove(index);
                    stats.footer_lines_removed += 1;
                }
            }

            lines.join("\n")
        })
        .collect()
}

fn detect_repeated_edge_lines(pages: &[String], header: bool) -> HashSet<String> {
    let mut counts = HashMap::<String, usize>::new();
    for page in pages {
        let lines = page.lines().map(str::trim).collect::<Vec<&str>>();
        let candidate = if header {
            lines.iter().copied().find(|line| !line.is_empty())
        } else {
            lines.iter().rev().copied().find(|line| !line.is_empty())
        };

        let Some(candidate) = candidate else {
            continue;
        };

        let normalized = normalize_edge_line(candidate);
        if normalized.is_empty() || normalized.len() > 120 {
            continue;
        }
        *counts.entry(normalized).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(candidate, count)| if count >= 3 { Some(candidate) } else { None })
        .collect()
}

/// Running page numbers differ per page, so digits are masked before comparing.
fn normalize_edge_line(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_ascii_lowercase()
        .chars()
        .map(|character| if character.is_ascii_digit() { '#' } else { character })
        .collect()
}

fn merge_hyphenated_lines(lines: Vec<String>) -> (Vec<String>, usize) {
    let mut merged = Vec::<String>::with_capacity(lines.len());
    let mut merges = 0usize;

    for line in lines {
        let join = merged
            .last()
            .map(|previous: &String| should_merge_hyphenated_pair(previous, &line))
            .unwrap_or(false);

        if join {
            if let Some(previous) = merged.last_mut() {
                let head = previous.trim_end().trim_end_matches('-').to_string();
                *previous = format!("{}{}", head, line.trim_start());
                merges += 1;
                continue;
            }
        }

        merged.push(line);
    }

    (merged, merges)
}

fn should_merge_hyphenated_pair(current: &str, next: &str) -> bool {
    let left = current.trim_end();
    if !left.ends_with('-') {
        return false;
    }

    let starts_with_lowercase = next
        .trim_start()
        .chars()
        .next()
        .map(|character| character.is_lowercase())
        .unwrap_or(false);
    if !starts_with_lowercase {
        return false;
    }

    left.trim_end_matches('-')
        .chars()
        .last()
        .map(|character| character.is_alphabetic())
        .unwrap_or(false)
}

fn collapse_blank_runs(lines: &[String]) -> String {
    let mut out = Vec::<&str>::with_capacity(lines.len());
    let mut blank_run = 0usize;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
            out.push("");
        } else {
            blank_run = 0;
            out.push(trimmed);
        }
    }
    out.join("\n").trim().to_string()
}
