use serde::{Deserialize, Serialize};

use crate::util::{ceil_char_boundary, floor_char_boundary};

pub const CONTEXT_RADIUS: usize = 50;

const BASE_SCORE: f64 = 0.6;
const UNIT_BONUS: f64 = 0.25;
const STRONG_OVERLAP_BONUS: f64 = 0.2;
const WEAK_OVERLAP_BONUS: f64 = 0.1;
const STRONG_VERB_BONUS: f64 = 0.05;
const HEDGE_PENALTY: f64 = 0.1;
const BARE_NUMBER_CAP: f64 = 0.6;

const STRONG_VERBS: &[&str] = &[
    "was",
    "were",
    "consisted",
    "performed",
    "comprised",
    "included",
    "completed",
];

const HEDGES: &[&str] = &[
    "approximately",
    "about",
    "roughly",
    "around",
    "approx",
    "nearly",
    "almost",
    "circa",
    "estimated",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitFamily {
    Count,
    Time,
    Frequency,
    Angle,
    Distance,
    Percent,
    Luminance,
    Sound,
}

impl UnitFamily {
    fn tokens(self) -> &'static [&'static str] {
        match self {
            UnitFamily::Count => &[
                "participants",
                "participant",
                "subjects",
                "subject",
                "observers",
                "volunteers",
                "students",
                "trials",
                "trial",
                "blocks",
                "block",
                "items",
                "sessions",
                "groups",
                "conditions",
                "children",
                "adults",
            ],
            UnitFamily::Time => &[
                "ms",
                "msec",
                "millisecond",
                "milliseconds",
                "sec",
                "secs",
                "second",
                "seconds",
                "min",
                "minute",
                "minutes",
                "years",
                "yrs",
            ],
            UnitFamily::Frequency => &["hz", "khz", "hertz"],
            UnitFamily::Angle => &["deg", "degree", "degrees", "°", "arcmin"],
            UnitFamily::Distance => &["cm", "mm", "inches", "inch", "centimetres", "centimeters"],
            UnitFamily::Percent => &["%", "percent", "pct"],
            UnitFamily::Luminance => &["cd", "candela", "lux", "nits"],
            UnitFamily::Sound => &["db", "decibels", "spl"],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub window: &'a str,
    pub parameter: &'a str,
    pub keywords: &'a [String],
    pub raw_value: &'a str,
    pub matched: &'a str,
    pub unit_family: Option<UnitFamily>,
}

pub fn score_match_context(context: &MatchContext<'_>) -> f64 {
    let tokens = tokenize(context.window);
    let mut score = BASE_SCORE;

    let unit_hit = context
        .unit_family
        .is_some_and(|family| tokens.iter().any(|token| family.tokens().contains(&token.as_str())));
    if unit_hit {
        score += UNIT_BONUS;
    }

    let overlap = keyword_overlap(&tokens, context.parameter, context.keywords);
    if overlap >= 2 {
        score += STRONG_OVERLAP_BONUS;
    } else if overlap == 1 {
        score += WEAK_OVERLAP_BONUS;
    }

    if tokens.iter().any(|token| STRONG_VERBS.contains(&token.as_str())) {
        score += STRONG_VERB_BONUS;
    }
    if tokens.iter().any(|token| HEDGES.contains(&token.as_str())) {
        score -= HEDGE_PENALTY;
    }

    if !unit_hit && overlap == 0 && is_bare_number(context.matched, context.raw_value) {
        score = score.min(BARE_NUMBER_CAP);
    }

    score.clamp(0.5, 1.0)
}

pub fn context_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let from = floor_char_boundary(text, start.saturating_sub(radius));
    let to = ceil_char_boundary(text, end.saturating_add(radius));
    &text[from..to]
}

fn keyword_overlap(tokens: &[String], parameter: &str, keywords: &[String]) -> usize {
    let mut terms = parameter
        .split(|character: char| !character.is_alphanumeric())
        .filter(|term| term.len() >= 3)
        .map(str::to_lowercase)
        .collect::<Vec<String>>();
    for keyword in keywords {
        let keyword = keyword.to_lowercase();
        if !terms.contains(&keyword) {
            terms.push(keyword);
        }
    }

    terms
        .iter()
        .filter(|term| tokens.iter().any(|token| same_stem(token, term)))
        .count()
}

fn same_stem(token: &str, term: &str) -> bool {
    if token.len() < 3 {
        return false;
    }
    token == term
        || token.strip_suffix('s') == Some(term)
        || term.strip_suffix('s') == Some(token)
}

fn is_bare_number(matched: &str, raw_value: &str) -> bool {
    let matched = matched.trim();
    let candidate = if matched.is_empty() { raw_value.trim() } else { matched };
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|character| character.is_ascii_digit() || matches!(character, '.' | ',' | ' '))
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for character in text.chars() {
        if character.is_alphanumeric() {
            current.extend(character.to_lowercase());
            continue;
        }
        if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        if matches!(character, '%' | '°') {
            tokens.push(character.to_string());
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    split_number_unit_tokens(tokens)
}

fn split_number_unit_tokens(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        let digits = token
            .char_indices()
            .take_while(|(_, character)| character.is_ascii_digit())
            .last()
            .map(|(index, character)| index + character.len_utf8());
        match digits {
            Some(split) if split < token.len() => {
                out.push(token[..split].to_string());
                out.push(token[split..].to_string());
            }
            _ => out.push(token),
        }
    }
    out
}
