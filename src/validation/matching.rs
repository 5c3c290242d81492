use std::collections::BTreeMap;

use rapidfuzz::distance::jaro_winkler;

pub const NUMERIC_RELATIVE_TOLERANCE: f64 = 0.01;
pub const FUZZY_THRESHOLD: f64 = 0.92;
pub const CONTAINMENT_MIN_CHARS: usize = 4;

const TRUE_SPELLINGS: &[&str] = &["true", "yes", "y", "1", "present", "used"];
const FALSE_SPELLINGS: &[&str] = &["false", "no", "n", "0", "absent", "none", "not used"];

pub fn normalize_value(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .trim_end_matches(['.', ';', ','])
        .to_lowercase()
}

fn parse_numeric(normalized: &str) -> Option<f64> {
    let mut tokens = normalized.split_whitespace();
    let first = tokens.next()?.replace(',', "");
    let (number, glued_unit) = split_glued_unit(&first);
    let value = number.parse::<f64>().ok()?;
    if !glued_unit.chars().all(char::is_alphabetic) {
        return None;
    }
    if tokens.all(|token| token.chars().all(|character| character.is_alphabetic() || character == '%')) {
        Some(value)
    } else {
        None
    }
}

fn split_glued_unit(token: &str) -> (&str, &str) {
    let split = token
        .char_indices()
        .find(|(_, character)| character.is_alphabetic() || *character == '%')
        .map(|(index, _)| index)
        .unwrap_or(token.len());
    let (number, unit) = token.split_at(split);
    (number, unit.trim_start_matches('%'))
}

fn parse_boolean(normalized: &str) -> Option<bool> {
    if TRUE_SPELLINGS.contains(&normalized) {
        Some(true)
    } else if FALSE_SPELLINGS.contains(&normalized) {
        Some(false)
    } else {
        None
    }
}

fn numbers_agree(left: f64, right: f64) -> bool {
    let scale = left.abs().max(right.abs());
    (left - right).abs() <= scale * NUMERIC_RELATIVE_TOLERANCE
}

fn tokens(normalized: &str) -> Vec<&str> {
    normalized
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}

fn token_containment(left: &str, right: &str) -> bool {
    contained_in(left, right) || contained_in(right, left)
}

fn contained_in(needle: &str, haystack: &str) -> bool {
    if needle.chars().count() < CONTAINMENT_MIN_CHARS {
        return false;
    }
    let needle = tokens(needle);
    let haystack = tokens(haystack);
    !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|window| window == needle.as_slice())
}

#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    surfaces: BTreeMap<String, BTreeMap<String, String>>,
}

impl SynonymTable {
    pub fn from_groups(groups: BTreeMap<String, BTreeMap<String, Vec<String>>>) -> Self {
        let mut surfaces = BTreeMap::new();
        for (parameter, canonicals) in groups {
            let entry = surfaces
                .entry(parameter)
                .or_insert_with(BTreeMap::<String, String>::new);
            for (canonical, forms) in canonicals {
                let canonical_key = normalize_value(&canonical);
                entry.insert(canonical_key.clone(), canonical_key.clone());
                for form in forms {
                    entry.insert(normalize_value(&form), canonical_key.clone());
                }
            }
        }
        Self { surfaces }
    }

    fn canonical<'a>(&'a self, parameter: &str, normalized: &'a str) -> &'a str {
        self.surfaces
            .get(parameter)
            .and_then(|forms| forms.get(normalized))
            .map(String::as_str)
            .unwrap_or(normalized)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValueMatcher {
    synonyms: SynonymTable,
}

impl ValueMatcher {
    pub fn new(synonyms: SynonymTable) -> Self {
        Self { synonyms }
    }

    pub fn matches(&self, parameter: &str, left: &str, right: &str) -> bool {
        let left = normalize_value(left);
        let right = normalize_value(right);
        if left == right {
            return true;
        }

        if let (Some(left), Some(right)) = (parse_numeric(&left), parse_numeric(&right)) {
            return numbers_agree(left, right);
        }
        if let (Some(left), Some(right)) = (parse_boolean(&left), parse_boolean(&right)) {
            return left == right;
        }

        let left = self.synonyms.canonical(parameter, &left);
        let right = self.synonyms.canonical(parameter, &right);
        if left == right || token_containment(left, right) {
            return true;
        }

        let similarity = jaro_winkler::similarity(left.chars(), right.chars());
        let reverse = jaro_winkler::similarity(right.chars(), left.chars());
        similarity.min(reverse) >= FUZZY_THRESHOLD
    }
}
