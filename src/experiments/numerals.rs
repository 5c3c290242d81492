const CARDINAL_WORDS: &[(&str, u32)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
];

const ORDINAL_WORDS: &[(&str, u32)] = &[
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
    ("sixth", 6),
    ("seventh", 7),
    ("eighth", 8),
    ("ninth", 9),
    ("tenth", 10),
    ("eleventh", 11),
    ("twelfth", 12),
];

pub const CARDINAL_ALTERNATION: &str =
    "one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve";
pub const ORDINAL_ALTERNATION: &str =
    "first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth|eleventh|twelfth";

pub fn parse_experiment_numeral(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.chars().all(|character| character.is_ascii_digit()) {
        return trimmed.parse::<u32>().ok().filter(|value| *value > 0);
    }

    let lower = trimmed.to_ascii_lowercase();
    if let Some((_, value)) = CARDINAL_WORDS
        .iter()
        .chain(ORDINAL_WORDS.iter())
        .find(|(word, _)| *word == lower)
    {
        return Some(*value);
    }

    parse_roman(trimmed)
}

/// Uppercase Roman numerals in canonical subtractive form only.
pub fn parse_roman(raw: &str) -> Option<u32> {
    let is_roman = raw
        .chars()
        .all(|character| matches!(character, 'I' | 'V' | 'X' | 'L' | 'C'));
    if raw.is_empty() || !is_roman {
        return None;
    }

    let digit = |character: char| match character {
        'I' => 1,
        'V' => 5,
        'X' => 10,
        'L' => 50,
        _ => 100,
    };

    let values = raw.chars().map(digit).collect::<Vec<i64>>();
    let mut total = 0i64;
    for (index, value) in values.iter().enumerate() {
        match values.get(index + 1) {
            Some(next) if next > value => total -= value,
            _ => total += value,
        }
    }

    let total = u32::try_from(total).ok()?;
    if total > 0 && to_roman(total) == raw {
        Some(total)
    } else {
        None
    }
}

fn to_roman(mut value: u32) -> String {
    const TABLE: &[(u32, &str)] = &[
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];

    let mut out = String::new();
    for (amount, glyph) in TABLE {
        while value >= *amount {
            out.push_str(glyph);
            value -= amount;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numerals_normalize_across_forms() {
        let cases = [
            ("3", Some(3)),
            ("12", Some(12)),
            ("0", None),
            ("Two", Some(2)),
            ("third", Some(3)),
            ("IV", Some(4)),
            ("IX", Some(9)),
            ("XII", Some(12)),
            ("IIII", None),
            ("iv", None),
            ("banana", None),
        ];

        for (raw, expected) in cases {
            assert_eq!(parse_experiment_numeral(raw), expected, "numeral {raw}");
        }
    }
}
