//! Helpers shared by the pattern half of every agent.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::models::FieldCandidate;

/// Longest excerpt kept as provenance.
const MAX_EXCERPT_CHARS: usize = 200;

/// Longest phrase (in words) accepted as a list item.
const MAX_ITEM_WORDS: usize = 6;

static LIST_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*(?:,|;|\band/or\b|\bas well as\b|\band\b|\bor\b|\bplus\b)\s*")
        .expect("valid regex")
});

static LEADING_ARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:a|an|the|his|her|their|both)\s+").expect("valid regex"));

static NEGATED_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:no|not|never|without|absence of|absent|denied|normal)\b")
        .expect("valid regex")
});

/// Truncate the sentence-level text around a match for provenance.
pub fn excerpt(text: &str, start: usize, end: usize) -> String {
    let sentence_start = text[..start]
        .rfind(|c: char| c == '.' || c == '\n')
        .map_or(0, |i| i + 1);
    let sentence_end = text[end..]
        .find(|c: char| c == '.' || c == '\n')
        .map_or(text.len(), |i| end + i + 1);
    let sentence = text[sentence_start..sentence_end].trim();

    if sentence.chars().count() <= MAX_EXCERPT_CHARS {
        sentence.to_string()
    } else {
        let truncated: String = sentence.chars().take(MAX_EXCERPT_CHARS - 3).collect();
        format!("{truncated}...")
    }
}

/// Split an enumeration ("seizures, ataxia and hypotonia") into items.
///
/// Negated items are dropped, leading articles stripped, over-long phrases
/// discarded. `stop_at` truncates each item at the first trailing clause.
pub fn split_list(raw: &str, stop_at: &Regex) -> Vec<String> {
    LIST_SEPARATOR_RE
        .split(raw)
        .filter_map(|item| {
            let item = item.trim();
            if item.is_empty() || NEGATED_ITEM_RE.is_match(item) {
                return None;
            }
            let item = match stop_at.find(item) {
                Some(m) => &item[..m.start()],
                None => item,
            };
            let item = LEADING_ARTICLE_RE.replace(item.trim(), "");
            let item = item.trim_matches(|c: char| !c.is_alphanumeric() && c != ')');
            let words = item.split_whitespace().count();
            if words == 0 || words > MAX_ITEM_WORDS {
                return None;
            }
            Some(item.to_string())
        })
        .collect()
}

/// Convert an age expressed with a unit into years.
pub fn to_years(amount: f64, unit: Option<&str>) -> f64 {
    let unit = unit.unwrap_or("year").to_lowercase();
    let years = if unit.starts_with("month") || unit == "mo" {
        amount / 12.0
    } else if unit.starts_with("week") || unit == "wk" {
        amount / 52.0
    } else if unit.starts_with("day") {
        amount / 365.0
    } else {
        amount
    };
    (years * 100.0).round() / 100.0
}

/// Convert a duration expressed with a unit into months.
pub fn to_months(amount: f64, unit: Option<&str>) -> f64 {
    let unit = unit.unwrap_or("month").to_lowercase();
    let months = if unit.starts_with("year") {
        amount * 12.0
    } else if unit.starts_with("week") {
        amount / 4.345
    } else if unit.starts_with("day") {
        amount / 30.44
    } else {
        amount
    };
    (months * 10.0).round() / 10.0
}

/// JSON number, integral when possible.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Keep the higher-confidence candidate when a pattern fires twice.
/// On a tie the earlier hit stays.
pub fn insert_best(fields: &mut BTreeMap<String, FieldCandidate>, name: &str, candidate: FieldCandidate) {
    match fields.get(name) {
        Some(existing) if existing.confidence >= candidate.confidence => {}
        _ => {
            fields.insert(name.to_string(), candidate);
        }
    }
}

/// Append items to a list field, skipping case-insensitive duplicates.
pub fn push_list_items(
    fields: &mut BTreeMap<String, FieldCandidate>,
    name: &str,
    items: Vec<String>,
    confidence: f32,
    excerpt: &str,
) {
    if items.is_empty() {
        return;
    }
    let entry = fields
        .entry(name.to_string())
        .or_insert_with(|| FieldCandidate::pattern(Value::Array(vec![]), confidence, excerpt));

    if let Value::Array(existing) = &mut entry.value {
        for item in items {
            let duplicate = existing
                .iter()
                .any(|v| v.as_str().is_some_and(|s| s.eq_ignore_ascii_case(&item)));
            if !duplicate {
                existing.push(Value::String(item));
            }
        }
    }
    if !entry.source_excerpt.contains(excerpt) && entry.source_excerpt.len() < MAX_EXCERPT_CHARS {
        entry.source_excerpt = format!("{} | {}", entry.source_excerpt, excerpt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_stop() -> Regex {
        Regex::new(r"\bat age\b").unwrap()
    }

    #[test]
    fn splits_enumeration() {
        let items = split_list("seizures, ataxia and a mild hypotonia", &no_stop());
        assert_eq!(items, vec!["seizures", "ataxia", "mild hypotonia"]);
    }

    #[test]
    fn drops_negated_items() {
        let items = split_list("microcephaly, no cardiac defects and without hearing loss", &no_stop());
        assert_eq!(items, vec!["microcephaly"]);
    }

    #[test]
    fn truncates_trailing_clause() {
        let items = split_list("febrile seizures at age 2", &no_stop());
        assert_eq!(items, vec!["febrile seizures"]);
    }

    #[test]
    fn drops_long_phrases() {
        let items = split_list("a very long clause that is clearly not a phenotype term at all", &no_stop());
        assert!(items.is_empty());
    }

    #[test]
    fn unit_conversion() {
        assert_eq!(to_years(18.0, Some("months")), 1.5);
        assert_eq!(to_years(7.0, None), 7.0);
        assert_eq!(to_months(2.0, Some("years")), 24.0);
        assert_eq!(to_months(5.0, Some("month")), 5.0);
    }

    #[test]
    fn number_value_prefers_integers() {
        assert_eq!(number_value(8.0), Value::from(8));
        assert_eq!(number_value(1.5), Value::from(1.5));
    }

    #[test]
    fn excerpt_is_the_sentence() {
        let text = "Family history was negative. She had a c.100A>G change. Parents are healthy.";
        let start = text.find("c.100").unwrap();
        assert_eq!(excerpt(text, start, start + 8), "She had a c.100A>G change.");
    }

    #[test]
    fn insert_best_keeps_higher_confidence() {
        let mut fields = BTreeMap::new();
        insert_best(&mut fields, "age", FieldCandidate::pattern(Value::from(5), 0.8, "a"));
        insert_best(&mut fields, "age", FieldCandidate::pattern(Value::from(6), 0.7, "b"));
        insert_best(&mut fields, "age", FieldCandidate::pattern(Value::from(7), 0.9, "c"));
        assert_eq!(fields["age"].value, Value::from(7));
    }

    #[test]
    fn list_items_deduplicate() {
        let mut fields = BTreeMap::new();
        push_list_items(&mut fields, "phenotypes", vec!["Seizures".into()], 0.6, "x");
        push_list_items(&mut fields, "phenotypes", vec!["seizures".into(), "ataxia".into()], 0.6, "y");
        assert_eq!(fields["phenotypes"].value, serde_json::json!(["Seizures", "ataxia"]));
        assert_eq!(fields["phenotypes"].source_excerpt, "x | y");
    }
}
