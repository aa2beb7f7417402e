//! Demographics agent: sex, ages, survival, vital status, consanguinity.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use super::patterns::{excerpt, insert_best, number_value, to_months, to_years};
use super::traits::{DomainAgent, FieldKind, FieldSpec};
use crate::models::{AgentKind, DocumentSpan, FieldCandidate};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("sex", FieldKind::Text, "\"male\" or \"female\""),
    FieldSpec::new("age", FieldKind::Number, "age at the time of the report, in years"),
    FieldSpec::new("age_at_onset", FieldKind::Number, "age when the first symptoms appeared, in years"),
    FieldSpec::new("age_at_diagnosis", FieldKind::Number, "age when the diagnosis was made, in years"),
    FieldSpec::new("survival_months", FieldKind::Number, "time from onset or diagnosis to death, in months"),
    FieldSpec::new("vital_status", FieldKind::Text, "\"alive\" or \"deceased\""),
    FieldSpec::new("consanguinity", FieldKind::Flag, "whether the parents are related"),
    FieldSpec::new("ethnicity", FieldKind::Text, "ethnic or geographic origin"),
];

const AMOUNT: &str = r"(\d+(?:\.\d+)?)";
const UNIT: &str = r"(years?|yrs?|months?|mo|weeks?|wk|days?)";

static AGE_SEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b{AMOUNT}[-\s]{UNIT}[-\s]old(?:\s+(boy|girl|male|female|man|woman|son|daughter))?\b"
    ))
    .expect("valid regex")
});

static AGED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:aged|current age(?: of| was)?|age:)\s*{AMOUNT}\s*{UNIT}?\b"))
        .expect("valid regex")
});

static SEX_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sex|gender)\s*[:=]\s*(male|female|m|f)\b").expect("valid regex")
});

static SEX_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(boy|girl|man|woman|male|female|son|daughter)\b").expect("valid regex")
});

static ONSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:age at onset(?: of| was|:)?\s*|(?:onset|began|started|first (?:noticed|presented|appeared)|developed)\b[^.]{{0,40}}?\bat(?: the)?(?: age)?(?: of)?\s+){AMOUNT}\s*{UNIT}?"
    ))
    .expect("valid regex")
});

static DIAGNOSIS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:age at diagnosis(?: of| was|:)?\s*|diagnos(?:ed|is)\b[^.]{{0,40}}?\bat(?: the)?(?: age)?(?: of)?\s+){AMOUNT}\s*{UNIT}?"
    ))
    .expect("valid regex")
});

static SURVIVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:(?:died|survived)\s+(?:after|for)|survival(?: time)?(?: of| was|:)?)\s*{AMOUNT}\s*{UNIT}"
    ))
    .expect("valid regex")
});

static VITAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(deceased|died|passed away|still alive|alive|living)\b").expect("valid regex")
});

static CONSANGUINITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(no|without|denied|non-?)\s*)?(consanguineous|consanguinity)\b")
        .expect("valid regex")
});

static ETHNICITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?i:of)\s+([A-Z][a-z]+(?:[\s-][A-Z][a-z]+)?)\s+(?i:descent|origin|ancestry)\b")
        .expect("valid regex")
});

pub struct DemographicsAgent;

impl DemographicsAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DemographicsAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn sex_from_word(word: &str) -> Option<&'static str> {
    match word.to_lowercase().as_str() {
        "boy" | "male" | "man" | "son" | "m" => Some("male"),
        "girl" | "female" | "woman" | "daughter" | "f" => Some("female"),
        _ => None,
    }
}

fn amount(caps: &Captures<'_>, group: usize) -> Option<f64> {
    caps.get(group)?.as_str().parse().ok()
}

fn whole_excerpt(text: &str, caps: &Captures<'_>) -> String {
    caps.get(0)
        .map_or_else(String::new, |m| excerpt(text, m.start(), m.end()))
}

fn insert_age(
    fields: &mut BTreeMap<String, FieldCandidate>,
    name: &str,
    re: &Regex,
    text: &str,
    confidence: f32,
) {
    for caps in re.captures_iter(text) {
        let Some(n) = amount(&caps, 1) else { continue };
        let years = to_years(n, caps.get(2).map(|m| m.as_str()));
        insert_best(
            fields,
            name,
            FieldCandidate::pattern(number_value(years), confidence, &whole_excerpt(text, &caps)),
        );
    }
}

impl DomainAgent for DemographicsAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Demographics
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn extract_patterns(&self, span: &DocumentSpan) -> BTreeMap<String, FieldCandidate> {
        let text = span.text.as_str();
        let mut fields = BTreeMap::new();

        for caps in AGE_SEX_RE.captures_iter(text) {
            let found = whole_excerpt(text, &caps);
            if let Some(n) = amount(&caps, 1) {
                let years = to_years(n, caps.get(2).map(|m| m.as_str()));
                insert_best(&mut fields, "age", FieldCandidate::pattern(number_value(years), 0.9, &found));
            }
            if let Some(sex) = caps.get(3).and_then(|m| sex_from_word(m.as_str())) {
                insert_best(&mut fields, "sex", FieldCandidate::pattern(Value::from(sex), 0.95, &found));
            }
        }
        insert_age(&mut fields, "age", &AGED_RE, text, 0.85);

        for caps in SEX_LABEL_RE.captures_iter(text) {
            if let Some(sex) = caps.get(1).and_then(|m| sex_from_word(m.as_str())) {
                let found = whole_excerpt(text, &caps);
                insert_best(&mut fields, "sex", FieldCandidate::pattern(Value::from(sex), 0.95, &found));
            }
        }
        if !fields.contains_key("sex") {
            if let Some(m) = SEX_WORD_RE.find(text) {
                if let Some(sex) = sex_from_word(m.as_str()) {
                    let found = excerpt(text, m.start(), m.end());
                    insert_best(&mut fields, "sex", FieldCandidate::pattern(Value::from(sex), 0.7, &found));
                }
            }
        }

        insert_age(&mut fields, "age_at_onset", &ONSET_RE, text, 0.8);
        insert_age(&mut fields, "age_at_diagnosis", &DIAGNOSIS_RE, text, 0.8);

        for caps in SURVIVAL_RE.captures_iter(text) {
            let Some(n) = amount(&caps, 1) else { continue };
            let months = to_months(n, caps.get(2).map(|m| m.as_str()));
            let found = whole_excerpt(text, &caps);
            insert_best(
                &mut fields,
                "survival_months",
                FieldCandidate::pattern(number_value(months), 0.8, &found),
            );
        }

        if let Some(m) = VITAL_RE.find(text) {
            let status = match m.as_str().to_lowercase().as_str() {
                "deceased" | "died" | "passed away" => "deceased",
                _ => "alive",
            };
            let found = excerpt(text, m.start(), m.end());
            insert_best(&mut fields, "vital_status", FieldCandidate::pattern(Value::from(status), 0.8, &found));
        }

        if let Some(caps) = CONSANGUINITY_RE.captures(text) {
            let negated = caps.get(1).is_some();
            let found = whole_excerpt(text, &caps);
            insert_best(
                &mut fields,
                "consanguinity",
                FieldCandidate::pattern(Value::Bool(!negated), 0.9, &found),
            );
        }

        if let Some(caps) = ETHNICITY_RE.captures(text) {
            if let Some(origin) = caps.get(1) {
                let found = whole_excerpt(text, &caps);
                insert_best(
                    &mut fields,
                    "ethnicity",
                    FieldCandidate::pattern(Value::from(origin.as_str()), 0.75, &found),
                );
            }
        }

        fields
    }
}
