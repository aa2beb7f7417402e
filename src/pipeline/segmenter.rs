//! PatientSegmenter: splits a case report into per-patient spans.
//!
//! Marker families are tried in order; the first family with at least one
//! marker owns the whole document. A marker only counts when it opens a
//! sentence or line, so in-text references ("similar to Patient 1") do not
//! cut a span. Text before the first marker belongs to the first span, and
//! a label that reappears later stays inside the span that is open.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::models::DocumentSpan;

/// Label of the single span produced when no marker is found.
pub const IMPLICIT_PATIENT_LABEL: &str = "Patient 1";

/// Share of control / replacement characters above which text is unreadable.
const UNREADABLE_RATIO: f32 = 0.2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    #[error("Document text is empty")]
    EmptyText,

    #[error("Document text is unreadable: {0}")]
    Unreadable(String),
}

struct MarkerFamily {
    name: &'static str,
    regex: Regex,
}

static MARKER_FAMILIES: LazyLock<Vec<MarkerFamily>> = LazyLock::new(|| {
    vec![
        MarkerFamily {
            name: "patient",
            // A letter id needs a separator, so "PATIENTS" is not "Patient S".
            regex: Regex::new(
                r"\b(Patient|PATIENT)(?:(?:\s*(?:No\.?|#)\s*|\s+)([A-Z]\d*)|(?:\s*(?:No\.?|#))?\s*(\d+))\b",
            )
            .expect("valid regex"),
        },
        MarkerFamily {
            name: "case",
            regex: Regex::new(r"\b(Case|CASE)\s*(?:No\.?\s*|#\s*)?(\d+)\b").expect("valid regex"),
        },
        MarkerFamily {
            name: "subject",
            regex: Regex::new(r"\b(Subject|SUBJECT)\s*#?\s*([A-Za-z]*-?\d+|[A-Z])\b")
                .expect("valid regex"),
        },
        MarkerFamily {
            name: "proband",
            regex: Regex::new(r"\b(Proband|Individual)\s+([IVX]+[-:.]\d+|\d+)\b")
                .expect("valid regex"),
        },
    ]
});

#[derive(Debug, Clone)]
struct Marker {
    start: usize,
    label: String,
}

pub struct PatientSegmenter;

impl PatientSegmenter {
    pub fn new() -> Self {
        Self
    }

    /// Split `text` into ordered, non-overlapping spans covering all of it.
    pub fn segment(&self, text: &str) -> Result<Vec<DocumentSpan>, SegmentationError> {
        check_readable(text)?;

        for family in MARKER_FAMILIES.iter() {
            let markers = find_markers(family, text);
            if markers.is_empty() {
                continue;
            }
            tracing::debug!(
                family = family.name,
                markers = markers.len(),
                "Segmenting document on explicit patient markers"
            );
            return Ok(build_spans(text, &markers));
        }

        tracing::debug!("No patient markers found, using one implicit span");
        Ok(vec![DocumentSpan {
            patient_label: IMPLICIT_PATIENT_LABEL.to_string(),
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
        }])
    }
}

impl Default for PatientSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

fn check_readable(text: &str) -> Result<(), SegmentationError> {
    if text.trim().is_empty() {
        return Err(SegmentationError::EmptyText);
    }

    let total = text.chars().count();
    let garbage = text
        .chars()
        .filter(|c| *c == '\u{FFFD}' || (c.is_control() && !c.is_whitespace()))
        .count();
    let ratio = garbage as f32 / total as f32;
    if ratio > UNREADABLE_RATIO {
        return Err(SegmentationError::Unreadable(format!(
            "{:.0}% control or replacement characters",
            ratio * 100.0
        )));
    }
    Ok(())
}

/// A marker opens a span only at a sentence or line boundary.
fn at_boundary(text: &str, start: usize) -> bool {
    match text[..start].trim_end().chars().last() {
        None => true,
        Some(c) => !(c.is_lowercase() || matches!(c, ',' | '(' | '&' | '-' | '/')),
    }
}

fn find_markers(family: &MarkerFamily, text: &str) -> Vec<Marker> {
    let mut markers: Vec<Marker> = Vec::new();
    let mut seen = HashSet::new();
    for caps in family.regex.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if !at_boundary(text, whole.start()) {
            continue;
        }
        let word = caps.get(1).map_or("", |m| m.as_str());
        let id = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        let label = format!("{} {}", title_case(word), id);

        // A label seen before continues the current span: one span per patient.
        if !seen.insert(label.clone()) {
            continue;
        }
        markers.push(Marker {
            start: whole.start(),
            label,
        });
    }
    markers
}

fn build_spans(text: &str, markers: &[Marker]) -> Vec<DocumentSpan> {
    markers
        .iter()
        .enumerate()
        .map(|(i, marker)| {
            let start = if i == 0 { 0 } else { marker.start };
            let end = markers.get(i + 1).map_or(text.len(), |next| next.start);
            DocumentSpan {
                patient_label: marker.label.clone(),
                text: text[start..end].to_string(),
                start_offset: start,
                end_offset: end,
            }
        })
        .collect()
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
