//! Genetics agent: HGVS variants, exon, gene symbol, zygosity, inheritance.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::patterns::{excerpt, insert_best};
use super::traits::{DomainAgent, FieldKind, FieldSpec};
use crate::models::{AgentKind, DocumentSpan, FieldCandidate};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("gene", FieldKind::Text, "HGNC gene symbol carrying the variant"),
    FieldSpec::new("nucleotide_change", FieldKind::Text, "HGVS coding change, e.g. c.845_846delCT"),
    FieldSpec::new("protein_change", FieldKind::Text, "HGVS protein change, e.g. p.Arg282Trp"),
    FieldSpec::new("type", FieldKind::Text, "substitution, deletion, duplication, insertion or delins"),
    FieldSpec::new("exon", FieldKind::Number, "exon number"),
    FieldSpec::new("zygosity", FieldKind::Text, "homozygous, heterozygous, hemizygous, compound heterozygous or mosaic"),
    FieldSpec::new("inheritance", FieldKind::Text, "inheritance mode or de novo"),
];

/// Capitalised tokens that look like gene symbols but never are.
const GENE_STOPWORDS: &[&str] = &[
    "DNA", "RNA", "MRI", "EEG", "ECG", "EKG", "EMG", "CT", "PCR", "NGS", "WES", "WGS", "HPO", "OMIM",
    "ACMG", "CSF", "CNS", "PNS", "ICU", "NICU", "PICU", "ASD", "ADHD", "BMI", "HIV", "USA", "IQ",
    "ENT", "MDT", "GCS", "SSRI", "IVIG",
];

/// "in X" / "of X" only names a gene near a variant, or when X has a digit.
const VARIANT_WINDOW: usize = 80;

static HGVS_CODING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bc\.[-*]?\d+(?:[+-]\d+)?(?:_[-*]?\d+(?:[+-]\d+)?)?(?:[ACGT]>[ACGT]|delins[ACGT]+|del[ACGT]*|dup[ACGT]*|ins[ACGT]+)",
    )
    .expect("valid regex")
});

static HGVS_PROTEIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bp\.\(?[A-Z](?:[a-z]{2})?\d+(?:_[A-Z](?:[a-z]{2})?\d+)?(?:[A-Z](?:[a-z]{2})?|\*|=|fs\*?\d*|del|dup|ins[A-Za-z]*)*")
        .expect("valid regex")
});

static EXON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bexon\s+(\d+)\b").expect("valid regex"));

static GENE_NAMED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Z0-9]{1,9})\s+(?i:gene)\b|\b(?i:gene)\s+([A-Z][A-Z0-9]{1,9})\b")
        .expect("valid regex")
});

static GENE_MUTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Z0-9]{1,9})\s+(?i:mutations?|variants?)\b").expect("valid regex")
});

static GENE_PREPOSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:in|of)\s+([A-Z][A-Z0-9]{1,9})\b").expect("valid regex")
});

static ZYGOSITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(compound heterozygo(?:us|te)|homozygo(?:us|te)|heterozygo(?:us|te)|hemizygo(?:us|te)|mosaic(?:ism)?)\b",
    )
    .expect("valid regex")
});

static INHERITANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(autosomal[\s-]dominant|autosomal[\s-]recessive|x-linked(?:\s+(?:dominant|recessive))?|de novo|mitochondrial|maternally inherited|paternally inherited)\b",
    )
    .expect("valid regex")
});

pub struct GeneticsAgent;

impl GeneticsAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeneticsAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Variant class from the HGVS operation.
pub fn variant_type(hgvs: &str) -> &'static str {
    if hgvs.contains('>') {
        "substitution"
    } else if hgvs.contains("delins") {
        "delins"
    } else if hgvs.contains("del") {
        "deletion"
    } else if hgvs.contains("dup") {
        "duplication"
    } else {
        "insertion"
    }
}

fn is_gene_symbol(candidate: &str) -> bool {
    !GENE_STOPWORDS.contains(&candidate)
        && (candidate.len() >= 3 || candidate.chars().any(|c| c.is_ascii_digit()))
}

/// One value stays scalar, several become an array.
fn scalar_or_list(values: Vec<String>) -> Value {
    if values.len() == 1 {
        Value::String(values.into_iter().next().unwrap_or_default())
    } else {
        Value::Array(values.into_iter().map(Value::String).collect())
    }
}

fn first_gene(
    re: &Regex,
    text: &str,
    accept: impl Fn(&regex::Match) -> bool,
) -> Option<(String, usize, usize)> {
    re.captures_iter(text).find_map(|caps| {
        let m = caps.get(1).or_else(|| caps.get(2))?;
        (is_gene_symbol(m.as_str()) && accept(&m)).then(|| (m.as_str().to_string(), m.start(), m.end()))
    })
}

fn near_variant(text: &str, m: &regex::Match) -> bool {
    HGVS_CODING_RE
        .find_iter(text)
        .chain(HGVS_PROTEIN_RE.find_iter(text))
        .any(|v| v.start() <= m.end() + VARIANT_WINDOW && m.start() <= v.end() + VARIANT_WINDOW)
}

impl DomainAgent for GeneticsAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Genetics
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn extract_patterns(&self, span: &DocumentSpan) -> BTreeMap<String, FieldCandidate> {
        let text = span.text.as_str();
        let mut fields = BTreeMap::new();

        let mut variants: Vec<String> = Vec::new();
        let mut first_variant_excerpt = String::new();
        for m in HGVS_CODING_RE.find_iter(text) {
            if variants.iter().any(|v| v == m.as_str()) {
                continue;
            }
            if variants.is_empty() {
                first_variant_excerpt = excerpt(text, m.start(), m.end());
            }
            variants.push(m.as_str().to_string());
        }
        if !variants.is_empty() {
            let types: Vec<String> = variants.iter().map(|v| variant_type(v).to_string()).collect();
            fields.insert(
                "nucleotide_change".to_string(),
                FieldCandidate::pattern(scalar_or_list(variants), 0.95, &first_variant_excerpt),
            );
            fields.insert(
                "type".to_string(),
                FieldCandidate::pattern(scalar_or_list(types), 0.9, &first_variant_excerpt),
            );
        }

        let mut proteins: Vec<String> = Vec::new();
        let mut protein_excerpt = String::new();
        for m in HGVS_PROTEIN_RE.find_iter(text) {
            // Predicted changes are written "p.(Arg862Trp)"
            let change = if m.as_str().starts_with("p.(") {
                format!("{})", m.as_str())
            } else {
                m.as_str().to_string()
            };
            if proteins.contains(&change) {
                continue;
            }
            if proteins.is_empty() {
                protein_excerpt = excerpt(text, m.start(), m.end());
            }
            proteins.push(change);
        }
        if !proteins.is_empty() {
            fields.insert(
                "protein_change".to_string(),
                FieldCandidate::pattern(scalar_or_list(proteins), 0.95, &protein_excerpt),
            );
        }

        if let Some(caps) = EXON_RE.captures(text) {
            if let (Some(whole), Ok(exon)) = (caps.get(0), caps[1].parse::<u32>()) {
                insert_best(
                    &mut fields,
                    "exon",
                    FieldCandidate::pattern(Value::from(exon), 0.9, &excerpt(text, whole.start(), whole.end())),
                );
            }
        }

        let gene = first_gene(&GENE_NAMED_RE, text, |_| true)
            .map(|g| (g, 0.85))
            .or_else(|| first_gene(&GENE_MUTATION_RE, text, |_| true).map(|g| (g, 0.8)))
            .or_else(|| {
                first_gene(&GENE_PREPOSITION_RE, text, |m| {
                    m.as_str().chars().any(|c| c.is_ascii_digit()) || near_variant(text, m)
                })
                .map(|g| (g, 0.75))
            });
        if let Some(((symbol, start, end), confidence)) = gene {
            insert_best(
                &mut fields,
                "gene",
                FieldCandidate::pattern(Value::from(symbol), confidence, &excerpt(text, start, end)),
            );
        }

        if let Some(m) = ZYGOSITY_RE.find(text) {
            let lower = m.as_str().to_lowercase();
            let zygosity = if lower.starts_with("compound") {
                "compound heterozygous"
            } else if lower.starts_with("homo") {
                "homozygous"
            } else if lower.starts_with("hetero") {
                "heterozygous"
            } else if lower.starts_with("hemi") {
                "hemizygous"
            } else {
                "mosaic"
            };
            insert_best(
                &mut fields,
                "zygosity",
                FieldCandidate::pattern(Value::from(zygosity), 0.9, &excerpt(text, m.start(), m.end())),
            );
        }

        if let Some(m) = INHERITANCE_RE.find(text) {
            let mode = m.as_str().to_lowercase().replace('-', " ");
            let mode = mode.replace("x linked", "X-linked");
            insert_best(
                &mut fields,
                "inheritance",
                FieldCandidate::pattern(Value::from(mode), 0.85, &excerpt(text, m.start(), m.end())),
            );
        }

        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(text: &str) -> BTreeMap<String, FieldCandidate> {
        let span = DocumentSpan {
            patient_label: "Patient 1".into(),
            text: text.into(),
            start_offset: 0,
            end_offset: text.len(),
        };
        GeneticsAgent::new().extract_patterns(&span)
    }

    #[test]
    fn deletion_in_exon() {
        let fields = extract("c.845_846delCT mutation in exon 8");
        assert_eq!(fields["type"].value, json!("deletion"));
        assert_eq!(fields["exon"].value, json!(8));
        assert_eq!(fields["nucleotide_change"].value, json!("c.845_846delCT"));
    }

    #[test]
    fn variant_classes() {
        assert_eq!(variant_type("c.100A>G"), "substitution");
        assert_eq!(variant_type("c.100_102delinsT"), "delins");
        assert_eq!(variant_type("c.100dup"), "duplication");
        assert_eq!(variant_type("c.100_101insAT"), "insertion");
    }

    #[test]
    fn gene_protein_zygosity_inheritance() {
        let fields = extract(
            "A heterozygous de novo c.2589+3A>T variant in SCN1A (p.Arg862Trp) was identified by WES.",
        );
        assert_eq!(fields["gene"].value, json!("SCN1A"));
        assert_eq!(fields["protein_change"].value, json!("p.Arg862Trp"));
        assert_eq!(fields["zygosity"].value, json!("heterozygous"));
        assert_eq!(fields["inheritance"].value, json!("de novo"));
        assert_eq!(fields["type"].value, json!("substitution"));
    }

    #[test]
    fn compound_heterozygous_is_not_plain_heterozygous() {
        let fields = extract("She was compound heterozygous for c.100A>G and c.250delA in the POLG gene.");
        assert_eq!(fields["zygosity"].value, json!("compound heterozygous"));
        assert_eq!(fields["nucleotide_change"].value, json!(["c.100A>G", "c.250delA"]));
        assert_eq!(fields["type"].value, json!(["substitution", "deletion"]));
        assert_eq!(fields["gene"].value, json!("POLG"));
        assert_eq!(fields["gene"].confidence, 0.85);
    }

    #[test]
    fn technique_acronyms_are_not_genes() {
        let fields = extract("Diagnosis was confirmed in DNA from blood by PCR.");
        assert!(!fields.contains_key("gene"));
    }

    #[test]
    fn clinical_acronyms_after_prepositions_are_not_genes() {
        for text in [
            "Protein was raised on analysis of CSF.",
            "She was admitted in ICU for three days.",
            "He met the criteria of ASD at age 4.",
            "Seizures were treated in NEURO clinic.",
        ] {
            assert!(!extract(text).contains_key("gene"), "{text}");
        }
    }

    #[test]
    fn preposition_gene_needs_digit_or_nearby_variant() {
        let fields = extract("Sequencing of TTN found c.1000A>G.");
        assert_eq!(fields["gene"].value, json!("TTN"));
        assert_eq!(fields["gene"].confidence, 0.75);

        let fields = extract("Biallelic loss of MECP2 function was suspected.");
        assert_eq!(fields["gene"].value, json!("MECP2"));
    }

    #[test]
    fn autosomal_inheritance_is_normalized() {
        let fields = extract("The family showed autosomal-recessive inheritance.");
        assert_eq!(fields["inheritance"].value, json!("autosomal recessive"));
    }
}
