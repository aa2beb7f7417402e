use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field} value: {value}")]
pub struct InvalidEnum {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnum;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(AgentKind {
    Demographics => "demographics",
    Genetics => "genetics",
    Phenotypes => "phenotypes",
    Treatments => "treatments",
});

impl AgentKind {
    /// Fixed agent order, also used as the last-resort merge order.
    pub fn all() -> &'static [AgentKind] {
        &[
            Self::Demographics,
            Self::Genetics,
            Self::Phenotypes,
            Self::Treatments,
        ]
    }
}

str_enum!(ExtractionSource {
    Pattern => "pattern",
    Llm => "llm",
});

str_enum!(MatchMethod {
    Exact => "exact",
    Synonym => "synonym",
    Fuzzy => "fuzzy",
    Semantic => "semantic",
    None => "none",
});

str_enum!(NormalizationStatus {
    NotApplicable => "not_applicable",
    Matched => "matched",
    Partial => "partial",
    Unmatched => "unmatched",
});

str_enum!(ValidationStatus {
    Pending => "pending",
    Valid => "valid",
    Flagged => "flagged",
});

str_enum!(Vocabulary {
    Hpo => "hpo",
    Hgnc => "hgnc",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn agent_kind_round_trips_through_str() {
        for kind in AgentKind::all() {
            assert_eq!(AgentKind::from_str(kind.as_str()).unwrap(), *kind);
        }
    }

    #[test]
    fn serde_names_match_as_str() {
        let json = serde_json::to_string(&MatchMethod::Synonym).unwrap();
        assert_eq!(json, "\"synonym\"");
        let status: NormalizationStatus = serde_json::from_str("\"unmatched\"").unwrap();
        assert_eq!(status, NormalizationStatus::Unmatched);
    }

    #[test]
    fn unknown_value_is_rejected() {
        let err = Vocabulary::from_str("mesh").unwrap_err();
        assert_eq!(err.field, "Vocabulary");
        assert_eq!(err.value, "mesh");
    }
}
