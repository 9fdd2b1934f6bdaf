//! Label selector evaluation
//!
//! Compiles an orchestrator `LabelSelector` once and evaluates it against
//! unit labels. An empty selector matches everything.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("unknown selector operator {operator:?} for key {key:?}")]
    UnknownOperator { key: String, operator: String },

    #[error("operator {operator} for key {key:?} needs at least one value")]
    MissingValues { key: String, operator: &'static str },

    #[error("operator {operator} for key {key:?} takes no values")]
    UnexpectedValues { key: String, operator: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => labels.get(key).map_or(true, |v| !values.contains(v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

/// A compiled label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn compile(selector: &LabelSelector) -> Result<Self, SelectorError> {
        let mut requirements: Vec<Requirement> = selector
            .match_labels
            .iter()
            .flatten()
            .map(|(k, v)| Requirement::Equals(k.clone(), v.clone()))
            .collect();

        for expr in selector.match_expressions.iter().flatten() {
            let key = expr.key.clone();
            let values = expr.values.clone().unwrap_or_default();
            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(SelectorError::MissingValues {
                        key,
                        operator: if expr.operator == "In" { "In" } else { "NotIn" },
                    })
                }
                "In" => Requirement::In(key, values),
                "NotIn" => Requirement::NotIn(key, values),
                "Exists" | "DoesNotExist" if !values.is_empty() => {
                    return Err(SelectorError::UnexpectedValues {
                        key,
                        operator: if expr.operator == "Exists" {
                            "Exists"
                        } else {
                            "DoesNotExist"
                        },
                    })
                }
                "Exists" => Requirement::Exists(key),
                "DoesNotExist" => Requirement::DoesNotExist(key),
                other => {
                    return Err(SelectorError::UnknownOperator {
                        key,
                        operator: other.to_string(),
                    })
                }
            };
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expr(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| v.to_string()).collect())
            },
        }
    }

    #[test]
    fn test_match_labels() {
        let selector = Selector::compile(&LabelSelector {
            match_labels: Some(labels(&[("app", "web")])),
            match_expressions: None,
        })
        .unwrap();

        assert!(selector.matches(&labels(&[("app", "web"), ("tier", "front")])));
        assert!(!selector.matches(&labels(&[("app", "api")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_match_expressions() {
        let selector = Selector::compile(&LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                expr("env", "In", &["prod", "staging"]),
                expr("canary", "DoesNotExist", &[]),
                expr("tier", "NotIn", &["batch"]),
            ]),
        })
        .unwrap();

        assert!(selector.matches(&labels(&[("env", "prod")])));
        assert!(selector.matches(&labels(&[("env", "staging"), ("tier", "front")])));
        assert!(!selector.matches(&labels(&[("env", "prod"), ("canary", "true")])));
        assert!(!selector.matches(&labels(&[("env", "prod"), ("tier", "batch")])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = Selector::compile(&LabelSelector::default()).unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[("anything", "goes")])));
    }

    #[test]
    fn test_invalid_expressions() {
        let unknown = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![expr("a", "Near", &["b"])]),
        };
        assert!(matches!(
            Selector::compile(&unknown),
            Err(SelectorError::UnknownOperator { .. })
        ));

        let empty_in = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![expr("a", "In", &[])]),
        };
        assert!(matches!(
            Selector::compile(&empty_in),
            Err(SelectorError::MissingValues { .. })
        ));

        let valued_exists = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![expr("a", "Exists", &["b"])]),
        };
        assert!(matches!(
            Selector::compile(&valued_exists),
            Err(SelectorError::UnexpectedValues { .. })
        ));
    }
}
