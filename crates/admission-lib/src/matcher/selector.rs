//! Label selector evaluation

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};

/// Why a selector could not be compiled
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("selector requirement has an empty key")]
    EmptyKey,

    #[error("unknown selector operator '{0}'")]
    UnknownOperator(String),

    #[error("operator {operator} on key '{key}' requires values")]
    MissingValues { key: String, operator: String },

    #[error("operator {operator} on key '{key}' must not have values")]
    UnexpectedValues { key: String, operator: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operator {
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: Operator,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match &self.operator {
            Operator::In(values) => value.map(|v| values.contains(v)).unwrap_or(false),
            Operator::NotIn(values) => value.map(|v| !values.contains(v)).unwrap_or(true),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// A validated label selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSelector {
    requirements: Vec<Requirement>,
}

impl CompiledSelector {
    pub fn compile(selector: &LabelSelector) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();

        for (key, value) in selector.match_labels.iter().flatten() {
            if key.is_empty() {
                return Err(SelectorError::EmptyKey);
            }
            requirements.push(Requirement {
                key: key.clone(),
                operator: Operator::In(BTreeSet::from([value.clone()])),
            });
        }

        for expression in selector.match_expressions.iter().flatten() {
            if expression.key.is_empty() {
                return Err(SelectorError::EmptyKey);
            }
            let values: BTreeSet<String> = expression.values.iter().flatten().cloned().collect();
            let missing = || SelectorError::MissingValues {
                key: expression.key.clone(),
                operator: expression.operator.clone(),
            };
            let unexpected = || SelectorError::UnexpectedValues {
                key: expression.key.clone(),
                operator: expression.operator.clone(),
            };

            let operator = match expression.operator.as_str() {
                "In" if values.is_empty() => return Err(missing()),
                "NotIn" if values.is_empty() => return Err(missing()),
                "In" => Operator::In(values),
                "NotIn" => Operator::NotIn(values),
                "Exists" if !values.is_empty() => return Err(unexpected()),
                "DoesNotExist" if !values.is_empty() => return Err(unexpected()),
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => return Err(SelectorError::UnknownOperator(other.to_string())),
            };
            requirements.push(Requirement {
                key: expression.key.clone(),
                operator,
            });
        }

        Ok(Self { requirements })
    }

    /// An empty selector matches every label set
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Number of requirements, used to rank competing policies
    pub fn specificity(&self) -> usize {
        self.requirements.len()
    }
}
