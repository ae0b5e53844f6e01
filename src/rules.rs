//! Targeting rule matching.
//!
//! Everything here is a pure function of the rules, the context, and the sharder, so it is safe
//! to call from any number of threads at once.
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{
    definition::{TargetingRule, Value},
    sharder::Sharder,
    AttributeValue, EvaluationContext,
};

/// Return the first rule matching `context`, together with its position.
///
/// `None` means no rule matched and the caller must serve the flag default.
pub fn find_matching_rule<'a>(
    rules: &'a [TargetingRule],
    salt: &str,
    context: &EvaluationContext,
    sharder: &impl Sharder,
) -> Option<(usize, &'a TargetingRule)> {
    rules
        .iter()
        .enumerate()
        .find(|(_, rule)| rule.matches(salt, context, sharder))
}

impl TargetingRule {
    /// A rule matches when all of its conditions do. A rule without conditions matches everyone.
    pub fn matches(&self, salt: &str, context: &EvaluationContext, sharder: &impl Sharder) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.matches(salt, context, sharder))
    }
}

/// A single predicate over the evaluation context.
///
/// Conditions referencing an attribute the context does not carry never match (with the
/// exception of `IS_NULL`, which tests for exactly that).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "operator", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    Equals {
        attribute: String,
        value: Value,
    },
    NotEquals {
        attribute: String,
        value: Value,
    },
    OneOf {
        attribute: String,
        values: Vec<Value>,
    },
    NotOneOf {
        attribute: String,
        values: Vec<Value>,
    },
    /// Numeric range `min <= attribute < max`. A missing bound is unbounded.
    Range {
        attribute: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Gt {
        attribute: String,
        value: Value,
    },
    Gte {
        attribute: String,
        value: Value,
    },
    Lt {
        attribute: String,
        value: Value,
    },
    Lte {
        attribute: String,
        value: Value,
    },
    Matches {
        attribute: String,
        pattern: String,
    },
    NotMatches {
        attribute: String,
        pattern: String,
    },
    /// `value: true` matches a missing or null attribute, `value: false` a present one.
    IsNull {
        attribute: String,
        value: bool,
    },
    /// Percentage rollout: matches iff `bucket_of(salt, subject_id) < percentage / 100`.
    Rollout {
        percentage: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Condition {
    pub fn matches(&self, salt: &str, context: &EvaluationContext, sharder: &impl Sharder) -> bool {
        let attribute = |name: &str| match context.get(name) {
            Some(AttributeValue::Null) | None => None,
            Some(value) => Some(value),
        };

        match self {
            Self::Equals { attribute: name, value } => {
                attribute(name).is_some_and(|attr| value_matches(attr, value))
            }
            Self::NotEquals { attribute: name, value } => {
                attribute(name).is_some_and(|attr| !value_matches(attr, value))
            }
            Self::OneOf { attribute: name, values } => attribute(name)
                .is_some_and(|attr| values.iter().any(|value| value_matches(attr, value))),
            Self::NotOneOf { attribute: name, values } => attribute(name)
                .is_some_and(|attr| !values.iter().any(|value| value_matches(attr, value))),
            Self::Range {
                attribute: name,
                min,
                max,
            } => attribute(name).and_then(as_number).is_some_and(|n| {
                min.map_or(true, |min| n >= min) && max.map_or(true, |max| n < max)
            }),
            Self::Gt { attribute: name, value } => {
                compare(attribute(name), value, Comparison::Gt)
            }
            Self::Gte { attribute: name, value } => {
                compare(attribute(name), value, Comparison::Gte)
            }
            Self::Lt { attribute: name, value } => {
                compare(attribute(name), value, Comparison::Lt)
            }
            Self::Lte { attribute: name, value } => {
                compare(attribute(name), value, Comparison::Lte)
            }
            Self::Matches { attribute: name, pattern } => {
                regex_matches(attribute(name), pattern).unwrap_or(false)
            }
            Self::NotMatches { attribute: name, pattern } => {
                regex_matches(attribute(name), pattern).is_some_and(|matches| !matches)
            }
            Self::IsNull { attribute: name, value } => attribute(name).is_none() == *value,
            Self::Rollout { percentage } => {
                sharder.bucket_of(salt, context.subject_id()) < percentage / 100.0
            }
        }
    }
}

/// Equality between an attribute and a condition value. Numbers and booleans also match their
/// string representation, so `42` matches `"42"` and `true` matches `"true"`.
fn value_matches(attribute: &AttributeValue, value: &Value) -> bool {
    match (attribute, value) {
        (AttributeValue::String(a), Value::String(v)) => a == v,
        (AttributeValue::Number(a), Value::Number(v)) => a == v,
        (AttributeValue::Boolean(a), Value::Boolean(v)) => a == v,
        (AttributeValue::Number(a), Value::String(v)) => v.parse::<f64>().is_ok_and(|v| *a == v),
        (AttributeValue::Boolean(a), Value::String(v)) => a.to_string() == *v,
        _ => false,
    }
}

fn as_number(attribute: &AttributeValue) -> Option<f64> {
    match attribute {
        AttributeValue::Number(n) => Some(*n),
        AttributeValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn regex_matches(attribute: Option<&AttributeValue>, pattern: &str) -> Option<bool> {
    let s = match attribute {
        Some(AttributeValue::String(s)) => s,
        _ => return None,
    };
    // Patterns are checked when definitions are published, so this only fails on a snapshot
    // that bypassed validation.
    let regex = Regex::new(pattern).ok()?;
    Some(regex.is_match(s))
}

/// Ordered comparison. Uses semver when the condition value parses as a version, numeric
/// comparison otherwise. Returns `false` when the operands cannot be compared.
fn compare(attribute: Option<&AttributeValue>, value: &Value, comparison: Comparison) -> bool {
    try_compare(attribute, value, comparison).unwrap_or(false)
}

fn try_compare(
    attribute: Option<&AttributeValue>,
    value: &Value,
    comparison: Comparison,
) -> Option<bool> {
    let condition_version = match value {
        Value::String(s) => Version::parse(s).ok(),
        _ => None,
    };

    if let Some(condition_version) = condition_version {
        let attribute_version = match attribute {
            Some(AttributeValue::String(s)) => Version::parse(s).ok(),
            _ => None,
        }?;
        return Some(ordered(&attribute_version, &condition_version, comparison));
    }

    let condition_value = match value {
        Value::Number(n) => *n,
        Value::String(s) => s.parse().ok()?,
        Value::Boolean(_) => return None,
    };
    let attribute_value = as_number(attribute?)?;

    Some(ordered(&attribute_value, &condition_value, comparison))
}

fn ordered<T: PartialOrd>(attribute: &T, condition: &T, comparison: Comparison) -> bool {
    match comparison {
        Comparison::Gt => attribute > condition,
        Comparison::Gte => attribute >= condition,
        Comparison::Lt => attribute < condition,
        Comparison::Lte => attribute <= condition,
    }
}
