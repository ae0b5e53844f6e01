//! Flag definitions as served by the definition source.
use std::collections::{HashMap, HashSet};

use derive_more::From;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{rules::Condition, DefinitionValidationError};

/// Variant weights of a flag must sum to this value (basis points).
pub const TOTAL_WEIGHT: u64 = 10_000;

/// A full set of flag definitions. This is the payload format of the definition source.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionSet {
    /// Version token of the set, if the source provides one in the body.
    #[serde(default)]
    pub version: Option<String>,
    pub flags: HashMap<String, FlagDefinition>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Boolean,
    Multivariate,
    /// A multivariate flag whose variants are analyzed as an experiment outside of this crate.
    /// Evaluation is identical to [`FlagType::Multivariate`].
    Experiment,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinition {
    pub key: String,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub default_value: Value,
    /// Kill switch. A disabled flag always serves `default_value`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Targeting rules in priority order.
    #[serde(default)]
    pub rules: Vec<TargetingRule>,
    #[serde(default)]
    pub variants: Vec<Variant>,
    /// Hashing salt. Defaults to `key` when absent.
    #[serde(default)]
    pub salt: Option<String>,
    /// Free-form configuration attached to the flag, returned by
    /// [`Client::get_feature`](crate::Client::get_feature).
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl FlagDefinition {
    /// Salt used for bucketing subjects of this flag.
    pub fn salt(&self) -> &str {
        self.salt.as_deref().unwrap_or(&self.key)
    }

    /// Sum of all variant weights.
    pub fn total_weight(&self) -> u64 {
        self.variants.iter().map(|v| u64::from(v.weight)).sum()
    }

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name == name)
    }

    fn validate(&self, entry: &str) -> Result<(), DefinitionValidationError> {
        if self.key.is_empty() || entry.is_empty() {
            return Err(DefinitionValidationError::EmptyFlagKey);
        }
        if self.key != entry {
            return Err(DefinitionValidationError::KeyMismatch {
                entry: entry.to_owned(),
                key: self.key.clone(),
            });
        }

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.is_catch_all() && index + 1 != self.rules.len() {
                return Err(DefinitionValidationError::CatchAllNotLast {
                    flag: self.key.clone(),
                    index,
                });
            }
            for condition in &rule.conditions {
                self.validate_condition(condition)?;
            }
        }

        match self.flag_type {
            FlagType::Boolean => self.validate_boolean(),
            FlagType::Multivariate | FlagType::Experiment => self.validate_variants(),
        }
    }

    fn validate_condition(&self, condition: &Condition) -> Result<(), DefinitionValidationError> {
        match condition {
            Condition::Rollout { percentage } if !(0.0..=100.0).contains(percentage) => {
                Err(DefinitionValidationError::RolloutOutOfRange {
                    flag: self.key.clone(),
                    percentage: *percentage,
                })
            }
            Condition::Range {
                min: Some(min),
                max: Some(max),
                ..
            } if min > max => Err(DefinitionValidationError::InvalidRange {
                flag: self.key.clone(),
            }),
            Condition::Matches { pattern, .. } | Condition::NotMatches { pattern, .. }
                if Regex::new(pattern).is_err() =>
            {
                Err(DefinitionValidationError::InvalidRegex {
                    flag: self.key.clone(),
                    pattern: pattern.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn validate_boolean(&self) -> Result<(), DefinitionValidationError> {
        let mismatch = |detail: &str| DefinitionValidationError::TypeMismatch {
            flag: self.key.clone(),
            detail: detail.to_owned(),
        };

        if !matches!(self.default_value, Value::Boolean(_)) {
            return Err(mismatch("boolean flag needs a boolean default value"));
        }
        for rule in &self.rules {
            match &rule.outcome {
                RuleOutcome::Value(Value::Boolean(_)) => {}
                RuleOutcome::Value(_) => {
                    return Err(mismatch("boolean flag rule serves a non-boolean value"))
                }
                RuleOutcome::Variants => {
                    return Err(mismatch("boolean flag cannot bucket into variants"))
                }
            }
        }
        Ok(())
    }

    fn validate_variants(&self) -> Result<(), DefinitionValidationError> {
        if self.variants.is_empty() {
            return Err(DefinitionValidationError::NoVariants {
                flag: self.key.clone(),
            });
        }

        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.name.is_empty() {
                return Err(DefinitionValidationError::EmptyVariantName {
                    flag: self.key.clone(),
                });
            }
            if !seen.insert(variant.name.as_str()) {
                return Err(DefinitionValidationError::DuplicateVariant {
                    flag: self.key.clone(),
                    variant: variant.name.clone(),
                });
            }
        }

        let total = self.total_weight();
        if total != TOTAL_WEIGHT {
            return Err(DefinitionValidationError::WeightSum {
                flag: self.key.clone(),
                total,
                expected: TOTAL_WEIGHT,
            });
        }

        if self.flag_type == FlagType::Experiment {
            self.validate_experiment_values()?;
        }

        Ok(())
    }

    /// Every value an experiment can serve must name one of its variants.
    fn validate_experiment_values(&self) -> Result<(), DefinitionValidationError> {
        let literals = self.rules.iter().filter_map(|rule| match &rule.outcome {
            RuleOutcome::Value(value) => Some(value),
            RuleOutcome::Variants => None,
        });

        for value in std::iter::once(&self.default_value).chain(literals) {
            let Value::String(name) = value else {
                return Err(DefinitionValidationError::TypeMismatch {
                    flag: self.key.clone(),
                    detail: "experiment values must be variant names".to_owned(),
                });
            };
            if self.variant(name).is_none() {
                return Err(DefinitionValidationError::UnknownVariant {
                    flag: self.key.clone(),
                    variant: name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl DefinitionSet {
    /// Check every definition. The first problem found rejects the whole set.
    pub fn validate(&self) -> Result<(), DefinitionValidationError> {
        validate_flags(&self.flags)
    }

    /// Decode a definition set from its JSON wire format.
    pub fn from_json(bytes: &[u8]) -> Result<DefinitionSet, DefinitionValidationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub(crate) fn validate_flags(
    flags: &HashMap<String, FlagDefinition>,
) -> Result<(), DefinitionValidationError> {
    flags
        .iter()
        .try_for_each(|(entry, flag)| flag.validate(entry))
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetingRule {
    /// Conjunction of conditions. An empty list matches everyone.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub outcome: RuleOutcome,
}

impl TargetingRule {
    pub fn is_catch_all(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// What a matching rule serves.
///
/// On the wire, a literal is `{"value": true}` and bucketing is the string `"variants"`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum RuleOutcome {
    Value(Value),
    /// Bucket the subject into the flag's variants by weight.
    Variants,
}

impl<T: Into<Value>> From<T> for RuleOutcome {
    fn from(value: T) -> Self {
        Self::Value(value.into())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub name: String,
    /// Share of subjects in basis points of [`TOTAL_WEIGHT`].
    pub weight: u32,
    /// Free-form data handed to the caller together with the variant.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Scalar flag value.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}


#[cfg(test)]
mod tests {
    use std::{fs::File, io::BufReader};

    use super::{
        test_helpers::{boolean_flag, catch_all, experiment, rollout, rule},
        DefinitionSet, FlagType, RuleOutcome, Value,
    };
    use crate::{rules::Condition, DefinitionValidationError};

    fn set_of(flags: Vec<super::FlagDefinition>) -> DefinitionSet {
        DefinitionSet {
            version: None,
            flags: flags.into_iter().map(|f| (f.key.clone(), f)).collect(),
        }
    }

    #[test]
    fn parse_definitions_fixture() {
        let f = File::open("tests/data/definitions-v1.json")
            .expect("Failed to open tests/data/definitions-v1.json");
        let set: DefinitionSet = serde_json::from_reader(BufReader::new(f)).unwrap();

        set.validate().unwrap();
        assert_eq!(set.version.as_deref(), Some("1"));

        let new_ui = &set.flags["new-ui"];
        assert_eq!(new_ui.flag_type, FlagType::Boolean);
        assert_eq!(new_ui.salt(), "new-ui");
        assert_eq!(new_ui.rules.len(), 2);
        assert_eq!(new_ui.rules[0].conditions, vec![rollout(30.0)]);
        assert_eq!(new_ui.rules[1].outcome, RuleOutcome::Value(false.into()));

        let checkout = &set.flags["checkout-flow"];
        assert_eq!(checkout.total_weight(), 10_000);
        assert_eq!(checkout.rules[0].outcome, RuleOutcome::Variants);
    }

    #[test]
    fn salt_defaults_to_key() {
        let mut flag = boolean_flag("flag", vec![]);
        assert_eq!(flag.salt(), "flag");
        flag.salt = Some("custom".to_owned());
        assert_eq!(flag.salt(), "custom");
    }

    #[test]
    fn accepts_well_formed_set() {
        let set = set_of(vec![
            boolean_flag(
                "new-ui",
                vec![rule(vec![rollout(30.0)], true), catch_all(false.into())],
            ),
            experiment("checkout", &[("control", 5_000), ("treatment", 5_000)]),
        ]);
        assert_eq!(set.validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_weight_sum() {
        let set = set_of(vec![experiment(
            "checkout",
            &[("control", 5_000), ("treatment", 4_000)],
        )]);
        assert_eq!(
            set.validate(),
            Err(DefinitionValidationError::WeightSum {
                flag: "checkout".to_owned(),
                total: 9_000,
                expected: 10_000,
            })
        );
    }

    #[test]
    fn rejects_catch_all_before_last() {
        let set = set_of(vec![boolean_flag(
            "flag",
            vec![catch_all(false.into()), rule(vec![rollout(10.0)], true)],
        )]);
        assert_eq!(
            set.validate(),
            Err(DefinitionValidationError::CatchAllNotLast {
                flag: "flag".to_owned(),
                index: 0
            })
        );
    }

    #[test]
    fn rejects_empty_and_mismatched_keys() {
        let mut set = set_of(vec![boolean_flag("", vec![])]);
        assert_eq!(set.validate(), Err(DefinitionValidationError::EmptyFlagKey));

        set = set_of(vec![boolean_flag("a", vec![])]);
        let flag = set.flags.remove("a").unwrap();
        set.flags.insert("b".to_owned(), flag);
        assert!(matches!(
            set.validate(),
            Err(DefinitionValidationError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_and_missing_variants() {
        let set = set_of(vec![experiment("e", &[("a", 5_000), ("a", 5_000)])]);
        assert!(matches!(
            set.validate(),
            Err(DefinitionValidationError::DuplicateVariant { .. })
        ));

        let set = set_of(vec![experiment("e", &[])]);
        assert!(matches!(
            set.validate(),
            Err(DefinitionValidationError::NoVariants { .. })
        ));
    }

    #[test]
    fn rejects_type_mismatches() {
        let set = set_of(vec![boolean_flag("flag", vec![catch_all("yes".into())])]);
        assert!(matches!(
            set.validate(),
            Err(DefinitionValidationError::TypeMismatch { .. })
        ));

        let set = set_of(vec![boolean_flag("flag", vec![catch_all(RuleOutcome::Variants)])]);
        assert!(matches!(
            set.validate(),
            Err(DefinitionValidationError::TypeMismatch { .. })
        ));

        let mut flag = experiment("e", &[("a", 10_000)]);
        flag.default_value = Value::Number(1.0);
        assert!(matches!(
            set_of(vec![flag]).validate(),
            Err(DefinitionValidationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_experiment_values_outside_variants() {
        let mut flag = experiment("e", &[("control", 5_000), ("treatment", 5_000)]);
        flag.default_value = "no-such-variant".into();
        assert_eq!(
            set_of(vec![flag]).validate(),
            Err(DefinitionValidationError::UnknownVariant {
                flag: "e".to_owned(),
                variant: "no-such-variant".to_owned(),
            })
        );

        let mut flag = experiment("e", &[("control", 5_000), ("treatment", 5_000)]);
        flag.rules.insert(0, rule(vec![rollout(10.0)], "holdout"));
        assert_eq!(
            set_of(vec![flag]).validate(),
            Err(DefinitionValidationError::UnknownVariant {
                flag: "e".to_owned(),
                variant: "holdout".to_owned(),
            })
        );

        let mut flag = experiment("e", &[("control", 5_000), ("treatment", 5_000)]);
        flag.rules.insert(0, rule(vec![rollout(10.0)], true));
        assert!(matches!(
            set_of(vec![flag]).validate(),
            Err(DefinitionValidationError::TypeMismatch { .. })
        ));

        let mut flag = experiment("e", &[("control", 5_000), ("treatment", 5_000)]);
        flag.rules.insert(0, rule(vec![rollout(10.0)], "treatment"));
        assert_eq!(set_of(vec![flag]).validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_conditions() {
        let set = set_of(vec![boolean_flag(
            "flag",
            vec![rule(vec![rollout(120.0)], true)],
        )]);
        assert!(matches!(
            set.validate(),
            Err(DefinitionValidationError::RolloutOutOfRange { .. })
        ));

        let set = set_of(vec![boolean_flag(
            "flag",
            vec![rule(
                vec![Condition::Matches {
                    attribute: "email".to_owned(),
                    pattern: "([".to_owned(),
                }],
                true,
            )],
        )]);
        assert!(matches!(
            set.validate(),
            Err(DefinitionValidationError::InvalidRegex { .. })
        ));

        let set = set_of(vec![boolean_flag(
            "flag",
            vec![rule(
                vec![Condition::Range {
                    attribute: "age".to_owned(),
                    min: Some(30.0),
                    max: Some(18.0),
                }],
                true,
            )],
        )]);
        assert!(matches!(
            set.validate(),
            Err(DefinitionValidationError::InvalidRange { .. })
        ));
    }

    #[test]
    fn malformed_payload_is_a_validation_error() {
        let err = DefinitionSet::from_json(br#"{"flags": {"x": {"key": 1}}}"#).unwrap_err();
        assert!(matches!(err, DefinitionValidationError::Malformed(_)));
    }
}
