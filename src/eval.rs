//! Flag evaluation.
//!
//! [`evaluate_flag`] and [`assign_variant`] are pure functions over a [`Snapshot`]. They never
//! fail: any fault is reported through [`EvaluationReason::EvaluationError`]. [`Evaluator`] binds
//! them to a [`DefinitionCache`] and a [`Sharder`].
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    definition::{FlagDefinition, FlagType, RuleOutcome, Value, Variant, TOTAL_WEIGHT},
    rules::find_matching_rule,
    sharder::{Md5Sharder, Sharder},
    DefinitionCache, EvaluationContext, EvaluationFault, Snapshot,
};

/// Why an evaluation produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    /// A targeting rule matched.
    RuleMatch,
    /// No rule matched; the flag default value is served.
    Default,
    /// The flag kill switch is off; the flag default value is served.
    FlagDisabled,
    /// The flag is not part of the current snapshot; the caller default is served.
    FlagNotFound,
    /// Evaluation hit an internal fault; a default is served.
    EvaluationError,
}

impl EvaluationReason {
    /// `true` if the value was produced by the flag's targeting rather than a fallback.
    pub fn is_rule_match(self) -> bool {
        self == EvaluationReason::RuleMatch
    }
}

/// Which rule produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedRule {
    /// Position of the matching rule in the flag's rule list.
    Rule(usize),
    Default,
}

/// Outcome of evaluating one flag for one context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub flag_key: String,
    pub value: Value,
    /// Name of the assigned variant, when the value comes from a variant.
    pub variant: Option<String>,
    /// Payload of the assigned variant.
    pub payload: Option<serde_json::Value>,
    pub matched_rule: MatchedRule,
    pub reason: EvaluationReason,
    /// Version of the snapshot the flag was evaluated against.
    pub snapshot_version: Option<String>,
}

impl EvaluationResult {
    fn fallback(
        flag_key: &str,
        value: Value,
        reason: EvaluationReason,
        snapshot: &Snapshot,
    ) -> EvaluationResult {
        EvaluationResult {
            flag_key: flag_key.to_owned(),
            value,
            variant: None,
            payload: None,
            matched_rule: MatchedRule::Default,
            reason,
            snapshot_version: snapshot.version().map(str::to_owned),
        }
    }
}

/// Evaluate `flag_key` for `context` against `snapshot`.
///
/// `default` is served when the flag does not exist in the snapshot; the engine never invents a
/// value. In every other case the flag's own default value is the fallback.
pub fn evaluate_flag(
    snapshot: &Snapshot,
    flag_key: &str,
    context: &EvaluationContext,
    default: Value,
    sharder: &impl Sharder,
) -> EvaluationResult {
    let Some(flag) = snapshot.get(flag_key) else {
        log::trace!(target: "feature_flags",
                    flag_key,
                    subject_id = context.subject_id();
                    "flag not found, serving caller default");
        return EvaluationResult::fallback(
            flag_key,
            default,
            EvaluationReason::FlagNotFound,
            snapshot,
        );
    };

    let evaluation = panic::catch_unwind(AssertUnwindSafe(|| {
        evaluate_definition(flag, context, sharder)
    }))
    .unwrap_or(Err(EvaluationFault::Panicked));

    match evaluation {
        Ok(evaluation) => {
            log::trace!(target: "feature_flags",
                        flag_key,
                        subject_id = context.subject_id(),
                        reason:serde = evaluation.reason,
                        value:serde = evaluation.value;
                        "evaluated a flag");
            EvaluationResult {
                flag_key: flag_key.to_owned(),
                value: evaluation.value,
                variant: evaluation.variant.map(|v| v.name.clone()),
                payload: evaluation.variant.and_then(|v| v.payload.clone()),
                matched_rule: evaluation.matched_rule,
                reason: evaluation.reason,
                snapshot_version: snapshot.version().map(str::to_owned),
            }
        }
        Err(fault) => {
            log::warn!(target: "feature_flags",
                       flag_key,
                       subject_id = context.subject_id();
                       "error occurred while evaluating a flag: {fault}");
            EvaluationResult::fallback(
                flag_key,
                flag.default_value.clone(),
                EvaluationReason::EvaluationError,
                snapshot,
            )
        }
    }
}

struct Evaluation<'a> {
    value: Value,
    variant: Option<&'a Variant>,
    matched_rule: MatchedRule,
    reason: EvaluationReason,
}

impl<'a> Evaluation<'a> {
    fn flag_default(flag: &FlagDefinition, reason: EvaluationReason) -> Evaluation<'a> {
        Evaluation {
            value: flag.default_value.clone(),
            variant: None,
            matched_rule: MatchedRule::Default,
            reason,
        }
    }
}

fn evaluate_definition<'a>(
    flag: &'a FlagDefinition,
    context: &EvaluationContext,
    sharder: &impl Sharder,
) -> Result<Evaluation<'a>, EvaluationFault> {
    if !flag.enabled {
        return Ok(Evaluation::flag_default(flag, EvaluationReason::FlagDisabled));
    }

    let Some((index, rule)) = find_matching_rule(&flag.rules, flag.salt(), context, sharder)
    else {
        return Ok(Evaluation::flag_default(flag, EvaluationReason::Default));
    };

    let (value, variant) = match &rule.outcome {
        RuleOutcome::Value(value) => {
            // A literal naming one of the variants (e.g., forcing QA users into "treatment")
            // still carries that variant's payload.
            let variant = match (flag.flag_type, value) {
                (FlagType::Boolean, _) => None,
                (_, Value::String(name)) => flag.variant(name),
                _ => None,
            };
            (value.clone(), variant)
        }
        RuleOutcome::Variants => {
            let variant = assign_variant(flag, context, sharder)?;
            (Value::String(variant.name.clone()), Some(variant))
        }
    };

    Ok(Evaluation {
        value,
        variant,
        matched_rule: MatchedRule::Rule(index),
        reason: EvaluationReason::RuleMatch,
    })
}

/// Pick a variant for `context` by weight.
///
/// The subject's bucket `b` is stable for a given salt, and the variant is the first one whose
/// cumulative weight exceeds `b * TOTAL_WEIGHT`. Assignment is not sticky across weight
/// changes: editing weights moves the variant boundaries, so subjects near a boundary can
/// switch variants. Changing the salt reshuffles everyone.
pub fn assign_variant<'a>(
    definition: &'a FlagDefinition,
    context: &EvaluationContext,
    sharder: &impl Sharder,
) -> Result<&'a Variant, EvaluationFault> {
    if definition.variants.is_empty() {
        return Err(EvaluationFault::NoVariants);
    }

    let bucket = sharder.bucket_of(definition.salt(), context.subject_id());
    let threshold = bucket * TOTAL_WEIGHT as f64;

    let mut cumulative = 0u64;
    for variant in &definition.variants {
        cumulative += u64::from(variant.weight);
        if cumulative as f64 > threshold {
            return Ok(variant);
        }
    }

    Err(EvaluationFault::WeightsExhausted)
}

/// Evaluator reads the current snapshot from a [`DefinitionCache`] and evaluates flags against
/// it. It is cheap to share between threads.
pub struct Evaluator<S = Md5Sharder> {
    cache: Arc<DefinitionCache>,
    sharder: S,
}

impl Evaluator<Md5Sharder> {
    pub fn new(cache: Arc<DefinitionCache>) -> Evaluator<Md5Sharder> {
        Evaluator::with_sharder(cache, Md5Sharder)
    }
}

impl<S: Sharder> Evaluator<S> {
    pub fn with_sharder(cache: Arc<DefinitionCache>, sharder: S) -> Evaluator<S> {
        Evaluator { cache, sharder }
    }

    /// Evaluate a flag against the snapshot that is current at the time of the call. The same
    /// snapshot is used for the whole evaluation even if a refresh lands concurrently.
    pub fn evaluate(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default: Value,
    ) -> EvaluationResult {
        self.evaluate_in(&self.cache.current(), flag_key, context, default)
    }

    /// Evaluate a flag against a snapshot the caller already holds.
    pub fn evaluate_in(
        &self,
        snapshot: &Snapshot,
        flag_key: &str,
        context: &EvaluationContext,
        default: Value,
    ) -> EvaluationResult {
        evaluate_flag(snapshot, flag_key, context, default, &self.sharder)
    }

    pub fn cache(&self) -> &Arc<DefinitionCache> {
        &self.cache
    }
}
