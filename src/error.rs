use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// Result type used by fallible (non-evaluation) operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by client lifecycle and refresh operations.
///
/// Flag evaluation never returns an error: evaluation faults are folded into
/// [`EvaluationReason::EvaluationError`](crate::EvaluationReason::EvaluationError).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Fetching definitions from the source failed.
    #[error(transparent)]
    Fetch(#[from] DefinitionFetchError),

    /// Fetched definitions were rejected.
    #[error(transparent)]
    Validation(#[from] DefinitionValidationError),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The refresher thread panicked. This should normally never happen.
    #[error("refresher thread panicked")]
    RefresherPanicked,

    /// No snapshot was published before the wait timed out.
    #[error("flag definitions not ready after {0:?}")]
    NotReady(Duration),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// Failure talking to the definition source. Retried with backoff, never seen by evaluation
/// callers.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DefinitionFetchError {
    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The fetch did not complete within the configured timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The source rejected our credentials.
    #[error("unauthorized, check the definition source credentials")]
    Unauthorized,

    /// The source answered with an unexpected status code.
    #[error("unexpected response status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for DefinitionFetchError {
    fn from(value: reqwest::Error) -> Self {
        DefinitionFetchError::Network(Arc::new(value.without_url()))
    }
}

/// A fetched definition set that cannot be published. The whole set is rejected and the
/// current snapshot stays in place.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DefinitionValidationError {
    /// The payload could not be decoded.
    #[error("malformed definitions payload: {0}")]
    Malformed(String),

    #[error("flag with an empty key")]
    EmptyFlagKey,

    #[error("flag {key:?} is stored under {entry:?}")]
    KeyMismatch { entry: String, key: String },

    #[error("flag {flag:?} needs at least one variant")]
    NoVariants { flag: String },

    #[error("flag {flag:?} has a variant with an empty name")]
    EmptyVariantName { flag: String },

    #[error("flag {flag:?} declares variant {variant:?} more than once")]
    DuplicateVariant { flag: String, variant: String },

    #[error("flag {flag:?} refers to unknown variant {variant:?}")]
    UnknownVariant { flag: String, variant: String },

    #[error("flag {flag:?} variant weights sum to {total}, expected {expected}")]
    WeightSum {
        flag: String,
        total: u64,
        expected: u64,
    },

    #[error("flag {flag:?} has a catch-all rule at position {index} that is not last")]
    CatchAllNotLast { flag: String, index: usize },

    #[error("flag {flag:?} rollout percentage {percentage} is outside [0, 100]")]
    RolloutOutOfRange { flag: String, percentage: f64 },

    #[error("flag {flag:?} has a range condition with min above max")]
    InvalidRange { flag: String },

    #[error("flag {flag:?} has an invalid regex {pattern:?}")]
    InvalidRegex { flag: String, pattern: String },

    /// A value does not fit the flag type (e.g., a string outcome on a boolean flag).
    #[error("flag {flag:?}: {detail}")]
    TypeMismatch { flag: String, detail: String },
}

impl From<serde_json::Error> for DefinitionValidationError {
    fn from(value: serde_json::Error) -> Self {
        DefinitionValidationError::Malformed(value.to_string())
    }
}

/// Unexpected inconsistency hit while evaluating a single flag.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationFault {
    /// The cumulative variant weights never passed the subject's bucket.
    #[error("variant weights do not cover the subject bucket")]
    WeightsExhausted,

    /// A rule asked for variant bucketing on a flag without variants.
    #[error("flag has no variants to bucket into")]
    NoVariants,

    /// Evaluation panicked.
    #[error("evaluation panicked")]
    Panicked,
}
