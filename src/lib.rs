//! A client-side feature flag and experimentation evaluator.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that evaluates feature flags for an
//! [`EvaluationContext`]: a subject id plus key-value attributes. Evaluation is local and
//! deterministic: it runs against an immutable [`Snapshot`] of flag definitions held in a
//! [`DefinitionCache`], which a background refresher keeps up to date by polling a
//! [`DefinitionSource`].
//!
//! Evaluation never performs network I/O and never fails. Every result carries an
//! [`EvaluationReason`] explaining where the value came from; before the first successful fetch
//! the caller's default is served with [`EvaluationReason::FlagNotFound`].
//!
//! Subjects are bucketed with a consistent hash ([`Md5Sharder`]), so a subject sees the same
//! value across processes, restarts, and refreshes as long as the flag definition does not
//! change.
//!
//! # Error Handling
//!
//! Lifecycle and refresh errors are represented by the [`Error`] enum. Refresh failures never
//! reach evaluation callers: the last good snapshot keeps being served and the failure is visible
//! through [`Client::status`].
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with the `feature_flags`
//! target and structured key-values. Consider integrating a `log`-compatible logger
//! implementation for better visibility into refresher operations.
//!
//! # Examples
//!
//! A runnable example can be found in the `demos` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

mod backoff;
mod client;
mod config;
mod context;
mod definition_cache;
mod error;
mod health;
mod refresher;
mod wrap;

pub mod definition;
pub mod eval;
pub mod rules;
pub mod sharder;
pub mod snapshot;
pub mod source;

pub use client::{Client, ExperimentAssignment, Feature};
pub use config::{ClientConfig, RefresherConfig};
pub use context::{AttributeValue, Attributes, EvaluationContext};
pub use definition::{DefinitionSet, FlagDefinition, Value};
pub use definition_cache::DefinitionCache;
pub use error::{
    DefinitionFetchError, DefinitionValidationError, Error, EvaluationFault, Result,
};
pub use eval::{EvaluationReason, EvaluationResult, Evaluator, MatchedRule};
pub use health::{HealthState, HealthStatus};
pub use sharder::{Md5Sharder, Sharder};
pub use snapshot::Snapshot;
pub use source::{DefinitionSource, FetchOutcome, HttpDefinitionSource, HttpSourceConfig};
