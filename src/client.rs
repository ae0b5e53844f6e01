use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::Serialize;

use crate::{
    definition::Value,
    eval::Evaluator,
    health::{HealthState, HealthStatus, HealthTracker},
    refresher::Refresher,
    source::{DefinitionSource, HttpDefinitionSource, HttpSourceConfig},
    ClientConfig, DefinitionCache, Error, EvaluationContext, EvaluationReason, EvaluationResult,
    Result, Snapshot,
};

/// A feature flag client.
///
/// In order to create a client instance, first create [`ClientConfig`]. A new client is cold:
/// every evaluation serves the caller's default until [`Client::start`] has fetched definitions.
/// Evaluation never blocks on the network and never fails.
///
/// Dropping the client signals its refresher to stop.
///
/// # Examples
/// ```
/// # use feature_flags::{Client, ClientConfig, EvaluationContext};
/// let client = Client::new(ClientConfig::from_base_url("https://flags.example.com"));
/// let context = EvaluationContext::new("user-42");
/// assert!(!client.is_enabled("new-ui", &context, false));
/// ```
pub struct Client {
    evaluator: Evaluator,
    health: Arc<HealthTracker>,
    refresher: Mutex<Option<Refresher>>,
    config: ClientConfig,
}

/// Result of [`Client::get_feature`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub enabled: bool,
    /// Configuration attached to the flag definition, if any.
    pub config: Option<serde_json::Value>,
    pub reason: EvaluationReason,
}

/// Result of [`Client::get_experiment`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentAssignment {
    pub variant: String,
    /// Payload of the assigned variant, if any.
    pub payload: Option<serde_json::Value>,
    pub reason: EvaluationReason,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Self {
        Client {
            evaluator: Evaluator::new(Arc::new(DefinitionCache::new())),
            health: Arc::new(HealthTracker::new()),
            refresher: Mutex::new(None),
            config,
        }
    }

    /// Start refreshing definitions from the HTTP source at the configured base URL.
    ///
    /// Calling `start` on a running client is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if the base URL cannot be parsed.
    /// - [`Error::Io`] if the refresher thread failed to start.
    pub fn start(&self) -> Result<()> {
        let source = HttpDefinitionSource::new(HttpSourceConfig {
            base_url: self.config.base_url.clone(),
            api_key: self.config.api_key.clone(),
        })?;
        self.start_with_source(source)
    }

    /// Start refreshing definitions from a custom `source`.
    pub fn start_with_source(&self, source: impl DefinitionSource) -> Result<()> {
        let mut refresher = self.refresher.lock().unwrap_or_else(PoisonError::into_inner);
        if refresher.is_some() {
            log::debug!(target: "feature_flags", "refresher is already running");
            return Ok(());
        }

        *refresher = Some(Refresher::start(
            source,
            Arc::clone(self.evaluator.cache()),
            Arc::clone(&self.health),
            self.config.refresher.clone(),
        )?);
        Ok(())
    }

    /// Stop the refresher and wait for it to exit. An in-flight fetch gets
    /// [`ClientConfig::shutdown_grace`] to complete. Evaluations keep working against the last
    /// published snapshot.
    ///
    /// # Errors
    ///
    /// - [`Error::RefresherPanicked`] if the refresher thread panicked.
    pub fn stop(&self) -> Result<()> {
        let refresher = self
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match refresher {
            Some(refresher) => refresher.shutdown(self.config.shutdown_grace),
            None => Ok(()),
        }
    }

    /// Trigger an immediate refresh. Does nothing if the client is not started.
    pub fn refresh_now(&self) {
        let refresher = self.refresher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(refresher) = refresher.as_ref() {
            refresher.refresh_now();
        }
    }

    pub fn health_status(&self) -> HealthState {
        self.health.state()
    }

    pub fn status(&self) -> HealthStatus {
        self.health.status()
    }

    /// Block until definitions are available or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReady`] if no definitions were published in time.
    /// - [`Error::RefresherPanicked`] if the refresher died before publishing.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        self.health.wait_until_ready(timeout)
    }

    /// Async version of [`Client::wait_until_ready`]. Must be called within a tokio runtime.
    pub async fn wait_until_ready_async(&self, timeout: Duration) -> Result<()> {
        let health = Arc::clone(&self.health);
        tokio::task::spawn_blocking(move || health.wait_until_ready(timeout))
            .await
            .unwrap_or(Err(Error::NotReady(timeout)))
    }

    /// The snapshot evaluations currently run against.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.evaluator.cache().current()
    }

    /// The cache the client evaluates from. Publishing to it directly allows running without a
    /// definition source (e.g., bootstrapping from a local file).
    pub fn cache(&self) -> &Arc<DefinitionCache> {
        self.evaluator.cache()
    }

    /// Evaluate a flag and return the full result.
    pub fn evaluate(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default: impl Into<Value>,
    ) -> EvaluationResult {
        self.evaluator.evaluate(flag_key, context, default.into())
    }

    /// Check whether a boolean flag is enabled for `context`.
    pub fn is_enabled(&self, flag_key: &str, context: &EvaluationContext, default: bool) -> bool {
        let result = self.evaluate(flag_key, context, default);
        typed(&result, default, Value::as_boolean).0
    }

    /// Get the variant of a multivariate flag for `context`.
    pub fn get_variant(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default: &str,
    ) -> (String, EvaluationReason) {
        let result = self.evaluate(flag_key, context, default);
        typed(&result, default.to_owned(), |value| {
            value.as_str().map(str::to_owned)
        })
    }

    /// Get the experiment variant for `context` together with its payload.
    pub fn get_experiment(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_variant: &str,
    ) -> ExperimentAssignment {
        let result = self.evaluate(flag_key, context, default_variant);
        let (variant, reason) = typed(&result, default_variant.to_owned(), |value| {
            value.as_str().map(str::to_owned)
        });
        let payload = match reason {
            EvaluationReason::EvaluationError => None,
            _ => result.payload,
        };
        ExperimentAssignment {
            variant,
            payload,
            reason,
        }
    }

    /// Check a boolean flag and return the configuration attached to it.
    pub fn get_feature(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_enabled: bool,
    ) -> Feature {
        let snapshot = self.snapshot();
        let result = self
            .evaluator
            .evaluate_in(&snapshot, flag_key, context, default_enabled.into());
        let (enabled, reason) = typed(&result, default_enabled, Value::as_boolean);
        Feature {
            enabled,
            config: snapshot.get(flag_key).and_then(|flag| flag.config.clone()),
            reason,
        }
    }

    /// Async version of [`Client::evaluate`].
    pub async fn evaluate_async(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default: impl Into<Value>,
    ) -> EvaluationResult {
        self.evaluate(flag_key, context, default)
    }

    /// Async version of [`Client::is_enabled`].
    pub async fn is_enabled_async(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default: bool,
    ) -> bool {
        self.is_enabled(flag_key, context, default)
    }

    /// Async version of [`Client::get_variant`].
    pub async fn get_variant_async(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default: &str,
    ) -> (String, EvaluationReason) {
        self.get_variant(flag_key, context, default)
    }

    /// Async version of [`Client::get_experiment`].
    pub async fn get_experiment_async(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_variant: &str,
    ) -> ExperimentAssignment {
        self.get_experiment(flag_key, context, default_variant)
    }

    /// Async version of [`Client::get_feature`].
    pub async fn get_feature_async(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_enabled: bool,
    ) -> Feature {
        self.get_feature(flag_key, context, default_enabled)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let refresher = self
            .refresher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(refresher) = refresher {
            refresher.stop(self.config.shutdown_grace);
        }
    }
}

/// Extract a typed value from `result`, falling back to `default` with
/// [`EvaluationReason::EvaluationError`] when the flag serves a value of another type.
fn typed<T>(
    result: &EvaluationResult,
    default: T,
    extract: impl FnOnce(&Value) -> Option<T>,
) -> (T, EvaluationReason) {
    match extract(&result.value) {
        Some(value) => (value, result.reason),
        None => {
            log::warn!(target: "feature_flags",
                       flag_key = result.flag_key.as_str(),
                       value:serde = result.value;
                       "flag value has unexpected type, serving default");
            (default, EvaluationReason::EvaluationError)
        }
    }
}
