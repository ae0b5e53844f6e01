use std::time::Duration;

use crate::Client;

/// Configuration for the background definition refresher.
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Interval to wait between requests for definitions.
    ///
    /// Defaults to [`RefresherConfig::DEFAULT_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between requests for definitions. This helps
    /// to avoid multiple server instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`RefresherConfig::DEFAULT_JITTER`].
    pub jitter: Duration,
    /// Upper bound for a single fetch. A fetch taking longer counts as a failure.
    ///
    /// Defaults to [`RefresherConfig::DEFAULT_FETCH_TIMEOUT`].
    pub fetch_timeout: Duration,
    /// Upper bound for the delay between attempts after consecutive failures.
    ///
    /// Defaults to [`RefresherConfig::DEFAULT_MAX_BACKOFF`].
    pub max_backoff: Duration,
}

impl RefresherConfig {
    /// Default value for [`RefresherConfig::interval`].
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`RefresherConfig::jitter`].
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(3);
    /// Default value for [`RefresherConfig::fetch_timeout`].
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for [`RefresherConfig::max_backoff`].
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

    /// Create a new `RefresherConfig` using default configuration.
    pub fn new() -> RefresherConfig {
        RefresherConfig::default()
    }

    /// Update refresh interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> RefresherConfig {
        self.interval = interval;
        self
    }

    /// Update refresh interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> RefresherConfig {
        self.jitter = jitter;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> RefresherConfig {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> RefresherConfig {
        self.max_backoff = max_backoff;
        self
    }
}

impl Default for RefresherConfig {
    fn default() -> RefresherConfig {
        RefresherConfig {
            interval: RefresherConfig::DEFAULT_INTERVAL,
            jitter: RefresherConfig::DEFAULT_JITTER,
            fetch_timeout: RefresherConfig::DEFAULT_FETCH_TIMEOUT,
            max_backoff: RefresherConfig::DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Configuration for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) refresher: RefresherConfig,
    pub(crate) shutdown_grace: Duration,
}

impl ClientConfig {
    /// Default base URL of the definition source.
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:8080";

    /// Default value for [`ClientConfig::shutdown_grace`].
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    /// Create a default configuration fetching definitions from `base_url`.
    ///
    /// ```
    /// # use feature_flags::ClientConfig;
    /// ClientConfig::from_base_url("https://flags.example.com");
    /// ```
    pub fn from_base_url(base_url: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into(),
            api_key: None,
            refresher: RefresherConfig::default(),
            shutdown_grace: ClientConfig::DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Authenticate against the definition source with `api_key`.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the whole refresher configuration.
    pub fn refresher(mut self, refresher: RefresherConfig) -> Self {
        self.refresher = refresher;
        self
    }

    /// Set the interval between definition refreshes.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresher.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.refresher.jitter = jitter;
        self
    }

    pub fn fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.refresher.fetch_timeout = fetch_timeout;
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.refresher.max_backoff = max_backoff;
        self
    }

    /// How long [`Client::stop`] lets an in-flight fetch finish before dropping it.
    pub fn shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    /// Create a new [`Client`] using the specified configuration. The client is cold until
    /// [`Client::start`] is called.
    ///
    /// ```
    /// # use feature_flags::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_base_url("https://flags.example.com").to_client();
    /// ```
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::from_base_url(ClientConfig::DEFAULT_BASE_URL)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ClientConfig, RefresherConfig};

    #[test]
    fn builders_override_defaults() {
        let config = ClientConfig::from_base_url("https://flags.example.com")
            .api_key("secret")
            .refresh_interval(Duration::from_secs(5))
            .fetch_timeout(Duration::from_secs(1))
            .shutdown_grace(Duration::ZERO);

        assert_eq!(config.base_url, "https://flags.example.com");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.refresher.interval, Duration::from_secs(5));
        assert_eq!(config.refresher.fetch_timeout, Duration::from_secs(1));
        assert_eq!(config.refresher.jitter, RefresherConfig::DEFAULT_JITTER);
        assert_eq!(config.refresher.max_backoff, RefresherConfig::DEFAULT_MAX_BACKOFF);
        assert_eq!(config.shutdown_grace, Duration::ZERO);
    }
}
