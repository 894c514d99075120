//! Configuration for the relay.
//!
//! This module provides the [`Config`] struct for naming the Pub/Sub project,
//! topics and subscriptions, the credentials used to reach them, and the
//! timing knobs of the idle decay loop.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Default topic orders are published to
pub const DEFAULT_REGION_TOPIC: &str = "TopicRegionUSA";

/// Default subscription menu price updates are pulled from
pub const DEFAULT_UPDATE_SUBSCRIPTION: &str = "store1-sub";

/// Default latency histogram bucket boundaries in milliseconds
pub const DEFAULT_LATENCY_BUCKETS: [f64; 6] = [0.1, 5.0, 15.0, 50.0, 100.0, 500.0];

/// Pub/Sub endpoint the relay talks to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    /// Google Cloud Pub/Sub (authenticated, TLS)
    #[default]
    Production,
    /// Local Pub/Sub emulator at `host:port` (plain HTTP, no auth)
    Emulator {
        /// Emulator address, e.g. `localhost:8085`
        host: String,
    },
}

impl Environment {
    /// Get the base URL for the Pub/Sub REST API
    pub fn base_url(&self) -> Result<Url, Error> {
        let raw = match self {
            Environment::Production => "https://pubsub.googleapis.com/v1/".to_string(),
            Environment::Emulator { host } => format!("http://{}/v1/", host),
        };
        Ok(Url::parse(&raw)?)
    }

    /// Whether requests need a bearer token
    pub fn requires_auth(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Backoff policy for the subscription pull loop
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive failed pulls (0 = infinite)
    pub max_retries: u32,
    /// Initial delay between attempts
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retries (0 = infinite)
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_retries == 0 || attempt < self.max_retries
    }
}

/// Configuration for the relay
///
/// # Example
///
/// ```rust
/// use pos_relay::config::{Config, Environment};
/// use std::time::Duration;
///
/// let config = Config::new("my-project")
///     .with_environment(Environment::Emulator { host: "localhost:8085".into() })
///     .with_region_topic("TopicRegionEU")
///     .with_idle_threshold(Duration::from_millis(500));
///
/// assert_eq!(config.region_topic(), "TopicRegionEU");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Google Cloud project id
    project_id: String,

    /// Path to a service account key file (JSON)
    credentials_path: Option<PathBuf>,

    /// Pub/Sub endpoint
    environment: Environment,

    /// Topic orders are published to
    region_topic: String,

    /// Subscription price updates are pulled from
    update_subscription: String,

    /// HTTP request timeout
    timeout: Duration,

    /// Period of the idle decay loop
    decay_period: Duration,

    /// Inactivity after which latency gauges are zeroed
    idle_threshold: Duration,

    /// Latency histogram bucket upper bounds (ms)
    latency_buckets: Vec<f64>,

    /// Maximum messages per pull request
    max_messages: u32,

    /// Backoff policy for the pull loop
    retry: RetryConfig,
}

impl Config {
    /// Create a new configuration for a Pub/Sub project
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            credentials_path: None,
            environment: Environment::default(),
            region_topic: DEFAULT_REGION_TOPIC.to_string(),
            update_subscription: DEFAULT_UPDATE_SUBSCRIPTION.to_string(),
            timeout: Duration::from_secs(10),
            decay_period: Duration::from_secs(2),
            idle_threshold: Duration::from_secs(1),
            latency_buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
            max_messages: 10,
            retry: RetryConfig::default(),
        }
    }

    /// Build a configuration from environment variables
    ///
    /// - `PUBSUB_PROJECT_ID` (required)
    /// - `PUBSUB_EMULATOR_HOST` selects the emulator when set
    /// - `PUBSUB_CREDENTIALS` path to a service account key file
    /// - `RELAY_REGION_TOPIC`, `RELAY_UPDATE_SUBSCRIPTION` override the defaults
    pub fn from_env() -> Result<Self, Error> {
        let project_id = std::env::var("PUBSUB_PROJECT_ID")
            .map_err(|_| Error::Config("PUBSUB_PROJECT_ID is not set".to_string()))?;

        let mut config = Config::new(project_id);

        if let Ok(host) = std::env::var("PUBSUB_EMULATOR_HOST") {
            config = config.with_environment(Environment::Emulator { host });
        }
        if let Ok(path) = std::env::var("PUBSUB_CREDENTIALS") {
            config = config.with_credentials_path(path);
        }
        if let Ok(topic) = std::env::var("RELAY_REGION_TOPIC") {
            config = config.with_region_topic(topic);
        }
        if let Ok(subscription) = std::env::var("RELAY_UPDATE_SUBSCRIPTION") {
            config = config.with_update_subscription(subscription);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the settings are usable together
    pub fn validate(&self) -> Result<(), Error> {
        if self.project_id.is_empty() {
            return Err(Error::Config("project id is empty".to_string()));
        }
        if self.environment.requires_auth() && self.credentials_path.is_none() {
            return Err(Error::Config(
                "credentials are required outside the emulator".to_string(),
            ));
        }
        if self.latency_buckets.is_empty() || self.latency_buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config(
                "latency buckets must be non-empty and strictly increasing".to_string(),
            ));
        }
        if self.decay_period.is_zero() {
            return Err(Error::Config("decay period must be positive".to_string()));
        }
        Ok(())
    }

    /// Set the Pub/Sub environment
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the service account key file
    #[must_use]
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    /// Set the topic orders are published to
    #[must_use]
    pub fn with_region_topic(mut self, topic: impl Into<String>) -> Self {
        self.region_topic = topic.into();
        self
    }

    /// Set the subscription price updates are pulled from
    #[must_use]
    pub fn with_update_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.update_subscription = subscription.into();
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the idle decay period
    #[must_use]
    pub fn with_decay_period(mut self, period: Duration) -> Self {
        self.decay_period = period;
        self
    }

    /// Set the inactivity threshold after which gauges are zeroed
    #[must_use]
    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    /// Set the latency histogram buckets (ms)
    #[must_use]
    pub fn with_latency_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.latency_buckets = buckets;
        self
    }

    /// Set the maximum messages returned per pull
    #[must_use]
    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    /// Set the pull loop backoff policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get the project id
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Get the service account key path
    pub fn credentials_path(&self) -> Option<&PathBuf> {
        self.credentials_path.as_ref()
    }

    /// Get the environment
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Get the region topic
    pub fn region_topic(&self) -> &str {
        &self.region_topic
    }

    /// Get the update subscription
    pub fn update_subscription(&self) -> &str {
        &self.update_subscription
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the decay period
    pub fn decay_period(&self) -> Duration {
        self.decay_period
    }

    /// Get the idle threshold
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    /// Get the latency histogram buckets
    pub fn latency_buckets(&self) -> &[f64] {
        &self.latency_buckets
    }

    /// Get the maximum messages per pull
    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }

    /// Get the pull loop backoff policy
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}
