use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::PipelineError;
use crate::policy::ReconnectPolicy;

/// Dispatcher timing and chain defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchConfig {
    /// Pause between two successfully submitted batches.
    pub inter_batch_delay: Duration,
    /// Chain used when a batch's first transaction carries no `chainId`.
    pub default_chain_id: u64,
    /// Display duration attached to every notification.
    pub notification_duration: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            inter_batch_delay: Duration::from_millis(1_000),
            default_chain_id: 1,
            notification_duration: Duration::from_secs(5),
        }
    }
}

impl DispatchConfig {
    pub fn inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    pub fn default_chain_id(mut self, chain_id: u64) -> Self {
        self.default_chain_id = chain_id;
        self
    }

    pub fn notification_duration(mut self, duration: Duration) -> Self {
        self.notification_duration = duration;
        self
    }
}

/// Tracing output settings, applied by [`crate::init_observability`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    /// When false no subscriber is installed.
    pub enabled: bool,
    /// Filter directives such as `intent_pipeline=debug`. Falls back to
    /// `RUST_LOG`, then `info`.
    pub filter: Option<String>,
    /// Write JSON lines to this file instead of compact stdout output.
    pub json_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: None,
            json_path: None,
        }
    }
}

impl LogConfig {
    /// Reads `INTENT_LOG_ENABLED`, `INTENT_LOG_FILTER` and
    /// `INTENT_LOG_JSON_PATH` through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Ok(Self {
            enabled: parse_var(&lookup, "INTENT_LOG_ENABLED")?.unwrap_or(true),
            filter: non_empty("INTENT_LOG_FILTER"),
            json_path: non_empty("INTENT_LOG_JSON_PATH").map(PathBuf::from),
        })
    }

    pub fn filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    pub fn json_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.json_path = Some(path.into());
        self
    }
}

/// Configuration for one pipeline: stream endpoint, reconnect policy and
/// dispatch settings.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Base URL of the intent service; streams live under
    /// `{base_url}/intents/{id}/stream`.
    pub base_url: String,
    /// Timeout for establishing a stream connection.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub dispatch: DispatchConfig,
    pub log: LogConfig,
}

impl PipelineConfig {
    /// Creates a config with default policy values for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            dispatch: DispatchConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Builds a config from process environment, loading `.env` first.
    ///
    /// Environment variables:
    /// - `INTENT_STREAM_BASE_URL` (required)
    /// - `INTENT_STREAM_CONNECT_TIMEOUT_SECS` (default 30)
    /// - `INTENT_RECONNECT_MAX_ATTEMPTS` (default 5)
    /// - `INTENT_RECONNECT_INITIAL_MS` (default 1000)
    /// - `INTENT_RECONNECT_MAX_MS` (default 30000)
    /// - `INTENT_INTER_BATCH_DELAY_MS` (default 1000)
    /// - `INTENT_DEFAULT_CHAIN_ID` (default 1)
    /// - `INTENT_LOG_ENABLED` (default true), `INTENT_LOG_FILTER`,
    ///   `INTENT_LOG_JSON_PATH`
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PipelineConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let base_url = lookup("INTENT_STREAM_BASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PipelineError::Config("missing INTENT_STREAM_BASE_URL".into()))?;

        let mut config = Self::new(base_url);
        if let Some(secs) = parse_var::<u64>(&lookup, "INTENT_STREAM_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }

        let defaults = ReconnectPolicy::default();
        let max_attempts = parse_var(&lookup, "INTENT_RECONNECT_MAX_ATTEMPTS")?
            .unwrap_or(defaults.max_attempts);
        let initial_ms = parse_var(&lookup, "INTENT_RECONNECT_INITIAL_MS")?
            .unwrap_or(defaults.initial_backoff_ms);
        let max_ms =
            parse_var(&lookup, "INTENT_RECONNECT_MAX_MS")?.unwrap_or(defaults.max_backoff_ms);
        config.reconnect =
            ReconnectPolicy::exponential(max_attempts, initial_ms, defaults.backoff_factor)
                .with_max_backoff_ms(max_ms);

        if let Some(ms) = parse_var::<u64>(&lookup, "INTENT_INTER_BATCH_DELAY_MS")? {
            config.dispatch.inter_batch_delay = Duration::from_millis(ms);
        }
        if let Some(chain_id) = parse_var(&lookup, "INTENT_DEFAULT_CHAIN_ID")? {
            config.dispatch.default_chain_id = chain_id;
        }
        config.log = LogConfig::from_lookup(&lookup)?;
        Ok(config)
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the reconnect policy.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Overrides dispatch settings.
    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, PipelineError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::Config(format!("invalid value for {key}: {raw:?}"))),
    }
}
