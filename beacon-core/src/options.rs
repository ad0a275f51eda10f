use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use beacon_config::Config;
use beacon_sampling::{SampleRate, SamplingContext, TracesSampler};
use beacon_session::DEFAULT_FLUSH_INTERVAL;
use beacon_transport::Transport;

use crate::policy::{RequestSessionPolicy, SessionPolicy};

/// The default maximum number of breadcrumbs kept on a scope.
pub const DEFAULT_MAX_BREADCRUMBS: usize = 100;

/// Options of a [`Client`](crate::Client).
///
/// Build them from a loaded [`Config`] and add the parts that cannot be configured in a file:
///
/// ```
/// use beacon_config::Config;
/// use beacon_core::ClientOptions;
///
/// let config = Config::default();
/// let options = ClientOptions::from(&config)
///     .with_traces_sampler(|ctx| (ctx.op() == "http.server").into());
/// ```
#[derive(Clone)]
pub struct ClientOptions {
    /// The release version of the application. Session tracking requires a release.
    pub release: Option<String>,
    /// The environment the application runs in.
    pub environment: Option<String>,
    /// The static sample rate for transactions.
    pub traces_sample_rate: Option<SampleRate>,
    /// Computes the sample rate per transaction, taking precedence over the static rate.
    pub traces_sampler: Option<Arc<TracesSampler>>,
    /// Whether request sessions are aggregated and sent.
    pub auto_session_tracking: bool,
    /// The interval between two session flushes.
    pub session_flush_interval: Duration,
    /// The default time to wait for pending payloads when closing the client.
    pub shutdown_timeout: Duration,
    /// Maximum number of breadcrumbs kept on a scope.
    pub max_breadcrumbs: usize,
    /// Delivers events and session aggregates. Without a transport, the client is disabled.
    pub transport: Option<Arc<dyn Transport>>,
    /// Rules for updating request sessions when events are captured.
    pub session_policy: Arc<dyn SessionPolicy>,
}

impl ClientOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the traces sampler.
    pub fn with_traces_sampler<F>(mut self, sampler: F) -> Self
    where
        F: Fn(&SamplingContext<'_>) -> SampleRate + Send + Sync + 'static,
    {
        self.traces_sampler = Some(Arc::new(sampler));
        self
    }

    /// Replaces the session policy.
    pub fn with_session_policy(mut self, policy: impl SessionPolicy) -> Self {
        self.session_policy = Arc::new(policy);
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            release: None,
            environment: None,
            traces_sample_rate: None,
            traces_sampler: None,
            auto_session_tracking: true,
            session_flush_interval: DEFAULT_FLUSH_INTERVAL,
            shutdown_timeout: Duration::from_secs(2),
            max_breadcrumbs: DEFAULT_MAX_BREADCRUMBS,
            transport: None,
            session_policy: Arc::new(RequestSessionPolicy),
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            release: config.release.clone(),
            environment: config.environment.clone(),
            traces_sample_rate: config.traces_sample_rate.clone(),
            auto_session_tracking: config.auto_session_tracking,
            session_flush_interval: config.session_flush_interval(),
            shutdown_timeout: config.shutdown_timeout(),
            max_breadcrumbs: config.max_breadcrumbs,
            ..Default::default()
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("release", &self.release)
            .field("environment", &self.environment)
            .field("traces_sample_rate", &self.traces_sample_rate)
            .field("traces_sampler", &self.traces_sampler.is_some())
            .field("auto_session_tracking", &self.auto_session_tracking)
            .field("session_flush_interval", &self.session_flush_interval)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("max_breadcrumbs", &self.max_breadcrumbs)
            .field("transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_from_config() {
        let config = Config::from_json_value(serde_json::json!({
            "release": "app@1.0.0",
            "environment": "production",
            "traces_sample_rate": 0.1,
            "auto_session_tracking": false,
            "sessions": {"flush_interval": 5},
            "shutdown_timeout": 10,
            "max_breadcrumbs": 20,
        }))
        .unwrap();

        let options = ClientOptions::from(&config);

        assert_eq!(options.release.as_deref(), Some("app@1.0.0"));
        assert_eq!(options.environment.as_deref(), Some("production"));
        assert_eq!(options.traces_sample_rate, Some(SampleRate::Number(0.1)));
        assert!(options.traces_sampler.is_none());
        assert!(!options.auto_session_tracking);
        assert_eq!(options.session_flush_interval, Duration::from_secs(5));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(options.max_breadcrumbs, 20);
        assert!(options.transport.is_none());
    }

    #[test]
    fn test_defaults_match_config() {
        let options = ClientOptions::from(&Config::default());
        let defaults = ClientOptions::default();

        assert_eq!(options.auto_session_tracking, defaults.auto_session_tracking);
        assert_eq!(options.session_flush_interval, defaults.session_flush_interval);
        assert_eq!(options.shutdown_timeout, defaults.shutdown_timeout);
        assert_eq!(options.max_breadcrumbs, defaults.max_breadcrumbs);
    }
}
