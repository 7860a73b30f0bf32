use std::time::Duration;

/// Connection settings for the upstream completion service
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub host: String,
    pub api_key: String,
    /// Agent-qualified model id sent with every completion request
    pub model: String,
    /// Applies to the whole call, including the time spent reading a stream
    pub timeout: Duration,
}

impl UpstreamConfig {
    pub fn new<S: Into<String>>(host: S, api_key: S, model: S) -> Self {
        UpstreamConfig {
            host: host.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
