//! Client configuration (`esdb.server.uri`, `esdb.server.apiToken`,
//! `esdb.connectionTimeout`, spec §6).

use std::time::Duration;

/// Configuration for [`crate::HttpStoreClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URI of the store, e.g. `https://esdb.example.com`.
    pub base_uri: String,
    /// Bearer token presented on every request.
    pub api_token: String,
    /// TCP connect timeout (`esdb.connectionTimeout`, default 5s).
    pub connect_timeout: Duration,
    /// Overall per-request timeout.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Construct configuration with the default timeouts.
    #[must_use]
    pub fn new(base_uri: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            api_token: api_token.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_connect_timeout_is_five_seconds() {
        let config = ClientConfig::new("https://esdb.example.com", "token");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }
}
