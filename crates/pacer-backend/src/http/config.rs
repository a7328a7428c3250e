use std::time::Duration;

use crate::errors::BackendError;

/// Connection settings for [`super::HttpBackend`].
#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    /// Base URL of the generation service, e.g. `https://gen.example.com`.
    pub base_url: String,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Default timeout for the whole streaming request.
    pub timeout: Duration,
}

impl HttpBackendConfig {
    /// Creates a config for `base_url` with no token and a 120s timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `PACER_BACKEND_URL`, `PACER_BACKEND_TOKEN` and
    /// `PACER_BACKEND_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, BackendError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, BackendError> {
        let base_url = lookup("PACER_BACKEND_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(BackendError::Config(
                "missing PACER_BACKEND_URL for the HTTP backend".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        if let Some(token) = lookup("PACER_BACKEND_TOKEN").filter(|t| !t.trim().is_empty()) {
            config.token = Some(token);
        }
        if let Some(raw) = lookup("PACER_BACKEND_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                BackendError::Config(format!("invalid PACER_BACKEND_TIMEOUT_SECS: {raw}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Sets the bearer token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides the default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn generate_url(&self) -> String {
        format!("{}/v1/generate", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_url_is_config_error() {
        let err = HttpBackendConfig::from_lookup(lookup(&[])).expect_err("no url");
        assert!(matches!(err, BackendError::Config(msg) if msg.contains("PACER_BACKEND_URL")));
    }

    #[test]
    fn reads_token_and_timeout() {
        let config = HttpBackendConfig::from_lookup(lookup(&[
            ("PACER_BACKEND_URL", "http://localhost:8080/"),
            ("PACER_BACKEND_TOKEN", "secret"),
            ("PACER_BACKEND_TIMEOUT_SECS", "15"),
        ]))
        .expect("config");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.generate_url(), "http://localhost:8080/v1/generate");
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let err = HttpBackendConfig::from_lookup(lookup(&[
            ("PACER_BACKEND_URL", "http://x"),
            ("PACER_BACKEND_TIMEOUT_SECS", "soon"),
        ]))
        .expect_err("bad timeout");
        assert!(matches!(err, BackendError::Config(_)));
    }
}
