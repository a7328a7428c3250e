use std::fmt;
use std::time::Duration;

/// Stable identifier for a backend implementation (for example `http`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BackendId(pub String);

impl BackendId {
    /// Creates a backend id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the backend id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BackendId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A single generation request handed to a backend.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationRequest {
    /// Unique id for this request; echoed to the backend for correlation.
    pub request_id: uuid::Uuid,
    /// Backend that should serve the request.
    pub backend: BackendId,
    /// User prompt.
    pub prompt: String,
    /// Free-form backend parameters (tone, length, template id, ...).
    #[serde(default)]
    pub params: serde_json::Value,
    /// Optional upper bound on how long the backend request may take.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    /// Creates a request with a fresh id and no extra parameters.
    pub fn new(backend: impl Into<BackendId>, prompt: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4(),
            backend: backend.into(),
            prompt: prompt.into(),
            params: serde_json::Value::Null,
            timeout: None,
        }
    }

    /// Attaches backend parameters.
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Sets a per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_has_no_params_or_timeout() {
        let req = GenerationRequest::new("http", "write a caption");
        assert_eq!(req.backend.as_str(), "http");
        assert!(req.params.is_null());
        assert!(req.timeout.is_none());
    }

    #[test]
    fn request_deserializes_without_optional_fields() {
        let req: GenerationRequest = serde_json::from_value(serde_json::json!({
            "request_id": uuid::Uuid::nil(),
            "backend": "scripted",
            "prompt": "hi",
        }))
        .expect("decode");
        assert_eq!(req.backend, BackendId::new("scripted"));
        assert!(req.params.is_null());
    }
}
