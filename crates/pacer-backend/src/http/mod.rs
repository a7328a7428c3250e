//! HTTP generation backend.
//!
//! POSTs the request as JSON and reads a `text/event-stream` response (see
//! [`transport`] for the frame format).
mod config;
pub(crate) mod transport;

pub use config::HttpBackendConfig;

use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::backend::{BackendEvent, BackendStream, GenerationBackend};
use crate::errors::BackendError;
use crate::model::{BackendId, GenerationRequest};

use transport::{SseDecoder, decode_frame};

const HTTP_BACKEND: &str = "http";

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Backend that streams generations from a remote service over SSE.
pub struct HttpBackend {
    id: BackendId,
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    /// Creates a backend registered under the `http` id.
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        Self::with_id(HTTP_BACKEND, config)
    }

    /// Creates a backend registered under a custom id.
    pub fn with_id(id: impl Into<BackendId>, config: HttpBackendConfig) -> Result<Self, BackendError> {
        if config.base_url.trim().is_empty() {
            return Err(BackendError::Config(
                "HTTP backend base_url must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            id: id.into(),
            client,
            config,
        })
    }

    /// Creates a backend from `PACER_BACKEND_*` environment variables.
    pub fn from_env() -> Result<Self, BackendError> {
        Self::new(HttpBackendConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl GenerationBackend for HttpBackend {
    fn id(&self) -> BackendId {
        self.id.clone()
    }

    async fn open_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<BackendStream, BackendError> {
        debug!(request_id = %request.request_id, backend = %self.id, "opening generation stream");
        let mut http_req = self
            .client
            .post(self.config.generate_url())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request_body(&request));
        if let Some(token) = &self.config.token {
            http_req = http_req.bearer_auth(token);
        }
        if let Some(timeout) = request.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req.send().await.map_err(|e| {
            BackendError::transport(self.id.clone(), format!("generation request failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::backend(
                self.id.clone(),
                format!("generation request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let bytes: ByteStream = Box::pin(response.bytes_stream());
        Ok(BackendStream::new(sse_events(self.id.clone(), bytes)))
    }
}

fn request_body(request: &GenerationRequest) -> serde_json::Value {
    serde_json::json!({
        "request_id": request.request_id,
        "prompt": request.prompt,
        "params": request.params,
        "stream": true,
    })
}

struct SseState {
    id: BackendId,
    bytes: ByteStream,
    decoder: SseDecoder,
    ready: VecDeque<BackendEvent>,
    exhausted: bool,
}

fn sse_events(
    id: BackendId,
    bytes: ByteStream,
) -> impl futures::Stream<Item = Result<BackendEvent, BackendError>> + Send {
    let state = SseState {
        id,
        bytes,
        decoder: SseDecoder::default(),
        ready: VecDeque::new(),
        exhausted: false,
    };
    stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Ok(Some((event, state)));
            }
            if state.exhausted {
                return Ok(None);
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.feed(&state.id, &chunk)? {
                        if let Some(event) = decode_frame(&state.id, &frame)? {
                            state.ready.push_back(event);
                        }
                    }
                }
                Some(Err(e)) => {
                    return Err(BackendError::transport(
                        state.id,
                        format!("reading generation stream failed: {e}"),
                    ));
                }
                None => state.exhausted = true,
            }
        }
    })
}
