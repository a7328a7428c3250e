use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use pacer_backend::{BackendId, GenerationBackend, GenerationRequest};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use crate::config::RenderConfig;
use crate::driver::SessionDriver;
use crate::errors::RenderError;
use crate::handle::{CancelHandle, SessionHandle, VisibilityHandle};
use crate::history::HistorySink;
use crate::session::StreamSession;

/// The session currently occupying a slot.
pub(crate) struct SlotEntry {
    pub(crate) session_id: uuid::Uuid,
    pub(crate) cancel: CancelHandle,
}

struct RendererInner {
    backends: HashMap<BackendId, Arc<dyn GenerationBackend>>,
    config: RenderConfig,
    history: Option<Arc<dyn HistorySink>>,
    slots: Arc<DashMap<String, SlotEntry>>,
}

/// Entry point for starting paced render sessions.
///
/// A slot is one output surface (a message bubble, a pane). At most one
/// session renders into a slot at a time.
#[derive(Clone)]
pub struct Renderer {
    inner: Arc<RendererInner>,
}

impl Renderer {
    pub fn builder() -> RendererBuilder {
        RendererBuilder::default()
    }

    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    /// Starts a session for `request` in `slot` and spawns its driver task.
    ///
    /// A session already running in the same slot is cancelled first. Must be
    /// called from within a Tokio runtime.
    pub fn start(
        &self,
        slot: impl Into<String>,
        request: GenerationRequest,
    ) -> Result<SessionHandle, RenderError> {
        let slot = slot.into();
        validate_request(&slot, &request)?;
        let backend = self
            .inner
            .backends
            .get(&request.backend)
            .cloned()
            .ok_or_else(|| RenderError::BackendNotFound {
                backend: request.backend.to_string(),
            })?;

        let config = self.inner.config.clone();
        let session = StreamSession::new(uuid::Uuid::new_v4(), &config);
        let session_id = session.id();
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (cancel, cancel_rx) = CancelHandle::new();
        let (visibility, visibility_rx) = VisibilityHandle::new();

        if let Some(previous) = self.inner.slots.insert(
            slot.clone(),
            SlotEntry {
                session_id,
                cancel: cancel.clone(),
            },
        ) {
            info!(slot = %slot, replaced = %previous.session_id, session_id = %session_id, "replacing session in slot");
            previous.cancel.cancel();
        }

        info!(
            session_id = %session_id,
            slot = %slot,
            request_id = %request.request_id,
            backend = %request.backend,
            "starting render session"
        );
        let driver = SessionDriver {
            session,
            slot: slot.clone(),
            backend,
            request,
            config,
            history: self.inner.history.clone(),
            slots: self.inner.slots.clone(),
            events: events_tx,
            snapshot: snapshot_tx,
            cancel_rx,
            visibility_rx,
        };
        tokio::spawn(driver.run(final_tx));

        Ok(SessionHandle {
            id: session_id,
            slot,
            events: events_rx,
            final_rx,
            snapshot: snapshot_rx,
            cancel,
            visibility,
            saw_terminal: false,
        })
    }

    /// Cancels whatever session occupies `slot`. Returns whether one did.
    pub fn cancel_slot(&self, slot: &str) -> bool {
        match self.inner.slots.remove(slot) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Id of the session currently running in `slot`.
    pub fn active_session(&self, slot: &str) -> Option<uuid::Uuid> {
        self.inner.slots.get(slot).map(|entry| entry.session_id)
    }
}

fn validate_request(slot: &str, request: &GenerationRequest) -> Result<(), RenderError> {
    if slot.trim().is_empty() {
        return Err(RenderError::Validation("slot must not be empty".into()));
    }
    if request.backend.as_str().trim().is_empty() {
        return Err(RenderError::Validation(
            "backend id must not be empty".into(),
        ));
    }
    if request.prompt.trim().is_empty() {
        return Err(RenderError::Validation("prompt must not be empty".into()));
    }
    if request.timeout.is_some_and(|t| t.is_zero()) {
        return Err(RenderError::Validation(
            "request timeout must be greater than 0".into(),
        ));
    }
    Ok(())
}

/// Registers backends and shared settings before creating a [`Renderer`].
#[derive(Default)]
pub struct RendererBuilder {
    backends: Vec<Arc<dyn GenerationBackend>>,
    config: Option<RenderConfig>,
    history: Option<Arc<dyn HistorySink>>,
}

impl RendererBuilder {
    /// Registers a backend. One backend per id.
    pub fn register_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn config(mut self, config: RenderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sink that receives every completed generation.
    pub fn history_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.history = Some(sink);
        self
    }

    /// Builds the renderer, rejecting duplicate backend ids and invalid
    /// configuration.
    pub fn build(self) -> Result<Renderer, RenderError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let mut backends: HashMap<BackendId, Arc<dyn GenerationBackend>> = HashMap::new();
        let mut seen: HashSet<BackendId> = HashSet::new();
        for backend in self.backends {
            let id = backend.id();
            if !seen.insert(id.clone()) {
                return Err(RenderError::Config(format!(
                    "duplicate backend registration: {id}"
                )));
            }
            backends.insert(id, backend);
        }
        Ok(Renderer {
            inner: Arc::new(RendererInner {
                backends,
                config,
                history: self.history,
                slots: Arc::new(DashMap::new()),
            }),
        })
    }
}
