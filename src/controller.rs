//! Per-session input and generation state.
//!
//! A [`Controller`] owns the form input and the [`GenerationState`] of one
//! session. `submit` hands the input to a [`CopyGenerator`] on a spawned task
//! and returns immediately; the task writes the outcome back when it resolves.
//! Every submit gets a fresh request id and only the outcome for the latest id
//! is applied, so an older call resolving late cannot overwrite a newer one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::{sync::broadcast, task::JoinHandle};
use uuid::Uuid;

use crate::events::SessionEvent;
use crate::model::{AdCopy, AdInput, Field, GenerationState};
use crate::providers::{CopyGenerator, GenerateError};

pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("{0} is required")]
    MissingField(Field),
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub session_id: Uuid,
    pub input: AdInput,
    #[serde(flatten)]
    pub generation: GenerationState,
    pub updated_at: DateTime<Utc>,
}

/// Handle for one accepted submit.
pub struct Submission {
    pub request_id: u64,
    handle: JoinHandle<()>,
}

impl Submission {
    /// Resolves once the generation call has finished and its outcome was applied or dropped.
    pub async fn finished(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(request_id = self.request_id, error = %e, "generation task panicked");
        }
    }
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    session_id: Uuid,
    generator: Arc<dyn CopyGenerator>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<SessionState>,
}

struct SessionState {
    input: AdInput,
    generation: GenerationState,
    last_request: u64,
    updated_at: DateTime<Utc>,
}

impl SessionState {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Controller {
    pub fn new(
        session_id: Uuid,
        generator: Arc<dyn CopyGenerator>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id,
                generator,
                events,
                state: Mutex::new(SessionState {
                    input: AdInput::default(),
                    generation: GenerationState::Idle,
                    last_request: 0,
                    updated_at: Utc::now(),
                }),
            }),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn snapshot(&self) -> Snapshot {
        let st = self.inner.state.lock();
        Snapshot {
            session_id: self.inner.session_id,
            input: st.input.clone(),
            generation: st.generation.clone(),
            updated_at: st.updated_at,
        }
    }

    /// Time of the last state change, or `None` while a request is in flight.
    pub fn idle_since(&self) -> Option<DateTime<Utc>> {
        let st = self.inner.state.lock();
        match st.generation {
            GenerationState::Loading { .. } => None,
            _ => Some(st.updated_at),
        }
    }

    pub fn update_field(&self, field: Field, value: impl Into<String>) {
        {
            let mut st = self.inner.state.lock();
            st.input.set(field, value.into());
            st.touch();
        }
        self.emit(SessionEvent::InputChanged { session_id: self.inner.session_id, field });
    }

    /// Starts a generation for the current input.
    ///
    /// Must be called from within a tokio runtime. Fails without touching any
    /// state when a field is empty.
    pub fn submit(&self) -> Result<Submission, SubmitError> {
        let session_id = self.inner.session_id;
        let (request_id, input) = {
            let mut st = self.inner.state.lock();
            if let Some(field) = st.input.first_missing() {
                tracing::debug!(%session_id, %field, "submit rejected: missing field");
                return Err(SubmitError::MissingField(field));
            }
            st.last_request += 1;
            let request_id = st.last_request;
            st.generation = GenerationState::Loading { request_id };
            st.touch();
            (request_id, st.input.clone())
        };

        tracing::info!(%session_id, request_id, provider = self.inner.generator.name(), "generating ad copy");
        self.emit(SessionEvent::Loading { session_id, request_id });

        let ctl = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = ctl.inner.generator.generate(&input).await;
            ctl.complete(request_id, outcome);
        });
        Ok(Submission { request_id, handle })
    }

    /// Drops the displayed result. The status is left as it was.
    pub fn clear_results(&self) {
        {
            let mut st = self.inner.state.lock();
            if let GenerationState::Success { copy } = &mut st.generation {
                *copy = None;
                st.touch();
            }
        }
        self.emit(SessionEvent::Cleared { session_id: self.inner.session_id });
    }

    fn complete(&self, request_id: u64, outcome: Result<AdCopy, GenerateError>) {
        let session_id = self.inner.session_id;
        let event = {
            let mut st = self.inner.state.lock();
            let current = matches!(st.generation, GenerationState::Loading { request_id: id } if id == request_id);
            if !current {
                tracing::debug!(%session_id, request_id, latest = st.last_request, "dropping stale generation result");
                SessionEvent::Superseded { session_id, request_id }
            } else {
                st.touch();
                match outcome {
                    Ok(copy) => {
                        st.generation = GenerationState::Success { copy: Some(copy.clone()) };
                        SessionEvent::Succeeded { session_id, request_id, copy }
                    }
                    Err(e) => {
                        let mut message = e.to_string();
                        if message.is_empty() {
                            message = UNEXPECTED_ERROR.to_string();
                        }
                        st.generation = GenerationState::Error { message: message.clone() };
                        SessionEvent::Failed { session_id, request_id, error: message }
                    }
                }
            }
        };
        match &event {
            SessionEvent::Succeeded { .. } => tracing::info!(%session_id, request_id, "ad copy ready"),
            SessionEvent::Failed { error, .. } => tracing::warn!(%session_id, request_id, %error, "ad copy generation failed"),
            _ => {}
        }
        self.emit(event);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; events are only for live viewers.
        let _ = self.inner.events.send(event);
    }
}
