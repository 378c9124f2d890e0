use std::{collections::HashMap, sync::Arc, time::Duration};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{sse::{Event, KeepAlive, Sse}, Html, IntoResponse},
    routing::{delete, get, post, put},
    Json, Router,
};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use chrono::{DateTime, Utc};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::{
    controller::{Controller, Snapshot, SubmitError},
    events::SessionEvent,
    model::Field,
    providers::CopyGenerator,
};

const INDEX_HTML: &str = include_str!("../static/index.html");
const SWEEP_EVERY: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    generator: Arc<dyn CopyGenerator>,
    sessions: Arc<Mutex<HashMap<Uuid, Controller>>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl AppState {
    pub fn new(generator: Arc<dyn CopyGenerator>) -> Self {
        let (tx, _rx) = broadcast::channel::<SessionEvent>(256);
        Self { generator, sessions: Arc::new(Mutex::new(HashMap::new())), events_tx: tx }
    }

    async fn session(&self, id: Uuid) -> Result<Controller, ApiErr> {
        self.sessions.lock().await.get(&id).cloned().ok_or_else(|| ApiErr::session_not_found(id))
    }

    /// Drops sessions with no state change for longer than `ttl`. In-flight sessions stay.
    pub async fn sweep_idle(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|id, ctl| {
            let expired = ctl
                .idle_since()
                .and_then(|since| (now - since).to_std().ok())
                .is_some_and(|idle| idle > ttl);
            if expired {
                tracing::info!(session_id = %id, "session expired");
            }
            !expired
        });
        before - sessions.len()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/input", put(update_field))
        .route("/api/sessions/{id}/generate", post(generate))
        .route("/api/sessions/{id}/results", delete(clear_results))
        .route("/api/sessions/{id}/events", get(session_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: String, session_ttl: Duration, generator: Arc<dyn CopyGenerator>) -> Result<()> {
    let state = AppState::new(generator);
    if session_ttl.is_zero() {
        tracing::info!("session expiry disabled");
    } else {
        let sweeper = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_EVERY);
            loop {
                tick.tick().await;
                let dropped = sweeper.sweep_idle(Utc::now(), session_ttl).await;
                if dropped > 0 {
                    tracing::debug!(dropped, "idle sessions swept");
                }
            }
        });
    }
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(%bind, "adcopy listening on http://{bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct CreateSessionResp { session_id: Uuid }

async fn create_session(State(st): State<AppState>) -> (StatusCode, Json<CreateSessionResp>) {
    let session_id = Uuid::new_v4();
    let ctl = Controller::new(session_id, st.generator.clone(), st.events_tx.clone());
    st.sessions.lock().await.insert(session_id, ctl);
    tracing::info!(%session_id, "session opened");
    (StatusCode::CREATED, Json(CreateSessionResp { session_id }))
}

async fn get_session(State(st): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Snapshot>, ApiErr> {
    Ok(Json(st.session(id).await?.snapshot()))
}

async fn delete_session(State(st): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiErr> {
    match st.sessions.lock().await.remove(&id) {
        Some(_) => {
            tracing::info!(session_id = %id, "session closed");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiErr::session_not_found(id)),
    }
}

#[derive(Deserialize)]
struct FieldUpdate {
    name: String,
    value: String,
}

async fn update_field(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FieldUpdate>,
) -> Result<StatusCode, ApiErr> {
    let ctl = st.session(id).await?;
    let field: Field = req.name.parse().map_err(|e| ApiErr::bad_request(format!("{e}")))?;
    ctl.update_field(field, req.value);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct GenerateResp { request_id: u64 }

async fn generate(State(st): State<AppState>, Path(id): Path<Uuid>) -> Result<(StatusCode, Json<GenerateResp>), ApiErr> {
    let ctl = st.session(id).await?;
    // The submission runs detached; progress is reported through the session's events.
    let submission = ctl.submit()?;
    Ok((StatusCode::ACCEPTED, Json(GenerateResp { request_id: submission.request_id })))
}

async fn clear_results(State(st): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiErr> {
    st.session(id).await?.clear_results();
    Ok(StatusCode::NO_CONTENT)
}

async fn session_events(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>>, ApiErr> {
    st.session(id).await?;
    let rx = st.events_tx.subscribe();

    let stream = BroadcastStream::new(rx)
        .filter_map(move |msg| futures_util::future::ready(viewer_event(id, msg)))
        .filter_map(|evt| async move {
            match Event::default().event("message").json_data(&evt) {
                Ok(e) => Some(Ok(e)),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to encode session event");
                    None
                }
            }
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Picks what one session's viewer sees from the shared channel.
fn viewer_event(id: Uuid, msg: Result<SessionEvent, BroadcastStreamRecvError>) -> Option<SessionEvent> {
    match msg {
        Ok(evt) => (evt.session_id() == id).then_some(evt),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(session_id = %id, skipped, "event viewer lagged; asking it to resync");
            Some(SessionEvent::Resync { session_id: id })
        }
    }
}

#[derive(Debug)]
struct ApiErr {
    status: StatusCode,
    code: String,
    message: String,
    suggestion: Option<String>,
    field: Option<Field>,
}

impl ApiErr {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: message.into(),
            suggestion: None,
            field: None,
        }
    }

    fn session_not_found(id: Uuid) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "session_not_found".to_string(),
            message: format!("No session with id {id}"),
            suggestion: Some("Reload the page to start a new session.".to_string()),
            field: None,
        }
    }
}

impl From<SubmitError> for ApiErr {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::MissingField(field) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "validation".to_string(),
                message: e.to_string(),
                suggestion: Some("Fill in product name, target audience and key features.".to_string()),
                field: Some(field),
            },
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            suggestion: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            field: Option<Field>,
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code,
                suggestion: self.suggestion,
                field: self.field,
            }),
        )
            .into_response()
    }
}
