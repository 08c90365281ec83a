use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use beach_commands_core::{
    CommandError, CommandRequest, CommandResponse, DiscoveredCommand, ErrorCondition,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::discovery::DiscoveryItems;
use crate::dispatcher::{reject_undecodable, Dispatcher};
use crate::session::SessionSnapshot;

#[derive(Clone)]
pub struct AppState {
    dispatcher: Dispatcher,
    discovery: Arc<DiscoveryItems>,
    metrics: Option<PrometheusHandle>,
    requester_header: Option<HeaderName>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, discovery: Arc<DiscoveryItems>) -> Self {
        Self {
            dispatcher,
            discovery,
            metrics: None,
            requester_header: None,
        }
    }

    /// Takes the requester identity from `header`, set by whatever fronts
    /// this server, instead of the `from` field of the body.
    pub fn with_requester_header(mut self, header: HeaderName) -> Self {
        self.requester_header = Some(header);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

#[derive(Serialize)]
struct SessionsResponse {
    active_sessions: usize,
    sweeper_running: bool,
    sessions: Vec<SessionSnapshot>,
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Protocol errors travel inside the response body, so this is always 200.
///
/// Without a requester header the body's `from` is trusted as is, which
/// leaves permission predicates to whoever can reach this listener.
async fn submit_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let mut request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!(error = %rejection, "rejecting undecodable command body");
            return Json(reject_undecodable("", "", "", rejection.body_text()));
        }
    };

    if let Some(name) = &state.requester_header {
        match headers.get(name).and_then(|value| value.to_str().ok()) {
            Some(requester) if !requester.is_empty() => request.from = requester.to_string(),
            _ => {
                warn!(header = %name, node = %request.node, "command request without requester");
                return Json(
                    CommandResponse::for_request(&request).with_error(
                        CommandError::new(ErrorCondition::Forbidden)
                            .with_text(format!("missing {name} header")),
                    ),
                );
            }
        }
    }

    Json(state.dispatcher.dispatch(request).await)
}

async fn list_commands(State(state): State<AppState>) -> Json<Vec<DiscoveredCommand>> {
    Json(state.discovery.items())
}

async fn node_info(State(state): State<AppState>, Path(node): Path<String>) -> impl IntoResponse {
    match state.discovery.node_info(&node) {
        Some(info) => Json(info).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "item-not-found", "node": node })),
        )
            .into_response(),
    }
}

async fn debug_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let sessions = state.dispatcher.sessions().snapshot();
    Json(SessionsResponse {
        active_sessions: sessions.len(),
        sweeper_running: state.dispatcher.sweeper_running(),
        sessions,
    })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/commands", get(list_commands).post(submit_command))
        .route("/commands/:node", get(node_info))
        .route("/debug/sessions", get(debug_sessions))
        .route("/metrics", get(metrics))
        .with_state(state)
}
