//! Axum HTTP gateway exposing the pass-through operations.
//!
//! Every route accepts plain query/body parameters, runs the matching
//! bridge operation, and lifts the intended status out of the reply into
//! the transport status code (stripping it from the body). Session
//! handling is per request: an Origin check against the configured
//! allowlist plus the caller's session key from `X-Session-Token`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bridge::{AgentsQuery, Bridge, param_error};
use crate::config::GatewayConfig;
use crate::error::{Error, GatewayError};
use crate::remote::ApiReply;
use crate::session::SessionIdentity;

/// Header carrying the caller's opaque session key.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Shared state for all gateway handlers.
pub struct GatewayState {
    pub bridge: Bridge,
    pub config: GatewayConfig,
}

impl GatewayState {
    /// Validate the request's origin and session key, producing the
    /// session identity every operation is keyed by.
    fn session_identity(&self, headers: &HeaderMap) -> Result<SessionIdentity, Response> {
        if let Some(origin) = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .filter(|o| !o.is_empty())
        {
            let origin = origin
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            if self.config.allowed_domains.is_empty()
                || !self.config.allowed_domains.iter().any(|d| d == origin)
            {
                return Err(forbidden("Domain error"));
            }
        }

        let token = headers
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| forbidden("Error on token"))?;

        Ok(SessionIdentity::new(
            token,
            &self.config.linked_session_suffix,
        ))
    }
}

fn forbidden(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// Lift the reply's intended status into the transport status. 204 must
/// carry no body; everything else ships the JSON body as-is.
fn lift(result: Result<ApiReply, Error>) -> Response {
    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("Operation failed: {e}");
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
            return (status, Json(e.to_error_body())).into_response();
        }
    };

    let status = StatusCode::from_u16(reply.code).unwrap_or(StatusCode::OK);
    if status == StatusCode::NO_CONTENT {
        return status.into_response();
    }
    (status, Json(reply.body)).into_response()
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/hours-of-operation", get(hours_of_operation_handler))
        .route("/agents-availability", get(agents_availability_handler))
        .route("/chat-profile", get(chat_profile_handler))
        .route("/make-chat", post(make_chat_handler))
        .route("/get-response", get(get_response_handler))
        .route("/send-text", post(send_text_handler))
        .route("/end-chat", post(end_chat_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
) -> Result<SocketAddr, GatewayError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::StartupFailed(format!("failed to bind to {addr}: {e}")))?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| GatewayError::StartupFailed(format!("failed to get local addr: {e}")))?;

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Gateway server exited: {e}");
        }
    });

    tracing::info!("Gateway listening on {bound_addr}");
    Ok(bound_addr)
}

#[derive(Debug, Deserialize)]
struct HoursQuery {
    #[serde(rename = "profileIdHoursOperation")]
    profile_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatProfileQuery {
    point_of_contact: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollQuery {
    chat_session_id: Option<String>,
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSessionQuery {
    chat_session_id: Option<String>,
}

async fn hours_of_operation_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<HoursQuery>,
) -> Response {
    let identity = match state.session_identity(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    let profile_id = query.profile_id.as_deref().filter(|p| !p.is_empty());
    lift(
        state
            .bridge
            .hours_of_operation(&identity, profile_id)
            .await,
    )
}

async fn agents_availability_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<AgentsQuery>,
) -> Response {
    let identity = match state.session_identity(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    lift(state.bridge.agents_availability(&identity, &query).await)
}

async fn chat_profile_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<ChatProfileQuery>,
) -> Response {
    let identity = match state.session_identity(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    let Some(point_of_contact) = query.point_of_contact.filter(|p| !p.is_empty()) else {
        return lift(Ok(param_error(Some("pointOfContact"))));
    };
    lift(state.bridge.chat_profile(&identity, &point_of_contact).await)
}

async fn make_chat_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let identity = match state.session_identity(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    let Ok(payload) = serde_json::from_str::<Value>(&body) else {
        return lift(Ok(param_error(None)));
    };
    lift(state.bridge.make_chat(&identity, &payload).await)
}

async fn get_response_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<PollQuery>,
) -> Response {
    let identity = match state.session_identity(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    let Some(chat_session_id) = query.chat_session_id.filter(|c| !c.is_empty()) else {
        return lift(Ok(param_error(None)));
    };
    lift(
        state
            .bridge
            .get_response(&identity, &chat_session_id, query.timeout.unwrap_or(0))
            .await,
    )
}

async fn send_text_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<ChatSessionQuery>,
    body: String,
) -> Response {
    let identity = match state.session_identity(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    let Some(chat_session_id) = query.chat_session_id.filter(|c| !c.is_empty()) else {
        return lift(Ok(param_error(None)));
    };
    let Ok(payload) = serde_json::from_str::<Value>(&body) else {
        return lift(Ok(param_error(None)));
    };
    lift(
        state
            .bridge
            .send_text(&identity, &chat_session_id, &payload)
            .await,
    )
}

async fn end_chat_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<ChatSessionQuery>,
) -> Response {
    let identity = match state.session_identity(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    let Some(chat_session_id) = query.chat_session_id.filter(|c| !c.is_empty()) else {
        return lift(Ok(param_error(None)));
    };
    lift(state.bridge.end_chat(&identity, &chat_session_id).await)
}
