//! HTTP API for driving a session from a browser or script.
//!
//! # Endpoints
//!
//! - `GET /api/status` - Current session snapshot
//! - `POST /api/ask` - Submit a question
//! - `POST /api/next` - Show the next step
//! - `POST /api/back` - Show the previous step
//! - `POST /api/replay` - Replay the current step's narration
//! - `GET /ws` - View event stream
//!
//! # Example
//!
//! ```no_run
//! use mathboard_session::{create_router, AppState, SessionHandle, ViewBroadcaster};
//!
//! # async fn example(session: SessionHandle) {
//! let state = AppState::new(session, ViewBroadcaster::default());
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::controller::{ActionOutcome, IgnoredReason, SessionHandle};
use crate::error::MathboardError;
use crate::session_state::SessionSnapshot;
use crate::step::RequestId;
use crate::websocket::{ws_handler, ViewBroadcaster};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for the ask endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    /// The question text.
    pub prompt: String,
}

/// Response body for the ask endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    /// Identity of the new request.
    pub request_id: RequestId,
}

/// Response body for the navigation and replay endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Whether the action took effect.
    pub applied: bool,
    /// Why it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IgnoredReason>,
}

impl From<ActionOutcome> for ActionResponse {
    fn from(outcome: ActionOutcome) -> Self {
        match outcome {
            ActionOutcome::Applied => Self {
                applied: true,
                reason: None,
            },
            ActionOutcome::Ignored(reason) => Self {
                applied: false,
                reason: Some(reason),
            },
        }
    }
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state for the HTTP server and the view socket.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Command handle of the running controller.
    pub session: SessionHandle,
    /// Source of view events for `/ws` clients.
    pub broadcaster: ViewBroadcaster,
}

impl AppState {
    /// Creates the state from a session handle and broadcaster.
    #[must_use]
    pub const fn new(session: SessionHandle, broadcaster: ViewBroadcaster) -> Self {
        Self {
            session,
            broadcaster,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Wraps library errors for handlers.
#[derive(Debug)]
struct ApiError(MathboardError);

impl From<MathboardError> for ApiError {
    fn from(err: MathboardError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            MathboardError::EmptyInput => StatusCode::BAD_REQUEST,
            MathboardError::SessionClosed | MathboardError::TransportClosed { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the router with the API routes, the view socket, CORS, and
/// request tracing.
pub fn create_router(state: AppState) -> Router {
    // The browser view is served from elsewhere in development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handle_status))
        .route("/ask", post(handle_ask))
        .route("/next", post(handle_next))
        .route("/back", post(handle_back))
        .route("/replay", post(handle_replay));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.session.snapshot().await?))
}

/// Handler for `POST /api/ask`.
async fn handle_ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    info!(prompt_len = request.prompt.len(), "Question received");

    match state.session.ask(request.prompt).await {
        Ok(request_id) => Ok(Json(AskResponse { request_id })),
        Err(e) => {
            warn!(error = %e, "Question rejected");
            Err(e.into())
        }
    }
}

async fn handle_next(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActionResponse>, ApiError> {
    Ok(Json(state.session.next().await?.into()))
}

async fn handle_back(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActionResponse>, ApiError> {
    Ok(Json(state.session.back().await?.into()))
}

async fn handle_replay(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActionResponse>, ApiError> {
    Ok(Json(state.session.replay().await?.into()))
}

// ============================================================================
// Tests
// ============================================================================
