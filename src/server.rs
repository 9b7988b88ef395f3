// HTTP server.
// Ranking and dispatch routes over axum, with errors mapped to JSON responses.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchItem, LocalDispatcher, wire};
use crate::config::DISPATCH_TOKEN_ENV;
use crate::error::{Result, StarboardError};
use crate::service::{ACCEPTED_FORMATS, RankingOptions, Rankings, Target};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub rankings: Arc<Rankings>,
    pub dispatcher: Arc<LocalDispatcher>,
    /// Bearer token callers of the dispatch route must present.
    pub dispatch_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rankings/:segment", get(rankings))
        .route("/api/dispatch", post(dispatch))
        .fallback(not_found)
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn rankings(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    query: std::result::Result<Query<RankingOptions>, QueryRejection>,
) -> Response {
    let Some(target) = Target::parse(&segment) else {
        return bad_request(format!("unrecognized window '{segment}'"));
    };
    let Query(options) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    debug!(%segment, ?options, "ranking request");

    match state.rankings.rank(&target, &options).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Run a batch on the local pool and stream its events.
async fn dispatch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<Vec<DispatchItem>>, JsonRejection>,
) -> Response {
    if let Err(e) = authorize(&headers, state.dispatch_token.as_deref()) {
        return e.into_response();
    }
    let items = match body {
        Ok(Json(items)) => items,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let count = items.len();
    let events = match state.dispatcher.start(items) {
        Ok(events) => events,
        Err(e) => return e.into_response(),
    };
    info!(items = count, "dispatch batch started");

    let frames = futures::stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        Some((Ok::<_, Infallible>(wire::encode(&event)), events))
    });

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(frames),
    )
        .into_response()
}

/// Check `Authorization: Bearer <token>` against the configured token.
fn authorize(headers: &HeaderMap, expected: Option<&str>) -> Result<()> {
    let expected = expected.ok_or(StarboardError::MissingToken(DISPATCH_TOKEN_ENV))?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(StarboardError::Unauthorized),
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not found",
            "routes": ["/health", "/api/rankings/{window}", "/api/dispatch"],
        })),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message, "accepted": ACCEPTED_FORMATS })),
    )
        .into_response()
}

impl StarboardError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ItemTooLarge { .. } | Self::BatchTooLarge { .. } | Self::ResultTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for StarboardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_config() {
            error!(error = %self, "configuration error");
        } else {
            warn!(error = %self, status = status.as_u16(), "request failed");
        }
        let body = Json(json!({ "error": self.to_string() }));
        if matches!(self, Self::Unauthorized) {
            let challenge = [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))];
            return (status, challenge, body).into_response();
        }
        (status, body).into_response()
    }
}
