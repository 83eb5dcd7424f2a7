//! HTTP request handlers and router.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use tracing::{debug, error};

use crate::auth::{self, AccessLogLayer, Credentials};
use crate::state::{AppState, SharedMetrics};

// ============================================================
// Metrics
// ============================================================

pub(crate) async fn handle_metrics(State(metrics): AppState) -> Result<Response, StatusCode> {
    let body = metrics.encode().map_err(|e| {
        error!(error = %e, "failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    debug!(bytes = body.len(), "metrics scraped");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, metrics.content_type())
        .body(Body::from(body))
        .map_err(|e| {
            error!(error = %e, "failed to build metrics response");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

// ============================================================
// Health
// ============================================================

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Router
// ============================================================

/// Builds the exposition router. Basic auth covers every route when set.
pub(crate) fn router(metrics: SharedMetrics, credentials: Option<Arc<Credentials>>) -> Router {
    let mut app = Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .with_state(metrics);

    if let Some(creds) = credentials {
        app = app.layer(axum::middleware::from_fn_with_state(
            creds,
            auth::basic_auth_middleware,
        ));
    }

    // Outermost, so rejected requests are logged too.
    app.layer(AccessLogLayer)
}
