use crate::{AppState, handlers, openapi_json};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Every path here must also appear in `auth::PUBLIC_PATHS`, otherwise the global gate
/// answers 401 before the handler runs.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::root))
        // GET /health
        // Liveness check, returns service name and current time.
        .route("/health", get(handlers::health))
        .route("/api-docs/openapi.json", get(openapi_json))
        // --- Session lifecycle ---
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        // POST /api/auth/refresh-token
        // Single-use rotation: the presented refresh token is replaced on success.
        .route("/api/auth/refresh-token", post(handlers::refresh_token))
}
