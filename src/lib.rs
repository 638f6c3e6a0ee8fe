use axum::{
    Json, Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use std::sync::Arc;
use thiserror::Error;
use utoipa::OpenApi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod token;

// Routing split by access level (public, any principal, Author role).
pub mod routes;
use routes::{author, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use memory::MemoryRepository;
pub use repository::{CredentialStoreState, PostRepositoryState, PostgresRepository};
pub use service::AuthService;
pub use token::TokenIssuer;

/// Shared, read-only token issuer. The only holder of the signing secret after startup.
pub type TokenState = Arc<TokenIssuer>;

/// ApiDoc
///
/// OpenAPI description of every route and DTO, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root, handlers::health, handlers::register, handlers::login,
        handlers::refresh_token, handlers::get_me, handlers::get_user, handlers::update_user,
        handlers::delete_user, handlers::list_posts, handlers::get_post, handlers::create_post,
        handlers::update_post, handlers::publish_post, handlers::delete_post
    ),
    components(
        schemas(
            models::Role, models::PostStatus, models::Post, models::RegisterRequest,
            models::LoginRequest, models::RefreshTokenRequest, models::UpdateUserRequest,
            models::CreatePostRequest, models::UpdatePostRequest, models::UserResponse,
            models::AuthResponse, models::HealthResponse, models::MessageResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "microblog", description = "Microblog authentication and posts API")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Token(#[from] token::TokenError),
    #[error(transparent)]
    Password(#[from] password::PasswordError),
}

/// AppState
///
/// The single, cloneable container of every service a request can reach. Built once at
/// startup from the immutable `AppConfig`.
#[derive(Clone)]
pub struct AppState {
    /// Register, login, refresh and profile operations.
    pub auth: AuthService,
    /// Access-token validation for the auth middleware.
    pub tokens: TokenState,
    pub posts: PostRepositoryState,
    pub config: AppConfig,
}

impl AppState {
    /// new
    ///
    /// Wires the services over the given stores. Fails when the signing secret is empty
    /// or the bcrypt cost is rejected, both of which are fatal at startup.
    pub fn new(
        config: AppConfig,
        credentials: CredentialStoreState,
        posts: PostRepositoryState,
    ) -> Result<Self, StartupError> {
        let tokens: TokenState = Arc::new(TokenIssuer::from_config(&config)?);
        let hasher = password::PasswordHasher::new(config.bcrypt_cost)?;
        let auth = AuthService::new(credentials, tokens.clone(), hasher, config.store_timeout);

        Ok(Self {
            auth,
            tokens,
            posts,
            config,
        })
    }

    /// Both stores backed by one `MemoryRepository`.
    pub fn in_memory(config: AppConfig) -> Result<Self, StartupError> {
        let store = Arc::new(MemoryRepository::new());
        Self::new(config, store.clone(), store)
    }
}

// --- Axum FromRef Extractor Implementations ---

// Narrow projections of AppState. The auth gate only ever sees the token issuer, and the
// public auth handlers only the service, so neither can reach the stores or the config.

impl FromRef<AppState> for TokenState {
    fn from_ref(app_state: &AppState) -> TokenState {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for AuthService {
    fn from_ref(app_state: &AppState) -> AuthService {
        app_state.auth.clone()
    }
}

const X_REQUEST_ID: &str = "x-request-id";

/// create_router
///
/// Assembles the routing table and the middleware stack, outermost first:
/// CORS, request id, tracing, request id propagation, then `require_auth` in front of
/// every route. The Author routes carry their own role gate as a route layer.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS: the API is token-authenticated, not cookie-authenticated, so any origin may call it.
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static(X_REQUEST_ID);

    // 2. Routes and the global gate. Public paths are let through by the gate's
    //    allow-list, not by routing, so an unknown path is a 401 and not a 404.
    let gate_state = TokenState::from_ref(&state);
    let routes = Router::new()
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes())
        .merge(author::author_routes())
        .layer(middleware::from_fn_with_state(gate_state, auth::require_auth))
        .with_state(state);

    // 3. Observability, applied top to bottom:
    //    3a. assign an id to requests that arrive without one,
    //    3b. open the request span (the gate fills in `user_id` later),
    //    3c. echo the id back on the response.
    let observability = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Millis),
                ),
        )
        .layer(PropagateRequestIdLayer::new(x_request_id));

    // 4. CORS outermost, so preflights are answered before the gate sees them.
    routes.layer(observability).layer(cors)
}

/// request_span
///
/// One span per request. `user_id` starts empty and is recorded by `require_auth` once the
/// bearer token resolves, so every later event is attributable to a principal. Only the
/// path is logged: query strings may carry data we do not want in logs.
fn request_span(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
        user_id = tracing::field::Empty,
    )
}
