use crate::{
    AppState,
    auth::{AUTHOR_ONLY, RoleGate, require_role},
    handlers,
};
use axum::{
    Router, middleware,
    routing::{patch, post, put},
};

/// Author Router Module
///
/// Post mutations. The `RoleGate` route layer rejects non-Authors with 403 before the
/// handler runs; update, delete and publish additionally check that the caller owns the
/// post. These method routers share paths with `authenticated_routes` and are merged
/// into them, so the role gate only wraps the methods registered here.
pub fn author_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/api/posts", post(handlers::create_post))
        .route(
            "/api/posts/{id}",
            put(handlers::update_post).delete(handlers::delete_post),
        )
        .route("/api/posts/{id}/status", patch(handlers::publish_post))
        .route_layer(middleware::from_fn_with_state(
            RoleGate(AUTHOR_ONLY),
            require_role,
        ))
}
