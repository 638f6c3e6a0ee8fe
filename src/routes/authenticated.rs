use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Routes open to any principal that passed `require_auth`, whatever its role. Handlers
/// receive the `Principal` extractor and enforce self/owner rules themselves:
/// `PUT`/`DELETE /api/users/{id}` are owner-only, `GET /api/users/{id}` is self or Author.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/api/me", get(handlers::get_me))
        .route(
            "/api/users/{id}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        // GET /api/posts
        // Authors see their own posts, Readers see published posts.
        .route("/api/posts", get(handlers::list_posts))
        .route("/api/posts/{id}", get(handlers::get_post))
}
