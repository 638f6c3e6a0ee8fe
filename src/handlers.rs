use crate::{
    AppState, AuthService,
    auth::Principal,
    error::ApiError,
    models::{
        AuthResponse, CreatePostRequest, ErrorResponse, HealthResponse, LoginRequest,
        MessageResponse, NewPost, Post, PostStatus, RefreshTokenRequest, RegisterRequest, Role,
        UpdatePostRequest, UpdateUserRequest, UserResponse,
    },
};
use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

type JsonBody<T> = Result<Json<T>, JsonRejection>;
type IdParam = Result<Path<Uuid>, PathRejection>;

// --- Service Endpoints ---

/// health
///
/// [Public Route] Liveness check for monitoring and load balancers.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        timestamp: Utc::now(),
    })
}

/// root
///
/// [Public Route] Names the service and points at the OpenAPI document.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service banner", body = MessageResponse))
)]
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: format!(
            "{} {}: API description at /api-docs/openapi.json",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    })
}

// --- Authentication ---

/// register
///
/// [Public Route] Creates an identity and opens its first session. Validation failures
/// are 400 with a descriptive message; a taken email is 409.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = AuthResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
    )
)]
pub async fn register(
    State(auth): State<AuthService>,
    payload: JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let Json(payload) = payload?;
    let session = auth
        .register(&payload.email, &payload.password, &payload.role)
        .await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

/// login
///
/// [Public Route] Exchanges credentials for a token pair. An unknown email and a wrong
/// password produce byte-identical 401 responses.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    )
)]
pub async fn login(
    State(auth): State<AuthService>,
    payload: JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(payload) = payload?;
    let session = auth.login(&payload.email, &payload.password).await?;
    Ok(Json(session.into()))
}

/// refresh_token
///
/// [Public Route] Rotates a refresh token. The presented token is spent whether or not
/// the client receives the response.
#[utoipa::path(
    post,
    path = "/api/auth/refresh-token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Rotated", body = AuthResponse),
        (status = 401, description = "Invalid or expired refresh token", body = ErrorResponse)
    )
)]
pub async fn refresh_token(
    State(auth): State<AuthService>,
    payload: JsonBody<RefreshTokenRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(payload) = payload?;
    let session = auth.refresh_tokens(&payload.refresh_token).await?;
    Ok(Json(session.into()))
}

// --- Users ---

/// get_me
///
/// [Authenticated Route] Profile of the identity behind the access token.
#[utoipa::path(
    get,
    path = "/api/me",
    responses((status = 200, description = "Current user", body = UserResponse))
)]
pub async fn get_me(
    principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, ApiError> {
    // The token can outlive its identity, so a deleted account answers 404 here.
    let identity = state.auth.find_identity(principal.subject_id).await?;
    Ok(Json(UserResponse::from(&identity)))
}

/// get_user
///
/// [Authenticated Route] Readable by the user themself and by any Author.
#[utoipa::path(
    get,
    path = "/api/users/{id}",
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Not permitted", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn get_user(
    principal: Principal,
    State(state): State<AppState>,
    id: IdParam,
) -> Result<Json<UserResponse>, ApiError> {
    let Path(id) = id?;
    // Reading someone else's profile is an Author privilege.
    if principal.subject_id != id {
        principal.authorize(&[Role::Author])?;
    }
    let identity = state.auth.find_identity(id).await?;
    Ok(Json(UserResponse::from(&identity)))
}

/// update_user
///
/// [Authenticated Route] Owner only. Changing the role requires `currentPassword` and
/// ends the current refresh session.
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 403, description = "Not owner", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
    )
)]
pub async fn update_user(
    principal: Principal,
    State(state): State<AppState>,
    id: IdParam,
    payload: JsonBody<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    // Step 1: Ownership is checked before the body, so a stranger learns nothing from 400s.
    let Path(id) = id?;
    principal.ensure_owner(id)?;
    let Json(payload) = payload?;

    // Step 2: Validation, the password re-check and the revocation all live in the service.
    let updated = state
        .auth
        .update_profile(
            id,
            &payload.email,
            &payload.role,
            payload.current_password.as_deref(),
        )
        .await?;
    Ok(Json(UserResponse::from(&updated)))
}

/// delete_user
///
/// [Authenticated Route] Owner only. The identity's posts go with it.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not owner", body = ErrorResponse)
    )
)]
pub async fn delete_user(
    principal: Principal,
    State(state): State<AppState>,
    id: IdParam,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    principal.ensure_owner(id)?;
    state.auth.delete_account(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Posts ---

fn post_not_found() -> ApiError {
    ApiError::NotFound("post not found".to_string())
}

fn validate_post(title: &str, content: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    if content.trim().is_empty() {
        return Err(ApiError::BadRequest("content is required".to_string()));
    }
    Ok(())
}

// Loads a post the caller is about to mutate: 404 if absent, 403 if someone else's.
async fn owned_post(state: &AppState, principal: &Principal, id: Uuid) -> Result<Post, ApiError> {
    let post = state.posts.get_post(id).await?.ok_or_else(post_not_found)?;
    principal.ensure_owner(post.author_id)?;
    Ok(post)
}

/// list_posts
///
/// [Authenticated Route] Authors get their own posts (drafts included), Readers get
/// everything published.
#[utoipa::path(
    get,
    path = "/api/posts",
    responses((status = 200, description = "Posts", body = [Post]))
)]
pub async fn list_posts(
    principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Post>>, ApiError> {
    let posts = match principal.role {
        Role::Author => state.posts.get_posts_by_author(principal.subject_id).await?,
        Role::Reader => state.posts.get_published_posts().await?,
    };
    Ok(Json(posts))
}

/// get_post
///
/// [Authenticated Route] Drafts are only visible to their author; to anyone else they
/// do not exist.
#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    responses(
        (status = 200, description = "Post", body = Post),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn get_post(
    principal: Principal,
    State(state): State<AppState>,
    id: IdParam,
) -> Result<Json<Post>, ApiError> {
    let Path(id) = id?;
    let post = state.posts.get_post(id).await?.ok_or_else(post_not_found)?;
    if post.status == PostStatus::Draft && post.author_id != principal.subject_id {
        return Err(post_not_found());
    }
    Ok(Json(post))
}

/// create_post
///
/// [Author Route] Creates a draft. A repeated `idempotencyKey` from the same author
/// returns the post created the first time.
#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Created", body = Post),
        (status = 403, description = "Not an Author", body = ErrorResponse)
    )
)]
pub async fn create_post(
    principal: Principal,
    State(state): State<AppState>,
    payload: JsonBody<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let Json(payload) = payload?;
    validate_post(&payload.title, &payload.content)?;

    // An empty key counts as no key, otherwise every keyless retry would collapse into one post.
    let post = state
        .posts
        .create_post(NewPost {
            author_id: principal.subject_id,
            idempotency_key: payload.idempotency_key.filter(|key| !key.is_empty()),
            title: payload.title,
            content: payload.content,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// update_post
///
/// [Author Route] Replaces title and content of the caller's own post, draft or published.
#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    request_body = UpdatePostRequest,
    responses(
        (status = 200, description = "Updated", body = Post),
        (status = 403, description = "Not owner", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn update_post(
    principal: Principal,
    State(state): State<AppState>,
    id: IdParam,
    payload: JsonBody<UpdatePostRequest>,
) -> Result<Json<Post>, ApiError> {
    // Step 1: Existence and ownership (404, then 403).
    let Path(id) = id?;
    let Json(payload) = payload?;
    owned_post(&state, &principal, id).await?;

    // Step 2: Field validation.
    validate_post(&payload.title, &payload.content)?;

    // Step 3: Write. A None here means the post was deleted between the two calls.
    let post = state
        .posts
        .update_post(id, &payload.title, &payload.content)
        .await?
        .ok_or_else(post_not_found)?;
    Ok(Json(post))
}

/// publish_post
///
/// [Author Route] Moves the caller's draft to Published. Publishing twice is harmless.
#[utoipa::path(
    patch,
    path = "/api/posts/{id}/status",
    responses(
        (status = 200, description = "Published", body = Post),
        (status = 403, description = "Not owner", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn publish_post(
    principal: Principal,
    State(state): State<AppState>,
    id: IdParam,
) -> Result<Json<Post>, ApiError> {
    let Path(id) = id?;
    owned_post(&state, &principal, id).await?;

    let post = state
        .posts
        .publish_post(id)
        .await?
        .ok_or_else(post_not_found)?;
    Ok(Json(post))
}

/// delete_post
///
/// [Author Route] Removes one of the caller's posts.
#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not owner", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn delete_post(
    principal: Principal,
    State(state): State<AppState>,
    id: IdParam,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    owned_post(&state, &principal, id).await?;

    // false means a concurrent delete won the race; the post is gone either way, but say 404.
    if state.posts.delete_post(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(post_not_found())
    }
}
