use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Identity & Roles ---

/// Role
///
/// The closed set of account roles. `Author` may write posts, `Reader` may only read.
/// Serialized exactly as the variant name ("Author" / "Reader").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum Role {
    Author,
    Reader,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Author, Role::Reader];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Author => "Author",
            Role::Reader => "Reader",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the known role names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("role must be Author or Reader, got {0:?}")]
pub struct InvalidRole(pub String);

impl FromStr for Role {
    type Err = InvalidRole;

    // Case-sensitive on purpose: "author" is not a role.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Author" => Ok(Role::Author),
            "Reader" => Ok(Role::Reader),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

/// Identity
///
/// One registered account as held by the credential store. Deliberately not `Serialize`:
/// the password hash and refresh-token digest must never reach a response body.
/// Use `UserResponse` for anything leaving the process.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    /// SHA-256 digest of the current refresh token, `None` once revoked.
    pub refresh_token: Option<String>,
    /// The stored refresh token is invalid at or after this instant.
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

/// Fields needed to create an `Identity`; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

// --- Posts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum PostStatus {
    Draft,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "Draft",
            PostStatus::Published => "Published",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(PostStatus::Draft),
            "Published" => Ok(PostStatus::Published),
            other => Err(format!("unknown post status {other:?}")),
        }
    }
}

/// Post
///
/// A microblog post. Owned by exactly one author (`author_id`); every mutation
/// checks that the caller is that author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub idempotency_key: Option<String>,
    pub title: String,
    pub content: String,
    pub status: PostStatus,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: Uuid,
    pub idempotency_key: Option<String>,
    pub title: String,
    pub content: String,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterRequest
///
/// Input payload for POST /api/auth/register. `role` stays a plain string so a bad value
/// produces a descriptive validation error instead of a generic body rejection.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    #[schema(example = "a@x.com")]
    pub email: String,
    #[schema(example = "secret1")]
    pub password: String,
    #[schema(example = "Author")]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// UpdateUserRequest
///
/// Input payload for PUT /api/users/{id}. Changing the role requires `currentPassword`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateUserRequest {
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreatePostRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdatePostRequest {
    pub title: String,
    pub content: String,
}

// --- Response Payloads (Output Schemas) ---

/// UserResponse
///
/// Public projection of an `Identity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<&Identity> for UserResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            role: identity.role,
        }
    }
}

/// AuthResponse
///
/// Success body shared by register, login and refresh-token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[ts(type = "string")]
    pub access_token_expires_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    #[ts(type = "string")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

/// ErrorResponse
///
/// Body of every non-2xx response produced by this service.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorResponse {
    pub error: String,
}
