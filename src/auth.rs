use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::Span;
use uuid::Uuid;

use crate::{TokenState, error::ApiError, models::Role, token::AccessTokenClaims};

/// Exact request paths served without an access token. Matching is by equality, never by
/// prefix, so `/api/auth/register/x` is not public.
pub const PUBLIC_PATHS: &[&str] = &[
    "/",
    "/health",
    "/api-docs/openapi.json",
    "/api/auth/register",
    "/api/auth/login",
    "/api/auth/refresh-token",
];

/// Role allow-list for post mutations.
pub const AUTHOR_ONLY: &[Role] = &[Role::Author];

/// Principal
///
/// The authenticated caller, resolved from a validated access token and attached to the
/// request extensions by `require_auth`. Handlers take it as an extractor argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub subject_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<AccessTokenClaims> for Principal {
    fn from(claims: AccessTokenClaims) -> Self {
        Self {
            subject_id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

impl Principal {
    pub fn authorize(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::info!(user_id = %self.subject_id, role = %self.role, "role not permitted");
            Err(ApiError::Forbidden("insufficient role for this operation".to_string()))
        }
    }

    /// Mutations of an owned resource are allowed for its owner only.
    pub fn ensure_owner(&self, owner_id: Uuid) -> Result<(), ApiError> {
        if self.subject_id == owner_id {
            Ok(())
        } else {
            tracing::info!(user_id = %self.subject_id, %owner_id, "ownership check failed");
            Err(ApiError::Forbidden("you do not own this resource".to_string()))
        }
    }
}

/// Principal Extractor Implementation
///
/// Reads the `Principal` that `require_auth` placed in the request extensions. A handler
/// reached without one (a route that escaped the gate) answers 401 instead of running.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(ApiError::unauthenticated)
    }
}

/// bearer_token
///
/// Returns the token of an `Authorization: Bearer <token>` header. The scheme is matched
/// exactly and the value must split on spaces into exactly two parts.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// require_auth
///
/// Global authentication gate, applied as the outermost application layer.
///
/// 1. Public paths pass through untouched.
/// 2. Otherwise the Bearer token is extracted and validated (algorithm, signature, expiry).
/// 3. On success the resolved `Principal` is inserted into the request extensions and its
///    id is recorded on the request span.
///
/// Every failure produces the same 401 body; the reason is only logged. The store is
/// never consulted here.
pub async fn require_auth(
    State(tokens): State<TokenState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let Some(token) = bearer_token(request.headers()) else {
        tracing::debug!(path = %request.uri().path(), "missing or malformed authorization header");
        return Err(ApiError::unauthenticated());
    };

    let claims = tokens.validate_access_token(token).map_err(|err| {
        tracing::info!(kind = err.kind(), error = %err, "access token rejected");
        ApiError::unauthenticated()
    })?;

    let principal = Principal::from(claims);
    Span::current().record("user_id", tracing::field::display(principal.subject_id));
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// RoleGate
///
/// The role allow-list of one group of routes. Used as the state of `require_role`.
#[derive(Debug, Clone, Copy)]
pub struct RoleGate(pub &'static [Role]);

/// require_role
///
/// Route-level authorization, layered inside `require_auth`. No principal is 401, a
/// principal whose role is not in the gate's allow-list is 403.
pub async fn require_role(
    State(RoleGate(allowed)): State<RoleGate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .ok_or_else(ApiError::unauthenticated)?;
    principal.authorize(allowed)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_scheme_is_exact() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("bearer abc")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Bearer a b")), None);
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn owner_and_role_checks() {
        let principal = Principal {
            subject_id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            role: Role::Reader,
        };
        assert!(principal.authorize(&Role::ALL).is_ok());
        assert!(matches!(principal.authorize(AUTHOR_ONLY), Err(ApiError::Forbidden(_))));
        assert!(principal.ensure_owner(principal.subject_id).is_ok());
        assert!(matches!(
            principal.ensure_owner(Uuid::new_v4()),
            Err(ApiError::Forbidden(_))
        ));
    }
}
