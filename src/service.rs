use std::{future::Future, sync::Arc, sync::LazyLock, time::Duration};

use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::{AuthResponse, Identity, NewIdentity, Role, UserResponse},
    password::{MAX_PASSWORD_BYTES, PasswordError, PasswordHasher},
    repository::{CredentialStoreState, StoreError, StoreResult},
    token::{IssuedRefreshToken, SignedAccessToken, TokenError, TokenIssuer, digest_refresh_token},
};

const MIN_PASSWORD_CHARS: usize = 6;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern compiles")
});

/// AuthError
///
/// Everything the auth service can fail with. The first six variants are expected
/// outcomes the HTTP boundary maps to 4xx responses; the rest are faults.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("email is already registered")]
    DuplicateIdentity,
    /// Unknown email and wrong password both end here, so callers cannot tell them apart.
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("refresh token is invalid or expired")]
    InvalidOrExpiredToken,
    #[error("user not found")]
    NotFound,
    #[error("current password is incorrect")]
    ReauthenticationRequired,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => AuthError::DuplicateIdentity,
            other => AuthError::Store(other),
        }
    }
}

/// AuthSession
///
/// The result of a successful register, login or refresh: the identity plus a freshly
/// minted token pair. The refresh token is plaintext here and nowhere else.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub identity: Identity,
    pub access_token: SignedAccessToken,
    pub refresh_token: IssuedRefreshToken,
}

impl From<AuthSession> for AuthResponse {
    fn from(session: AuthSession) -> Self {
        AuthResponse {
            user: UserResponse::from(&session.identity),
            access_token: session.access_token.token,
            access_token_expires_at: session.access_token.expires_at,
            refresh_token: session.refresh_token.token,
            refresh_token_expires_at: session.refresh_token.expires_at,
        }
    }
}

/// AuthService
///
/// Register, login, refresh-token rotation and the profile operations. Holds no session
/// state of its own: the credential store is the single source of truth, so any number of
/// clones (one per request) can run concurrently.
#[derive(Clone)]
pub struct AuthService {
    store: CredentialStoreState,
    tokens: Arc<TokenIssuer>,
    hasher: PasswordHasher,
    store_timeout: Duration,
}

impl AuthService {
    pub fn new(
        store: CredentialStoreState,
        tokens: Arc<TokenIssuer>,
        hasher: PasswordHasher,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            store_timeout,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenIssuer> {
        &self.tokens
    }

    /// register
    ///
    /// Validates the input before touching the store, rejects a taken email, then hashes
    /// the password and persists the identity together with its first refresh token.
    /// The store's unique-email constraint covers the window between the existence check
    /// and the insert: a concurrent duplicate still surfaces as `DuplicateIdentity`.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<AuthSession, AuthError> {
        validate_email(email)?;
        validate_password(password)?;
        let role = parse_role(role)?;

        if self.with_deadline(self.store.get_by_email(email)).await?.is_some() {
            tracing::info!("registration rejected: email already registered");
            return Err(AuthError::DuplicateIdentity);
        }

        let password_hash = self.hash_password(password).await?;
        let refresh_token = self.tokens.issue_refresh_token();

        let identity = self
            .with_deadline(self.store.create_identity(NewIdentity {
                email: email.to_string(),
                password_hash,
                role,
                refresh_token: digest_refresh_token(&refresh_token.token),
                refresh_token_expires_at: refresh_token.expires_at,
            }))
            .await?;

        let access_token = self.tokens.issue_access_token(&identity)?;
        tracing::info!(user_id = %identity.id, role = %identity.role, "identity registered");

        Ok(AuthSession {
            identity,
            access_token,
            refresh_token,
        })
    }

    /// login
    ///
    /// Issues a fresh token pair; the new refresh token replaces the stored one.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let identity = self
            .with_deadline(self.store.verify_password(&self.hasher, email, password))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let refresh_token = self.tokens.issue_refresh_token();
        let stored = self
            .with_deadline(self.store.update_refresh_token(
                identity.id,
                &digest_refresh_token(&refresh_token.token),
                refresh_token.expires_at,
            ))
            .await?;
        if !stored {
            // Deleted between the password check and the update.
            return Err(AuthError::InvalidCredentials);
        }

        let access_token = self.tokens.issue_access_token(&identity)?;
        tracing::info!(user_id = %identity.id, "login succeeded");

        Ok(AuthSession {
            identity,
            access_token,
            refresh_token,
        })
    }

    /// refresh_tokens
    ///
    /// Exchanges a live refresh token for a new pair. The rotation is a compare-and-swap on
    /// the stored digest, so when the same token is presented twice concurrently exactly one
    /// call wins and the other gets `InvalidOrExpiredToken`, as does any later replay.
    pub async fn refresh_tokens(&self, presented: &str) -> Result<AuthSession, AuthError> {
        if presented.is_empty() {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let now = Utc::now();
        let current = digest_refresh_token(presented);
        let identity = self
            .with_deadline(self.store.get_by_refresh_token(&current, now))
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let refresh_token = self.tokens.issue_refresh_token_at(now);
        let rotated = self
            .with_deadline(self.store.swap_refresh_token(
                identity.id,
                &current,
                &digest_refresh_token(&refresh_token.token),
                refresh_token.expires_at,
                now,
            ))
            .await?;
        if !rotated {
            tracing::warn!(user_id = %identity.id, "refresh token already rotated");
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let access_token = self.tokens.issue_access_token_at(&identity, now)?;
        tracing::debug!(user_id = %identity.id, "refresh token rotated");

        Ok(AuthSession {
            identity,
            access_token,
            refresh_token,
        })
    }

    pub async fn find_identity(&self, id: Uuid) -> Result<Identity, AuthError> {
        self.with_deadline(self.store.get_by_id(id))
            .await?
            .ok_or(AuthError::NotFound)
    }

    /// update_profile
    ///
    /// Changes email and role of an existing identity, validated exactly like `register`.
    /// A role change needs the current password and revokes the stored refresh token, so
    /// a new session has to be opened with the new role.
    pub async fn update_profile(
        &self,
        id: Uuid,
        email: &str,
        role: &str,
        current_password: Option<&str>,
    ) -> Result<Identity, AuthError> {
        validate_email(email)?;
        let role = parse_role(role)?;

        let existing = self.find_identity(id).await?;
        let role_changed = existing.role != role;

        if role_changed {
            let password = current_password.ok_or_else(|| {
                AuthError::Validation("currentPassword is required to change role".to_string())
            })?;
            self.check_password(&existing.password_hash, password).await?;
        }

        if let Some(other) = self.with_deadline(self.store.get_by_email(email)).await? {
            if other.id != id {
                return Err(AuthError::DuplicateIdentity);
            }
        }

        // Profile fields and the revocation land in one store write.
        let updated = self
            .with_deadline(self.store.update_profile(id, email, role, role_changed))
            .await?
            .ok_or(AuthError::NotFound)?;

        if role_changed {
            tracing::info!(
                user_id = %id,
                from = %existing.role,
                to = %updated.role,
                "role changed, refresh token revoked"
            );
        }

        Ok(updated)
    }

    pub async fn delete_account(&self, id: Uuid) -> Result<(), AuthError> {
        if self.with_deadline(self.store.delete_identity(id)).await? {
            tracing::info!(user_id = %id, "identity deleted");
            Ok(())
        } else {
            Err(AuthError::NotFound)
        }
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let digest = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))??;
        Ok(digest)
    }

    async fn check_password(&self, digest: &str, password: &str) -> Result<(), AuthError> {
        let hasher = self.hasher.clone();
        let digest = digest.to_string();
        let password = password.to_string();
        let outcome = tokio::task::spawn_blocking(move || hasher.verify(&digest, &password))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        match outcome {
            Ok(()) => Ok(()),
            Err(PasswordError::Mismatch) => Err(AuthError::ReauthenticationRequired),
            Err(err) => Err(err.into()),
        }
    }

    // Dropping the future on timeout abandons the call before it writes; every store
    // mutation is a single statement.
    async fn with_deadline<T, F>(&self, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(AuthError::from),
            Err(_) => {
                tracing::error!(timeout = ?self.store_timeout, "credential store call timed out");
                Err(AuthError::Store(StoreError::Timeout))
            }
        }
    }
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if email.is_empty() {
        return Err(AuthError::Validation("email is required".to_string()));
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(AuthError::Validation("email format is invalid".to_string()));
    }
    Ok(())
}

/// The minimum is counted in characters; the maximum in bytes, because that is
/// what bcrypt reads.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::Validation(format!(
            "password must be at most {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    Ok(())
}

pub fn parse_role(role: &str) -> Result<Role, AuthError> {
    role.parse::<Role>()
        .map_err(|e| AuthError::Validation(e.to_string()))
}
