use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use microblog_api::{
    AuthService, MemoryRepository, TokenIssuer,
    models::{Identity, NewIdentity, Role},
    password::PasswordHasher,
    repository::{CredentialStore, StoreError, StoreResult},
    service::AuthError,
    token::digest_refresh_token,
};
use std::sync::Arc;
use uuid::Uuid;

// --- Helper Functions ---

const SECRET: &str = "service-test-secret";

fn issuer() -> Arc<TokenIssuer> {
    Arc::new(TokenIssuer::new(SECRET, Duration::hours(2), Duration::hours(168)).unwrap())
}

fn service_over(store: Arc<dyn CredentialStore>, timeout: std::time::Duration) -> AuthService {
    AuthService::new(store, issuer(), PasswordHasher::new(4).unwrap(), timeout)
}

fn memory_service() -> (AuthService, Arc<MemoryRepository>) {
    let store = Arc::new(MemoryRepository::new());
    let service = service_over(store.clone(), std::time::Duration::from_secs(5));
    (service, store)
}

// --- Register / Login ---

#[tokio::test]
async fn test_register_then_login_carries_role() {
    let (service, _) = memory_service();
    let registered = service.register("a@x.com", "secret1", "Author").await.unwrap();
    assert_eq!(registered.identity.role, Role::Author);

    let session = service.login("a@x.com", "secret1").await.unwrap();
    let claims = service
        .tokens()
        .validate_access_token(&session.access_token.token)
        .unwrap();

    assert_eq!(claims.sub, registered.identity.id);
    assert_eq!(claims.email, "a@x.com");
    assert_eq!(claims.role, Role::Author);
    assert_eq!(claims.exp - claims.iat, Duration::hours(2).num_seconds());
}

#[tokio::test]
async fn test_password_is_stored_hashed() {
    let (service, store) = memory_service();
    let session = service.register("a@x.com", "secret1", "Reader").await.unwrap();

    let stored = store.get_by_id(session.identity.id).await.unwrap().unwrap();
    assert_ne!(stored.password_hash, "secret1");
    assert!(stored.password_hash.starts_with("$2"));
    assert_eq!(
        stored.refresh_token.as_deref(),
        Some(digest_refresh_token(&session.refresh_token.token).as_str())
    );
}

#[tokio::test]
async fn test_duplicate_registration_leaves_first_identity() {
    let (service, store) = memory_service();
    let first = service.register("a@x.com", "secret1", "Author").await.unwrap();
    let before = store.get_by_email("a@x.com").await.unwrap().unwrap();

    let err = service.register("a@x.com", "other-password", "Reader").await.unwrap_err();
    assert!(matches!(err, AuthError::DuplicateIdentity));

    let after = store.get_by_email("a@x.com").await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(after.id, first.identity.id);
    assert_eq!(after.role, Role::Author);
}

#[tokio::test]
async fn test_validation_never_reaches_store() {
    let (service, store) = memory_service();
    let err = service.register("a@x.com", "short", "Author").await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
    assert!(store.get_by_email("a@x.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_password_past_bcrypt_limit_is_rejected() {
    let (service, store) = memory_service();
    let long = format!("{}REAL", "a".repeat(72));
    assert_eq!(long.len(), 76);

    let err = service.register("a@x.com", &long, "Reader").await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
    assert!(store.get_by_email("a@x.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_login_does_not_match_on_shared_prefix() {
    let (service, _) = memory_service();
    let at_limit = "a".repeat(72);
    service.register("a@x.com", &at_limit, "Reader").await.unwrap();

    let err = service
        .login("a@x.com", &format!("{at_limit}WRONG-GUESS"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert!(service.login("a@x.com", &at_limit).await.is_ok());
}

#[tokio::test]
async fn test_login_failures_share_one_error() {
    let (service, _) = memory_service();
    service.register("a@x.com", "secret1", "Reader").await.unwrap();

    let unknown = service.login("ghost@x.com", "secret1").await.unwrap_err();
    let wrong = service.login("a@x.com", "secret2").await.unwrap_err();
    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert_eq!(unknown.to_string(), wrong.to_string());
}

#[tokio::test]
async fn test_login_replaces_refresh_token() {
    let (service, _) = memory_service();
    let registered = service.register("a@x.com", "secret1", "Reader").await.unwrap();
    let logged_in = service.login("a@x.com", "secret1").await.unwrap();
    assert_ne!(registered.refresh_token.token, logged_in.refresh_token.token);

    let stale = service.refresh_tokens(&registered.refresh_token.token).await.unwrap_err();
    assert!(matches!(stale, AuthError::InvalidOrExpiredToken));
    assert!(service.refresh_tokens(&logged_in.refresh_token.token).await.is_ok());
}

// --- Refresh Rotation ---

#[tokio::test]
async fn test_rotation_rejects_replay() {
    let (service, _) = memory_service();
    let session = service.register("a@x.com", "secret1", "Author").await.unwrap();
    let original = session.refresh_token.token;

    let rotated = service.refresh_tokens(&original).await.unwrap();
    assert_ne!(rotated.refresh_token.token, original);
    assert_eq!(rotated.identity.id, session.identity.id);

    let replay = service.refresh_tokens(&original).await.unwrap_err();
    assert!(matches!(replay, AuthError::InvalidOrExpiredToken));

    assert!(service.refresh_tokens(&rotated.refresh_token.token).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_has_one_winner() {
    for _ in 0..20 {
        let (service, _) = memory_service();
        let token = service
            .register(&format!("{}@x.com", Uuid::new_v4().simple()), "secret1", "Reader")
            .await
            .unwrap()
            .refresh_token
            .token;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                let token = token.clone();
                tokio::spawn(async move { service.refresh_tokens(&token).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert!(matches!(err, AuthError::InvalidOrExpiredToken)),
            }
        }
        assert_eq!(winners, 1);
    }
}

#[tokio::test]
async fn test_expired_refresh_token_is_rejected() {
    let (service, store) = memory_service();
    let session = service.register("a@x.com", "secret1", "Reader").await.unwrap();
    let digest = digest_refresh_token(&session.refresh_token.token);

    store
        .update_refresh_token(session.identity.id, &digest, Utc::now() - Duration::seconds(1))
        .await
        .unwrap();

    let err = service
        .refresh_tokens(&session.refresh_token.token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidOrExpiredToken));
}

#[tokio::test]
async fn test_empty_refresh_token_is_rejected() {
    let (service, _) = memory_service();
    let err = service.refresh_tokens("").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidOrExpiredToken));
}

// --- Profile ---

#[tokio::test]
async fn test_role_change_revokes_refresh_token() {
    let (service, store) = memory_service();
    let session = service.register("a@x.com", "secret1", "Reader").await.unwrap();
    let id = session.identity.id;

    let updated = service
        .update_profile(id, "a@x.com", "Author", Some("secret1"))
        .await
        .unwrap();
    assert_eq!(updated.role, Role::Author);

    let stored = store.get_by_id(id).await.unwrap().unwrap();
    assert!(stored.refresh_token.is_none());
    assert!(service.refresh_tokens(&session.refresh_token.token).await.is_err());

    let relogin = service.login("a@x.com", "secret1").await.unwrap();
    let claims = service
        .tokens()
        .validate_access_token(&relogin.access_token.token)
        .unwrap();
    assert_eq!(claims.role, Role::Author);
}

#[tokio::test]
async fn test_email_change_keeps_session() {
    let (service, _) = memory_service();
    let session = service.register("a@x.com", "secret1", "Reader").await.unwrap();

    let updated = service
        .update_profile(session.identity.id, "b@x.com", "Reader", None)
        .await
        .unwrap();
    assert_eq!(updated.email, "b@x.com");
    assert!(service.refresh_tokens(&session.refresh_token.token).await.is_ok());
    assert!(service.login("b@x.com", "secret1").await.is_ok());
}

#[tokio::test]
async fn test_delete_account_twice() {
    let (service, _) = memory_service();
    let session = service.register("a@x.com", "secret1", "Reader").await.unwrap();
    service.delete_account(session.identity.id).await.unwrap();

    let err = service.delete_account(session.identity.id).await.unwrap_err();
    assert!(matches!(err, AuthError::NotFound));
    let err = service.login("a@x.com", "secret1").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
}

// --- Store Deadline ---

const STALL: std::time::Duration = std::time::Duration::from_secs(30);

/// Which store call never answers in time.
#[derive(Clone, Copy, PartialEq)]
enum Stall {
    EmailLookup,
    Revoke,
    ProfileUpdate,
}

/// Delegates to a memory store, except for the one stalled operation.
struct StalledStore {
    inner: MemoryRepository,
    stall: Stall,
}

impl StalledStore {
    fn new(stall: Stall) -> Self {
        StalledStore {
            inner: MemoryRepository::new(),
            stall,
        }
    }
}

#[async_trait]
impl CredentialStore for StalledStore {
    async fn create_identity(&self, identity: NewIdentity) -> StoreResult<Identity> {
        self.inner.create_identity(identity).await
    }
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        self.inner.get_by_id(id).await
    }
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        if self.stall == Stall::EmailLookup {
            tokio::time::sleep(STALL).await;
        }
        self.inner.get_by_email(email).await
    }
    async fn get_by_refresh_token(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Identity>> {
        self.inner.get_by_refresh_token(digest, now).await
    }
    async fn update_refresh_token(
        &self,
        id: Uuid,
        digest: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.update_refresh_token(id, digest, expires_at).await
    }
    async fn swap_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner
            .swap_refresh_token(id, current, replacement, expires_at, now)
            .await
    }
    async fn revoke_refresh_token(&self, id: Uuid) -> StoreResult<bool> {
        if self.stall == Stall::Revoke {
            tokio::time::sleep(STALL).await;
        }
        self.inner.revoke_refresh_token(id).await
    }
    async fn update_profile(
        &self,
        id: Uuid,
        email: &str,
        role: Role,
        revoke_refresh_token: bool,
    ) -> StoreResult<Option<Identity>> {
        if self.stall == Stall::ProfileUpdate {
            tokio::time::sleep(STALL).await;
        }
        self.inner
            .update_profile(id, email, role, revoke_refresh_token)
            .await
    }
    async fn delete_identity(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete_identity(id).await
    }
}

#[tokio::test]
async fn test_store_calls_respect_deadline() {
    let store = Arc::new(StalledStore::new(Stall::EmailLookup));
    let service = service_over(store, std::time::Duration::from_millis(50));

    let err = service.register("a@x.com", "secret1", "Reader").await.unwrap_err();
    assert!(matches!(err, AuthError::Store(StoreError::Timeout)));

    let err = service.login("a@x.com", "secret1").await.unwrap_err();
    assert!(matches!(err, AuthError::Store(StoreError::Timeout)));
}

#[tokio::test]
async fn test_role_change_does_not_wait_on_separate_revoke() {
    let store = Arc::new(StalledStore::new(Stall::Revoke));
    let service = service_over(store.clone(), std::time::Duration::from_millis(50));
    let session = service.register("a@x.com", "secret1", "Reader").await.unwrap();
    let id = session.identity.id;

    // The revocation travels with the profile write, so a slow standalone revoke is never hit.
    let updated = service
        .update_profile(id, "a@x.com", "Author", Some("secret1"))
        .await
        .unwrap();
    assert_eq!(updated.role, Role::Author);

    let stored = store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.role, Role::Author);
    assert!(stored.refresh_token.is_none());
    assert!(stored.refresh_token_expires_at.is_none());

    let err = service
        .refresh_tokens(&session.refresh_token.token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidOrExpiredToken));
}

#[tokio::test]
async fn test_timed_out_role_change_leaves_no_partial_state() {
    let store = Arc::new(StalledStore::new(Stall::ProfileUpdate));
    let service = service_over(store.clone(), std::time::Duration::from_millis(50));
    let session = service.register("a@x.com", "secret1", "Reader").await.unwrap();
    let id = session.identity.id;

    let err = service
        .update_profile(id, "a@x.com", "Author", Some("secret1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Store(StoreError::Timeout)));

    // Neither the role nor the refresh token moved.
    let stored = store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.role, Role::Reader);
    assert_eq!(
        stored.refresh_token.as_deref(),
        Some(digest_refresh_token(&session.refresh_token.token).as_str())
    );
    let rotated = service.refresh_tokens(&session.refresh_token.token).await.unwrap();
    assert_eq!(rotated.identity.role, Role::Reader);
}
