//! Postgres-backed store tests. They need a reachable database in `DATABASE_URL`, so they
//! are ignored by default: `cargo test -- --ignored`.

use chrono::{Duration, Utc};
use microblog_api::{
    models::{NewIdentity, NewPost, PostStatus, Role},
    repository::{CredentialStore, PostRepository, PostgresRepository, StoreError},
};
use sqlx::PgPool;
use uuid::Uuid;

// --- Test Context and Setup ---

struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

fn unique_email() -> String {
    format!("{}@test.com", Uuid::new_v4().simple())
}

fn new_identity(email: &str, digest: &str) -> NewIdentity {
    NewIdentity {
        email: email.to_string(),
        password_hash: "$2b$04$placeholderplaceholderplaceholderplaceholde".to_string(),
        role: Role::Author,
        refresh_token: digest.to_string(),
        refresh_token_expires_at: Utc::now() + Duration::hours(1),
    }
}

// --- Tests ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_unique_email_is_enforced() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let email = unique_email();

    let created = repo
        .create_identity(new_identity(&email, &Uuid::new_v4().to_string()))
        .await
        .unwrap();
    let err = repo
        .create_identity(new_identity(&email, &Uuid::new_v4().to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate));

    let stored = repo.get_by_email(&email).await.unwrap().unwrap();
    assert_eq!(stored.id, created.id);
    assert_eq!(stored.role, Role::Author);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_refresh_token_compare_and_swap() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let current = Uuid::new_v4().to_string();
    let replacement = Uuid::new_v4().to_string();

    let identity = repo
        .create_identity(new_identity(&unique_email(), &current))
        .await
        .unwrap();
    let now = Utc::now();
    let expires = now + Duration::hours(2);

    assert!(repo.swap_refresh_token(identity.id, &current, &replacement, expires, now).await.unwrap());
    assert!(!repo.swap_refresh_token(identity.id, &current, "again", expires, now).await.unwrap());

    assert!(repo.get_by_refresh_token(&current, now).await.unwrap().is_none());
    let found = repo.get_by_refresh_token(&replacement, now).await.unwrap().unwrap();
    assert_eq!(found.id, identity.id);

    // At the expiry instant the token no longer matches.
    assert!(repo.get_by_refresh_token(&replacement, expires).await.unwrap().is_none());

    assert!(repo.revoke_refresh_token(identity.id).await.unwrap());
    assert!(repo.get_by_refresh_token(&replacement, now).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_profile_update_and_cascade_delete() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let identity = repo
        .create_identity(new_identity(&unique_email(), &Uuid::new_v4().to_string()))
        .await
        .unwrap();

    let renamed = unique_email();
    let updated = repo
        .update_profile(identity.id, &renamed, Role::Reader, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.email, renamed);
    assert_eq!(updated.role, Role::Reader);
    assert!(updated.refresh_token.is_some());

    // Role change with revocation clears the token in the same statement.
    let promoted = repo
        .update_profile(identity.id, &renamed, Role::Author, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.role, Role::Author);
    assert!(promoted.refresh_token.is_none());
    assert!(promoted.refresh_token_expires_at.is_none());

    let post = repo
        .create_post(NewPost {
            author_id: identity.id,
            idempotency_key: Some("k1".to_string()),
            title: "t".to_string(),
            content: "c".to_string(),
        })
        .await
        .unwrap();

    assert!(repo.delete_identity(identity.id).await.unwrap());
    assert!(repo.get_post(post.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_post_idempotency_and_publish() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let author = repo
        .create_identity(new_identity(&unique_email(), &Uuid::new_v4().to_string()))
        .await
        .unwrap();

    let new_post = || NewPost {
        author_id: author.id,
        idempotency_key: Some("same-key".to_string()),
        title: "Title".to_string(),
        content: "Content".to_string(),
    };
    let first = repo.create_post(new_post()).await.unwrap();
    let second = repo.create_post(new_post()).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.status, PostStatus::Draft);

    let published = repo.publish_post(first.id).await.unwrap().unwrap();
    assert_eq!(published.status, PostStatus::Published);
    assert!(
        repo.get_published_posts()
            .await
            .unwrap()
            .iter()
            .any(|p| p.id == first.id)
    );

    let edited = repo.update_post(first.id, "New", "Body").await.unwrap().unwrap();
    assert_eq!(edited.title, "New");
    assert!(repo.delete_post(first.id).await.unwrap());
}
