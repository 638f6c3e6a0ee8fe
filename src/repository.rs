use crate::{
    models::{Identity, NewIdentity, NewPost, Post, PostStatus, Role},
    password::{PasswordError, PasswordHasher},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint (email, or author + idempotency key) rejected the write.
    #[error("record already exists")]
    Duplicate,
    #[error("store call exceeded its deadline")]
    Timeout,
    #[error("stored record is invalid: {0}")]
    Corrupt(String),
    #[error("password verification failed: {0}")]
    Hashing(#[from] PasswordError),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::Duplicate;
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// CredentialStore
///
/// The abstract contract for durable identity state. Refresh tokens cross this boundary
/// only as digests; the store never sees a plaintext token.
///
/// Every mutation is a single atomic operation per identity. `swap_refresh_token` is a
/// compare-and-swap: it only writes when the stored digest still equals `current` and has
/// not expired, which is what makes concurrent rotations of one token race-free.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts a new identity. Fails with `StoreError::Duplicate` if the email is taken.
    async fn create_identity(&self, identity: NewIdentity) -> StoreResult<Identity>;
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>>;
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Identity>>;
    /// Matches only while the stored expiry is strictly after `now`.
    async fn get_by_refresh_token(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Identity>>;
    /// Unconditionally replaces the stored refresh token. Returns false for an unknown id.
    async fn update_refresh_token(
        &self,
        id: Uuid,
        digest: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn swap_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn revoke_refresh_token(&self, id: Uuid) -> StoreResult<bool>;
    /// Sets email and role. With `revoke_refresh_token` the stored refresh token is cleared
    /// in the same write, so a failure or timeout leaves neither change behind.
    async fn update_profile(
        &self,
        id: Uuid,
        email: &str,
        role: Role,
        revoke_refresh_token: bool,
    ) -> StoreResult<Option<Identity>>;
    async fn delete_identity(&self, id: Uuid) -> StoreResult<bool>;

    /// verify_password
    ///
    /// Returns the identity when `password` matches its stored digest, `None` when the
    /// email is unknown or the password is wrong. Both `None` paths run one bcrypt
    /// verification so they take the same time. Hashing runs on the blocking pool.
    async fn verify_password(
        &self,
        hasher: &PasswordHasher,
        email: &str,
        password: &str,
    ) -> StoreResult<Option<Identity>> {
        // Step 1: Look the identity up. bcrypt is CPU-bound, so both branches below move
        // the hash work off the async workers.
        let identity = self.get_by_email(email).await?;
        let hasher = hasher.clone();
        let password = password.to_string();

        // Step 2: Unknown email. Burn one verification anyway so timing does not tell.
        let Some(identity) = identity else {
            tokio::task::spawn_blocking(move || hasher.verify_dummy(&password))
                .await
                .map_err(|e| PasswordError::Hashing(e.to_string()))?;
            tracing::debug!("password check: no identity for email");
            return Ok(None);
        };

        // Step 3: Verify against the stored digest. Only `Mismatch` is a wrong password;
        // a corrupt digest is a store fault and propagates.
        let digest = identity.password_hash.clone();
        let outcome = tokio::task::spawn_blocking(move || hasher.verify(&digest, &password))
            .await
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;

        match outcome {
            Ok(()) => Ok(Some(identity)),
            Err(PasswordError::Mismatch) => {
                tracing::debug!(user_id = %identity.id, "password check: mismatch");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// PostRepository
///
/// Persistence for posts. Ownership is not checked here; callers compare
/// `Post::author_id` with the authenticated principal before mutating.
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Idempotent per `(author_id, idempotency_key)`: a repeated key returns the stored post.
    async fn create_post(&self, post: NewPost) -> StoreResult<Post>;
    async fn get_post(&self, id: Uuid) -> StoreResult<Option<Post>>;
    async fn get_posts_by_author(&self, author_id: Uuid) -> StoreResult<Vec<Post>>;
    async fn get_published_posts(&self) -> StoreResult<Vec<Post>>;
    async fn update_post(&self, id: Uuid, title: &str, content: &str) -> StoreResult<Option<Post>>;
    async fn publish_post(&self, id: Uuid) -> StoreResult<Option<Post>>;
    async fn delete_post(&self, id: Uuid) -> StoreResult<bool>;
}

pub type CredentialStoreState = Arc<dyn CredentialStore>;
pub type PostRepositoryState = Arc<dyn PostRepository>;

// --- Postgres ---

#[derive(FromRow)]
struct IdentityRow {
    user_id: Uuid,
    email: String,
    password_hash: String,
    role: String,
    refresh_token: Option<String>,
    refresh_token_expiry_time: Option<DateTime<Utc>>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = StoreError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Identity {
            id: row.user_id,
            email: row.email,
            password_hash: row.password_hash,
            role,
            refresh_token: row.refresh_token,
            refresh_token_expires_at: row.refresh_token_expiry_time,
        })
    }
}

#[derive(FromRow)]
struct PostRow {
    post_id: Uuid,
    author_id: Uuid,
    idempotency_key: Option<String>,
    title: String,
    content: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PostRow> for Post {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<PostStatus>().map_err(StoreError::Corrupt)?;
        Ok(Post {
            id: row.post_id,
            author_id: row.author_id,
            idempotency_key: row.idempotency_key,
            title: row.title,
            content: row.content,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const IDENTITY_COLUMNS: &str =
    "user_id, email, password_hash, role, refresh_token, refresh_token_expiry_time";
const POST_COLUMNS: &str =
    "post_id, author_id, idempotency_key, title, content, status, created_at, updated_at";

fn into_identity(row: Option<IdentityRow>) -> StoreResult<Option<Identity>> {
    row.map(Identity::try_from).transpose()
}

fn into_post(row: Option<PostRow>) -> StoreResult<Option<Post>> {
    row.map(Post::try_from).transpose()
}

/// PostgresRepository
///
/// Both store contracts backed by one Postgres pool. Queries are runtime-checked so the
/// crate builds without a live database.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PostgresRepository {
    async fn create_identity(&self, identity: NewIdentity) -> StoreResult<Identity> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "INSERT INTO users (user_id, email, password_hash, role, refresh_token, refresh_token_expiry_time) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {IDENTITY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(identity.role.as_str())
        .bind(&identity.refresh_token)
        .bind(identity.refresh_token_expires_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE user_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        into_identity(row)
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        into_identity(row)
    }

    async fn get_by_refresh_token(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users \
             WHERE refresh_token = $1 AND refresh_token_expiry_time > $2"
        ))
        .bind(digest)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        into_identity(row)
    }

    async fn update_refresh_token(
        &self,
        id: Uuid,
        digest: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = $1, refresh_token_expiry_time = $2 WHERE user_id = $3",
        )
        .bind(digest)
        .bind(expires_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// swap_refresh_token
    ///
    /// One conditional UPDATE: Postgres row locking serializes two concurrent swaps of the
    /// same row, and the second re-evaluates the WHERE clause against the new digest.
    async fn swap_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        // Zero rows affected: someone else rotated first, or the token has expired.
        let result = sqlx::query(
            "UPDATE users SET refresh_token = $1, refresh_token_expiry_time = $2 \
             WHERE user_id = $3 AND refresh_token = $4 AND refresh_token_expiry_time > $5",
        )
        .bind(replacement)
        .bind(expires_at)
        .bind(id)
        .bind(current)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_token_expiry_time = NULL WHERE user_id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// update_profile
    ///
    /// One UPDATE for the profile fields and, when asked, the refresh-token revocation.
    /// `CASE` keeps the current token untouched when `$4` is false.
    async fn update_profile(
        &self,
        id: Uuid,
        email: &str,
        role: Role,
        revoke_refresh_token: bool,
    ) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "UPDATE users SET email = $1, role = $2, \
             refresh_token = CASE WHEN $4 THEN NULL ELSE refresh_token END, \
             refresh_token_expiry_time = CASE WHEN $4 THEN NULL ELSE refresh_token_expiry_time END \
             WHERE user_id = $3 RETURNING {IDENTITY_COLUMNS}"
        ))
        .bind(email)
        .bind(role.as_str())
        .bind(id)
        .bind(revoke_refresh_token)
        .fetch_optional(&self.pool)
        .await?;
        into_identity(row)
    }

    async fn delete_identity(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PostRepository for PostgresRepository {
    /// create_post
    ///
    /// `ON CONFLICT DO NOTHING` on the `(author_id, idempotency_key)` unique index; when the
    /// insert is skipped the existing row is read back instead.
    async fn create_post(&self, post: NewPost) -> StoreResult<Post> {
        // Step 1: Try the insert. A NULL key never conflicts, so keyless posts always land here.
        let inserted = sqlx::query_as::<_, PostRow>(&format!(
            "INSERT INTO posts (post_id, author_id, idempotency_key, title, content, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 'Draft', NOW(), NOW()) \
             ON CONFLICT (author_id, idempotency_key) DO NOTHING \
             RETURNING {POST_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(post.author_id)
        .bind(&post.idempotency_key)
        .bind(&post.title)
        .bind(&post.content)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return row.try_into();
        }

        // Step 2: The key was already used by this author; hand back the original post.
        let existing = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_id = $1 AND idempotency_key = $2"
        ))
        .bind(post.author_id)
        .bind(&post.idempotency_key)
        .fetch_one(&self.pool)
        .await?;
        existing.try_into()
    }

    async fn get_post(&self, id: Uuid) -> StoreResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE post_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        into_post(row)
    }

    async fn get_posts_by_author(&self, author_id: Uuid) -> StoreResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_id = $1 ORDER BY created_at DESC"
        ))
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Post::try_from).collect()
    }

    async fn get_published_posts(&self) -> StoreResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE status = 'Published' ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Post::try_from).collect()
    }

    async fn update_post(&self, id: Uuid, title: &str, content: &str) -> StoreResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "UPDATE posts SET title = $1, content = $2, updated_at = NOW() \
             WHERE post_id = $3 RETURNING {POST_COLUMNS}"
        ))
        .bind(title)
        .bind(content)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        into_post(row)
    }

    async fn publish_post(&self, id: Uuid) -> StoreResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "UPDATE posts SET status = 'Published', updated_at = NOW() \
             WHERE post_id = $1 RETURNING {POST_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        into_post(row)
    }

    async fn delete_post(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE post_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
