use crate::{
    models::{Identity, NewIdentity, NewPost, Post, PostStatus, Role},
    repository::{CredentialStore, PostRepository, StoreError, StoreResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// MemoryRepository
///
/// In-process implementation of both store contracts. Used by the test suite and by
/// `STORAGE_BACKEND=memory` for local runs. Every mutation holds the write lock for its
/// whole read-check-write, which gives the same atomicity the SQL statements have.
#[derive(Default)]
pub struct MemoryRepository {
    identities: RwLock<HashMap<Uuid, Identity>>,
    posts: RwLock<HashMap<Uuid, Post>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn refresh_token_live(identity: &Identity, digest: &str, now: DateTime<Utc>) -> bool {
    identity.refresh_token.as_deref() == Some(digest)
        && identity
            .refresh_token_expires_at
            .is_some_and(|expires_at| expires_at > now)
}

#[async_trait]
impl CredentialStore for MemoryRepository {
    async fn create_identity(&self, identity: NewIdentity) -> StoreResult<Identity> {
        let mut identities = self.identities.write().await;
        if identities.values().any(|existing| existing.email == identity.email) {
            return Err(StoreError::Duplicate);
        }

        let created = Identity {
            id: Uuid::new_v4(),
            email: identity.email,
            password_hash: identity.password_hash,
            role: identity.role,
            refresh_token: Some(identity.refresh_token),
            refresh_token_expires_at: Some(identity.refresh_token_expires_at),
        };
        identities.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        Ok(self.identities.read().await.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let identities = self.identities.read().await;
        Ok(identities.values().find(|i| i.email == email).cloned())
    }

    async fn get_by_refresh_token(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Identity>> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .find(|i| refresh_token_live(i, digest, now))
            .cloned())
    }

    async fn update_refresh_token(
        &self,
        id: Uuid,
        digest: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut identities = self.identities.write().await;
        let Some(identity) = identities.get_mut(&id) else {
            return Ok(false);
        };
        identity.refresh_token = Some(digest.to_string());
        identity.refresh_token_expires_at = Some(expires_at);
        Ok(true)
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut identities = self.identities.write().await;
        match identities.get_mut(&id) {
            Some(identity) if refresh_token_live(identity, current, now) => {
                identity.refresh_token = Some(replacement.to_string());
                identity.refresh_token_expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> StoreResult<bool> {
        let mut identities = self.identities.write().await;
        let Some(identity) = identities.get_mut(&id) else {
            return Ok(false);
        };
        identity.refresh_token = None;
        identity.refresh_token_expires_at = None;
        Ok(true)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        email: &str,
        role: Role,
        revoke_refresh_token: bool,
    ) -> StoreResult<Option<Identity>> {
        let mut identities = self.identities.write().await;
        if identities
            .values()
            .any(|other| other.id != id && other.email == email)
        {
            return Err(StoreError::Duplicate);
        }
        let Some(identity) = identities.get_mut(&id) else {
            return Ok(None);
        };
        identity.email = email.to_string();
        identity.role = role;
        if revoke_refresh_token {
            identity.refresh_token = None;
            identity.refresh_token_expires_at = None;
        }
        Ok(Some(identity.clone()))
    }

    async fn delete_identity(&self, id: Uuid) -> StoreResult<bool> {
        let removed = self.identities.write().await.remove(&id).is_some();
        if removed {
            // Mirrors ON DELETE CASCADE on posts.author_id.
            self.posts.write().await.retain(|_, post| post.author_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl PostRepository for MemoryRepository {
    async fn create_post(&self, post: NewPost) -> StoreResult<Post> {
        let mut posts = self.posts.write().await;
        if let Some(key) = post.idempotency_key.as_deref() {
            let existing = posts.values().find(|p| {
                p.author_id == post.author_id && p.idempotency_key.as_deref() == Some(key)
            });
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }

        let now = Utc::now();
        let created = Post {
            id: Uuid::new_v4(),
            author_id: post.author_id,
            idempotency_key: post.idempotency_key,
            title: post.title,
            content: post.content,
            status: PostStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        posts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_post(&self, id: Uuid) -> StoreResult<Option<Post>> {
        Ok(self.posts.read().await.get(&id).cloned())
    }

    async fn get_posts_by_author(&self, author_id: Uuid) -> StoreResult<Vec<Post>> {
        let posts = self.posts.read().await;
        let mut found: Vec<Post> = posts
            .values()
            .filter(|p| p.author_id == author_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn get_published_posts(&self) -> StoreResult<Vec<Post>> {
        let posts = self.posts.read().await;
        let mut found: Vec<Post> = posts
            .values()
            .filter(|p| p.status == PostStatus::Published)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn update_post(&self, id: Uuid, title: &str, content: &str) -> StoreResult<Option<Post>> {
        let mut posts = self.posts.write().await;
        let Some(post) = posts.get_mut(&id) else {
            return Ok(None);
        };
        post.title = title.to_string();
        post.content = content.to_string();
        post.updated_at = Utc::now();
        Ok(Some(post.clone()))
    }

    async fn publish_post(&self, id: Uuid) -> StoreResult<Option<Post>> {
        let mut posts = self.posts.write().await;
        let Some(post) = posts.get_mut(&id) else {
            return Ok(None);
        };
        post.status = PostStatus::Published;
        post.updated_at = Utc::now();
        Ok(Some(post.clone()))
    }

    async fn delete_post(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.posts.write().await.remove(&id).is_some())
    }
}
