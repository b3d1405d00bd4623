//! Data-store collaborator.
//!
//! Handlers read and write business state only through `DataStore`. Each
//! operation is atomic on its own; `add_post` is a single transaction.
//! Backends surface failures as `StoreError` and classify them through
//! `ClassifyWriteError`, so callers never see vendor-specific codes.

mod in_memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    ClassifyWriteError, Comment, CommentId, Keyword, KeywordStatus, NewPost, Post, PostId,
    StoreResult, User, UserId,
};

pub use in_memory::InMemoryStore;
pub use postgres::{PostgresStore, map_sqlx_error};

/// Longest `url` value the store accepts (btree index row limit).
pub const MAX_INDEXED_URL_BYTES: usize = 2704;

#[async_trait]
pub trait DataStore: ClassifyWriteError + Send + Sync {
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<User>>;

    async fn find_post(&self, id: &PostId) -> StoreResult<Option<Post>>;

    async fn find_comment(&self, id: &CommentId) -> StoreResult<Option<Comment>>;

    /// A post whose `url` or `canonical_url` equals either argument.
    async fn find_post_id_by_url(
        &self,
        url: &str,
        canonical_url: Option<&str>,
    ) -> StoreResult<Option<PostId>>;

    /// Case-insensitive twitter handle lookup (handle without `@`).
    async fn find_user_id_by_twitter(&self, handle: &str) -> StoreResult<Option<UserId>>;

    async fn find_keywords(
        &self,
        values: &[String],
        status: KeywordStatus,
    ) -> StoreResult<Vec<Keyword>>;

    /// Insert a post with its tags and keywords in one transaction.
    ///
    /// Keywords are upserted: an existing keyword has its `occurrences`
    /// incremented, a new one is created as `pending` with one occurrence.
    async fn add_post(&self, new_post: NewPost) -> StoreResult<()>;

    /// Add `delta` to a user's reputation, never going below zero.
    ///
    /// Returns `false` when no row changed (unknown user, or already at zero
    /// for a negative delta).
    async fn increment_reputation(&self, user_id: &UserId, delta: i64) -> StoreResult<bool>;

    async fn count_user_views(&self, user_id: &UserId) -> StoreResult<i64>;

    /// Conditional `devcard_eligible: false -> true`. Returns whether it changed.
    async fn mark_devcard_eligible(&self, user_id: &UserId) -> StoreResult<bool>;

    /// Posts with an author, created before `created_before`, whose
    /// analytics report was not sent yet. Oldest first.
    async fn posts_pending_analytics_report(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Post>>;

    async fn mark_analytics_report_sent(&self, post_id: &PostId) -> StoreResult<bool>;

    /// Record that the side effect identified by `key` is being performed.
    ///
    /// Returns `false` when the key was already claimed, in which case the
    /// caller must not perform the effect again.
    async fn claim_side_effect(&self, key: &str) -> StoreResult<bool>;

    /// Drop a claim whose side effect failed, so a redelivery can retry it.
    async fn release_side_effect(&self, key: &str) -> StoreResult<()>;
}
