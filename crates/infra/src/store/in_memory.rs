use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    ClassifyWriteError, Comment, CommentId, IntegrityKind, Keyword, KeywordStatus, NewPost, Post,
    PostId, SourceId, StoreError, StoreResult, User, UserId, View,
};

use super::{DataStore, MAX_INDEXED_URL_BYTES};

#[derive(Debug, Default)]
struct Tables {
    sources: HashSet<SourceId>,
    users: HashMap<UserId, User>,
    posts: HashMap<PostId, Post>,
    post_tags: HashSet<(PostId, String)>,
    keywords: HashMap<String, Keyword>,
    post_keywords: HashSet<(PostId, String)>,
    comments: HashMap<CommentId, Comment>,
    views: Vec<View>,
    side_effects: HashSet<String>,
}

impl Tables {
    /// Run every constraint `add_post` would hit, without mutating anything.
    fn check_new_post(&self, new_post: &NewPost) -> StoreResult<()> {
        let post = &new_post.post;

        if post.id.as_str().is_empty() {
            return Err(StoreError::integrity(IntegrityKind::NotNull, "post.id"));
        }
        if post.short_id.is_empty() {
            return Err(StoreError::integrity(IntegrityKind::NotNull, "post.shortId"));
        }
        if post.url.is_empty() {
            return Err(StoreError::integrity(IntegrityKind::NotNull, "post.url"));
        }
        if post.url.len() > MAX_INDEXED_URL_BYTES {
            return Err(StoreError::integrity(
                IntegrityKind::RowTooLarge,
                format!("post.url is {} bytes", post.url.len()),
            ));
        }
        if !self.sources.contains(&post.source_id) {
            return Err(StoreError::integrity(
                IntegrityKind::ForeignKey,
                format!("post.sourceId {} does not exist", post.source_id),
            ));
        }
        if let Some(author) = &post.author_id {
            if !self.users.contains_key(author) {
                return Err(StoreError::integrity(
                    IntegrityKind::ForeignKey,
                    format!("post.authorId {author} does not exist"),
                ));
            }
        }
        if self.posts.contains_key(&post.id) {
            return Err(StoreError::integrity(IntegrityKind::Unique, "post_pkey"));
        }
        for existing in self.posts.values() {
            if existing.short_id == post.short_id {
                return Err(StoreError::integrity(IntegrityKind::Unique, "post_short_id_key"));
            }
            if existing.url == post.url {
                return Err(StoreError::integrity(IntegrityKind::Unique, "post_url_key"));
            }
            if post.canonical_url.is_some() && existing.canonical_url == post.canonical_url {
                return Err(StoreError::integrity(
                    IntegrityKind::Unique,
                    "post_canonical_url_key",
                ));
            }
        }

        let mut tags = HashSet::new();
        for tag in &new_post.tags {
            if !tags.insert(tag) {
                return Err(StoreError::integrity(IntegrityKind::Unique, "post_tag_pkey"));
            }
        }
        let mut keywords = HashSet::new();
        for keyword in &new_post.keywords {
            if keyword.is_empty() {
                return Err(StoreError::integrity(IntegrityKind::NotNull, "keyword.value"));
            }
            if !keywords.insert(keyword) {
                return Err(StoreError::integrity(IntegrityKind::Unique, "post_keyword_pkey"));
            }
        }
        Ok(())
    }
}

/// In-memory data store.
///
/// Intended for tests/dev. Enforces the same integrity constraints as the
/// relational schema and reports them with the same `StoreError` variants.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    injected: Mutex<Option<StoreError>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next store operation fail with `err`.
    pub fn fail_next_operation(&self, err: StoreError) {
        if let Ok(mut slot) = self.injected.lock() {
            *slot = Some(err);
        }
    }

    fn injected_failure(&self) -> StoreResult<()> {
        match self.injected.lock() {
            Ok(mut slot) => slot.take().map_or(Ok(()), Err),
            Err(_) => Err(poisoned()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
        self.injected_failure()?;
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        self.injected_failure()?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        f(&mut tables)
    }

    // Seeding and inspection helpers. These bypass the failure injection.

    pub fn insert_source(&self, id: impl Into<SourceId>) {
        if let Ok(mut t) = self.tables.write() {
            t.sources.insert(id.into());
        }
    }

    pub fn insert_user(&self, user: User) {
        if let Ok(mut t) = self.tables.write() {
            t.users.insert(user.id.clone(), user);
        }
    }

    pub fn insert_post(&self, post: Post) {
        if let Ok(mut t) = self.tables.write() {
            t.sources.insert(post.source_id.clone());
            t.posts.insert(post.id.clone(), post);
        }
    }

    pub fn insert_comment(&self, comment: Comment) {
        if let Ok(mut t) = self.tables.write() {
            t.comments.insert(comment.id.clone(), comment);
        }
    }

    pub fn insert_keyword(&self, keyword: Keyword) {
        if let Ok(mut t) = self.tables.write() {
            t.keywords.insert(keyword.value.clone(), keyword);
        }
    }

    pub fn insert_view(&self, view: View) {
        if let Ok(mut t) = self.tables.write() {
            t.views.push(view);
        }
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.tables.read().ok()?.users.get(id).cloned()
    }

    pub fn post(&self, id: &str) -> Option<Post> {
        self.tables.read().ok()?.posts.get(id).cloned()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.tables
            .read()
            .map(|t| t.posts.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn keyword(&self, value: &str) -> Option<Keyword> {
        self.tables.read().ok()?.keywords.get(value).cloned()
    }

    pub fn post_count(&self) -> usize {
        self.tables.read().map(|t| t.posts.len()).unwrap_or(0)
    }

    /// Tags of a post, sorted.
    pub fn post_tags(&self, id: &str) -> Vec<String> {
        let Ok(t) = self.tables.read() else {
            return vec![];
        };
        let mut tags: Vec<String> = t
            .post_tags
            .iter()
            .filter(|(p, _)| p.as_str() == id)
            .map(|(_, tag)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    /// Keywords linked to a post, sorted.
    pub fn post_keywords(&self, id: &str) -> Vec<String> {
        let Ok(t) = self.tables.read() else {
            return vec![];
        };
        let mut keywords: Vec<String> = t
            .post_keywords
            .iter()
            .filter(|(p, _)| p.as_str() == id)
            .map(|(_, k)| k.clone())
            .collect();
        keywords.sort();
        keywords
    }

    pub fn side_effect_claimed(&self, key: &str) -> bool {
        self.tables
            .read()
            .map(|t| t.side_effects.contains(key))
            .unwrap_or(false)
    }
}

fn poisoned() -> StoreError {
    StoreError::other("in-memory store lock poisoned")
}

impl ClassifyWriteError for InMemoryStore {}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        self.read(|t| t.users.get(id).cloned())
    }

    async fn find_post(&self, id: &PostId) -> StoreResult<Option<Post>> {
        self.read(|t| t.posts.get(id).cloned())
    }

    async fn find_comment(&self, id: &CommentId) -> StoreResult<Option<Comment>> {
        self.read(|t| t.comments.get(id).cloned())
    }

    async fn find_post_id_by_url(
        &self,
        url: &str,
        canonical_url: Option<&str>,
    ) -> StoreResult<Option<PostId>> {
        let wanted = |candidate: &str| candidate == url || Some(candidate) == canonical_url;
        self.read(|t| {
            t.posts
                .values()
                .find(|p| wanted(&p.url) || p.canonical_url.as_deref().is_some_and(|c| wanted(c)))
                .map(|p| p.id.clone())
        })
    }

    async fn find_user_id_by_twitter(&self, handle: &str) -> StoreResult<Option<UserId>> {
        let handle = handle.to_lowercase();
        self.read(|t| {
            t.users
                .values()
                .find(|u| {
                    u.twitter
                        .as_deref()
                        .is_some_and(|tw| tw.to_lowercase() == handle)
                })
                .map(|u| u.id.clone())
        })
    }

    async fn find_keywords(
        &self,
        values: &[String],
        status: KeywordStatus,
    ) -> StoreResult<Vec<Keyword>> {
        self.read(|t| {
            values
                .iter()
                .filter_map(|v| t.keywords.get(v))
                .filter(|k| k.status == status)
                .cloned()
                .collect()
        })
    }

    async fn add_post(&self, new_post: NewPost) -> StoreResult<()> {
        self.write(|t| {
            t.check_new_post(&new_post)?;

            let NewPost {
                post,
                tags,
                keywords,
            } = new_post;

            for tag in tags {
                t.post_tags.insert((post.id.clone(), tag));
            }
            for value in keywords {
                t.keywords
                    .entry(value.clone())
                    .and_modify(|k| k.occurrences += 1)
                    .or_insert_with(|| Keyword {
                        value: value.clone(),
                        status: KeywordStatus::Pending,
                        occurrences: 1,
                        synonym: None,
                    });
                t.post_keywords.insert((post.id.clone(), value));
            }
            t.posts.insert(post.id.clone(), post);
            Ok(())
        })
    }

    async fn increment_reputation(&self, user_id: &UserId, delta: i64) -> StoreResult<bool> {
        self.write(|t| {
            let Some(user) = t.users.get_mut(user_id) else {
                return Ok(false);
            };
            let next = (user.reputation + delta).max(0);
            let changed = next != user.reputation;
            user.reputation = next;
            Ok(changed)
        })
    }

    async fn count_user_views(&self, user_id: &UserId) -> StoreResult<i64> {
        self.read(|t| t.views.iter().filter(|v| &v.user_id == user_id).count() as i64)
    }

    async fn mark_devcard_eligible(&self, user_id: &UserId) -> StoreResult<bool> {
        self.write(|t| match t.users.get_mut(user_id) {
            Some(user) if !user.devcard_eligible => {
                user.devcard_eligible = true;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn posts_pending_analytics_report(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Post>> {
        self.read(|t| {
            let mut posts: Vec<Post> = t
                .posts
                .values()
                .filter(|p| {
                    p.author_id.is_some() && !p.sent_analytics_report && p.created_at < created_before
                })
                .cloned()
                .collect();
            posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.as_str().cmp(b.id.as_str())));
            posts.truncate(limit);
            posts
        })
    }

    async fn mark_analytics_report_sent(&self, post_id: &PostId) -> StoreResult<bool> {
        self.write(|t| match t.posts.get_mut(post_id) {
            Some(post) if !post.sent_analytics_report => {
                post.sent_analytics_report = true;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn claim_side_effect(&self, key: &str) -> StoreResult<bool> {
        self.write(|t| Ok(t.side_effects.insert(key.to_string())))
    }

    async fn release_side_effect(&self, key: &str) -> StoreResult<()> {
        self.write(|t| {
            t.side_effects.remove(key);
            Ok(())
        })
    }
}
