//! Postgres-backed data store.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | `StoreError` |
//! |------------|----------|--------------|
//! | Database (not-null violation) | `23502` | `Integrity(NotNull)` |
//! | Database (foreign key violation) | `23503` | `Integrity(ForeignKey)` |
//! | Database (unique violation) | `23505` | `Integrity(Unique)` |
//! | Database (program limit exceeded, e.g. index row size) | `54000` | `Integrity(RowTooLarge)` |
//! | Database (serialization failure, deadlock, lock not available, admin shutdown) | `40001`, `40P01`, `55P03`, `57P01` | `Unavailable` |
//! | Database (connection exception class) | `08***` | `Unavailable` |
//! | Database (other) | any other | `Other` |
//! | PoolTimedOut / PoolClosed / Io / Tls / WorkerCrashed | N/A | `Unavailable` |
//! | Other | N/A | `Other` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    ClassifyWriteError, Comment, CommentId, IntegrityKind, Keyword, KeywordStatus, NewPost, Post,
    PostId, StoreError, StoreResult, User, UserId,
};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Row};
use tracing::instrument;

use super::DataStore;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ClassifyWriteError for PostgresStore {}

const POST_COLUMNS: &str = r#"
    id, "shortId", title, url, "canonicalUrl", "sourceId", "authorId", "createdAt",
    "publishedAt", image, ratio, placeholder, score, "siteTwitter", "creatorTwitter",
    "readTime", "tagsStr", description, toc, summary, "sentAnalyticsReport",
    views, upvotes, comments, banned
"#;

#[async_trait]
impl DataStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, image, email, username, twitter, reputation, "devcardEligible"
            FROM "user"
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user", e))?;

        row.map(|r| decode::<UserRow>(&r, "find_user").map(User::from))
            .transpose()
    }

    #[instrument(skip(self), fields(post_id = %id), err)]
    async fn find_post(&self, id: &PostId) -> StoreResult<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM post WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_post", e))?;

        row.map(|r| decode::<PostRow>(&r, "find_post").map(Post::from))
            .transpose()
    }

    #[instrument(skip(self), fields(comment_id = %id), err)]
    async fn find_comment(&self, id: &CommentId) -> StoreResult<Option<Comment>> {
        let row = sqlx::query(
            r#"
            SELECT id, "postId", "userId", "parentId", content, "createdAt", upvotes, featured
            FROM comment
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_comment", e))?;

        row.map(|r| decode::<CommentRow>(&r, "find_comment").map(Comment::from))
            .transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_post_id_by_url(
        &self,
        url: &str,
        canonical_url: Option<&str>,
    ) -> StoreResult<Option<PostId>> {
        let canonical = canonical_url.unwrap_or(url);
        let row = sqlx::query(
            r#"
            SELECT id
            FROM post
            WHERE url = $1 OR url = $2 OR "canonicalUrl" = $1 OR "canonicalUrl" = $2
            LIMIT 1
            "#,
        )
        .bind(url)
        .bind(canonical)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_post_id_by_url", e))?;

        row.map(|r| {
            r.try_get::<String, _>("id")
                .map(PostId::from)
                .map_err(|e| map_sqlx_error("find_post_id_by_url", e))
        })
        .transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_user_id_by_twitter(&self, handle: &str) -> StoreResult<Option<UserId>> {
        let row = sqlx::query(r#"SELECT id FROM "user" WHERE lower(twitter) = lower($1) LIMIT 1"#)
            .bind(handle)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_id_by_twitter", e))?;

        row.map(|r| {
            r.try_get::<String, _>("id")
                .map(UserId::from)
                .map_err(|e| map_sqlx_error("find_user_id_by_twitter", e))
        })
        .transpose()
    }

    #[instrument(skip(self, values), fields(count = values.len(), status = status.as_str()), err)]
    async fn find_keywords(
        &self,
        values: &[String],
        status: KeywordStatus,
    ) -> StoreResult<Vec<Keyword>> {
        if values.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            SELECT value, status, occurrences, synonym
            FROM keyword
            WHERE value = ANY($1) AND status = $2
            "#,
        )
        .bind(values)
        .bind(status.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_keywords", e))?;

        rows.iter()
            .map(|r| decode::<KeywordRow>(r, "find_keywords").map(Keyword::from))
            .collect()
    }

    #[instrument(
        skip(self, new_post),
        fields(post_id = %new_post.post.id, tags = new_post.tags.len(), keywords = new_post.keywords.len()),
        err
    )]
    async fn add_post(&self, new_post: NewPost) -> StoreResult<()> {
        let NewPost {
            post,
            tags,
            keywords,
        } = new_post;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("add_post", e))?;

        sqlx::query(
            r#"
            INSERT INTO post (
                id, "shortId", title, url, "canonicalUrl", "sourceId", "authorId", "createdAt",
                "publishedAt", image, ratio, placeholder, score, "siteTwitter", "creatorTwitter",
                "readTime", "tagsStr", description, toc, summary, "sentAnalyticsReport",
                views, upvotes, comments, banned
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
            )
            "#,
        )
        .bind(post.id.as_str())
        .bind(&post.short_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.canonical_url)
        .bind(post.source_id.as_str())
        .bind(post.author_id.as_ref().map(UserId::as_str))
        .bind(post.created_at)
        .bind(post.published_at)
        .bind(&post.image)
        .bind(post.ratio)
        .bind(&post.placeholder)
        .bind(post.score)
        .bind(&post.site_twitter)
        .bind(&post.creator_twitter)
        .bind(post.read_time)
        .bind(&post.tags_str)
        .bind(&post.description)
        .bind(&post.toc)
        .bind(&post.summary)
        .bind(post.sent_analytics_report)
        .bind(post.views)
        .bind(post.upvotes)
        .bind(post.comments)
        .bind(post.banned)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("add_post", e))?;

        for tag in &tags {
            sqlx::query(r#"INSERT INTO post_tag ("postId", tag) VALUES ($1, $2)"#)
                .bind(post.id.as_str())
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("add_post", e))?;
        }

        for keyword in &keywords {
            sqlx::query(
                r#"
                INSERT INTO keyword (value, status, occurrences)
                VALUES ($1, 'pending', 1)
                ON CONFLICT (value) DO UPDATE SET occurrences = keyword.occurrences + 1
                "#,
            )
            .bind(keyword)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("add_post", e))?;

            sqlx::query(r#"INSERT INTO post_keyword ("postId", keyword) VALUES ($1, $2)"#)
                .bind(post.id.as_str())
                .bind(keyword)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("add_post", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("add_post", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn increment_reputation(&self, user_id: &UserId, delta: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE "user"
            SET reputation = GREATEST(reputation + $2, 0)
            WHERE id = $1 AND GREATEST(reputation + $2, 0) <> reputation
            "#,
        )
        .bind(user_id.as_str())
        .bind(delta)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment_reputation", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn count_user_views(&self, user_id: &UserId) -> StoreResult<i64> {
        let row = sqlx::query(r#"SELECT count(*) AS views FROM view WHERE "userId" = $1"#)
            .bind(user_id.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_user_views", e))?;

        row.try_get::<i64, _>("views")
            .map_err(|e| map_sqlx_error("count_user_views", e))
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn mark_devcard_eligible(&self, user_id: &UserId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE "user" SET "devcardEligible" = true WHERE id = $1 AND "devcardEligible" = false"#,
        )
        .bind(user_id.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_devcard_eligible", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn posts_pending_analytics_report(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Post>> {
        let sql = format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM post
            WHERE "sentAnalyticsReport" = false
              AND "authorId" IS NOT NULL
              AND "createdAt" < $1
            ORDER BY "createdAt" ASC, id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(created_before)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("posts_pending_analytics_report", e))?;

        rows.iter()
            .map(|r| decode::<PostRow>(r, "posts_pending_analytics_report").map(Post::from))
            .collect()
    }

    #[instrument(skip(self), fields(post_id = %post_id), err)]
    async fn mark_analytics_report_sent(&self, post_id: &PostId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE post SET "sentAnalyticsReport" = true WHERE id = $1 AND "sentAnalyticsReport" = false"#,
        )
        .bind(post_id.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_analytics_report_sent", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn claim_side_effect(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("INSERT INTO side_effect (key) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(key)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_side_effect", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn release_side_effect(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM side_effect WHERE key = $1")
            .bind(key)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("release_side_effect", e))?;
        Ok(())
    }
}

/// Map a sqlx error to `StoreError`, keeping integrity violations apart
/// from transient conditions.
pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            let Some(code) = db_err.code() else {
                return StoreError::other(msg);
            };

            match code.as_ref() {
                "23502" => StoreError::integrity(IntegrityKind::NotNull, msg),
                "23503" => StoreError::integrity(IntegrityKind::ForeignKey, msg),
                "23505" => StoreError::integrity(IntegrityKind::Unique, msg),
                "54000" => StoreError::integrity(IntegrityKind::RowTooLarge, msg),
                "40001" | "40P01" | "55P03" | "57P01" => StoreError::unavailable(msg),
                c if c.starts_with("08") => StoreError::unavailable(msg),
                _ => StoreError::other(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::WorkerCrashed => {
            StoreError::unavailable(format!("connection worker crashed in {operation}"))
        }
        other => StoreError::other(format!("sqlx error in {operation}: {other}")),
    }
}

fn decode<'r, T: FromRow<'r, PgRow>>(row: &'r PgRow, operation: &str) -> StoreResult<T> {
    T::from_row(row)
        .map_err(|e| StoreError::other(format!("failed to decode row in {operation}: {e}")))
}

// SQLx row types

struct UserRow {
    id: String,
    name: String,
    image: Option<String>,
    email: Option<String>,
    username: Option<String>,
    twitter: Option<String>,
    reputation: i64,
    devcard_eligible: bool,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            image: row.try_get("image")?,
            email: row.try_get("email")?,
            username: row.try_get("username")?,
            twitter: row.try_get("twitter")?,
            reputation: row.try_get("reputation")?,
            devcard_eligible: row.try_get("devcardEligible")?,
        })
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id.into(),
            name: row.name,
            image: row.image,
            email: row.email,
            username: row.username,
            twitter: row.twitter,
            reputation: row.reputation,
            devcard_eligible: row.devcard_eligible,
        }
    }
}

struct PostRow {
    id: String,
    short_id: String,
    title: Option<String>,
    url: String,
    canonical_url: Option<String>,
    source_id: String,
    author_id: Option<String>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    image: Option<String>,
    ratio: Option<f64>,
    placeholder: Option<String>,
    score: i64,
    site_twitter: Option<String>,
    creator_twitter: Option<String>,
    read_time: Option<i32>,
    tags_str: Option<String>,
    description: Option<String>,
    toc: Option<JsonValue>,
    summary: Option<String>,
    sent_analytics_report: bool,
    views: i64,
    upvotes: i64,
    comments: i64,
    banned: bool,
}

impl<'r> FromRow<'r, PgRow> for PostRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PostRow {
            id: row.try_get("id")?,
            short_id: row.try_get("shortId")?,
            title: row.try_get("title")?,
            url: row.try_get("url")?,
            canonical_url: row.try_get("canonicalUrl")?,
            source_id: row.try_get("sourceId")?,
            author_id: row.try_get("authorId")?,
            created_at: row.try_get("createdAt")?,
            published_at: row.try_get("publishedAt")?,
            image: row.try_get("image")?,
            ratio: row.try_get("ratio")?,
            placeholder: row.try_get("placeholder")?,
            score: row.try_get("score")?,
            site_twitter: row.try_get("siteTwitter")?,
            creator_twitter: row.try_get("creatorTwitter")?,
            read_time: row.try_get("readTime")?,
            tags_str: row.try_get("tagsStr")?,
            description: row.try_get("description")?,
            toc: row.try_get("toc")?,
            summary: row.try_get("summary")?,
            sent_analytics_report: row.try_get("sentAnalyticsReport")?,
            views: row.try_get("views")?,
            upvotes: row.try_get("upvotes")?,
            comments: row.try_get("comments")?,
            banned: row.try_get("banned")?,
        })
    }
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id.into(),
            short_id: row.short_id,
            title: row.title,
            url: row.url,
            canonical_url: row.canonical_url,
            source_id: row.source_id.into(),
            author_id: row.author_id.map(UserId::from),
            created_at: row.created_at,
            published_at: row.published_at,
            image: row.image,
            ratio: row.ratio,
            placeholder: row.placeholder,
            score: row.score,
            site_twitter: row.site_twitter,
            creator_twitter: row.creator_twitter,
            read_time: row.read_time,
            tags_str: row.tags_str,
            description: row.description,
            toc: row.toc,
            summary: row.summary,
            sent_analytics_report: row.sent_analytics_report,
            views: row.views,
            upvotes: row.upvotes,
            comments: row.comments,
            banned: row.banned,
        }
    }
}

struct CommentRow {
    id: String,
    post_id: String,
    user_id: String,
    parent_id: Option<String>,
    content: String,
    created_at: DateTime<Utc>,
    upvotes: i64,
    featured: bool,
}

impl<'r> FromRow<'r, PgRow> for CommentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CommentRow {
            id: row.try_get("id")?,
            post_id: row.try_get("postId")?,
            user_id: row.try_get("userId")?,
            parent_id: row.try_get("parentId")?,
            content: row.try_get("content")?,
            created_at: row.try_get("createdAt")?,
            upvotes: row.try_get("upvotes")?,
            featured: row.try_get("featured")?,
        })
    }
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id.into(),
            post_id: row.post_id.into(),
            user_id: row.user_id.into(),
            parent_id: row.parent_id.map(CommentId::from),
            content: row.content,
            created_at: row.created_at,
            upvotes: row.upvotes,
            featured: row.featured,
        }
    }
}

struct KeywordRow {
    value: String,
    status: String,
    occurrences: i64,
    synonym: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for KeywordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(KeywordRow {
            value: row.try_get("value")?,
            status: row.try_get("status")?,
            occurrences: row.try_get("occurrences")?,
            synonym: row.try_get("synonym")?,
        })
    }
}

impl From<KeywordRow> for Keyword {
    fn from(row: KeywordRow) -> Self {
        Keyword {
            value: row.value,
            status: KeywordStatus::parse(&row.status).unwrap_or(KeywordStatus::Pending),
            occurrences: row.occurrences,
            synonym: row.synonym,
        }
    }
}
