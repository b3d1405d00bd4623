//! Entity records owned by the relational store.
//!
//! Handlers only ever see these as values read from or written to the
//! `DataStore` collaborator; the framework itself owns no state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{CommentId, PostId, SourceId, UserId};

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub image: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub twitter: Option<String>,
    pub reputation: i64,
    pub devcard_eligible: bool,
}

impl User {
    /// A user with only the mandatory fields set.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: None,
            email: None,
            username: None,
            twitter: None,
            reputation: 0,
            devcard_eligible: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub short_id: String,
    pub title: Option<String>,
    pub url: String,
    pub canonical_url: Option<String>,
    pub source_id: SourceId,
    pub author_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub ratio: Option<f64>,
    pub placeholder: Option<String>,
    pub score: i64,
    pub site_twitter: Option<String>,
    pub creator_twitter: Option<String>,
    pub read_time: Option<i32>,
    pub tags_str: Option<String>,
    pub description: Option<String>,
    pub toc: Option<JsonValue>,
    pub summary: Option<String>,
    pub sent_analytics_report: bool,
    pub views: i64,
    pub upvotes: i64,
    pub comments: i64,
    pub banned: bool,
}

impl Post {
    /// A post with only the mandatory fields set (fixtures, tests).
    pub fn new(
        id: impl Into<PostId>,
        source_id: impl Into<SourceId>,
        title: impl Into<String>,
        url: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            short_id: id.as_str().to_string(),
            id,
            title: Some(title.into()),
            url: url.into(),
            canonical_url: None,
            source_id: source_id.into(),
            author_id: None,
            created_at,
            published_at: None,
            image: None,
            ratio: None,
            placeholder: None,
            score: 0,
            site_twitter: None,
            creator_twitter: None,
            read_time: None,
            tags_str: None,
            description: None,
            toc: None,
            summary: None,
            sent_analytics_report: true,
            views: 0,
            upvotes: 0,
            comments: 0,
            banned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub user_id: UserId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub upvotes: i64,
    pub featured: bool,
}

/// Moderation status of a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordStatus {
    Pending,
    Allow,
    Deny,
    Synonym,
}

impl KeywordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordStatus::Pending => "pending",
            KeywordStatus::Allow => "allow",
            KeywordStatus::Deny => "deny",
            KeywordStatus::Synonym => "synonym",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(KeywordStatus::Pending),
            "allow" => Some(KeywordStatus::Allow),
            "deny" => Some(KeywordStatus::Deny),
            "synonym" => Some(KeywordStatus::Synonym),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyword {
    pub value: String,
    pub status: KeywordStatus,
    pub occurrences: i64,
    /// Canonical keyword when `status` is `synonym`.
    pub synonym: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub post_id: PostId,
    pub user_id: UserId,
    pub referer: Option<String>,
    pub agent: Option<String>,
    pub ip: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything inserted by one "add post" transaction.
///
/// `keywords` are upserted (bumping `occurrences` on conflict) and linked to
/// the post; `tags` are linked verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub post: Post,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &UserId {
        &self.id
    }
}

impl Entity for Post {
    type Id = PostId;

    fn id(&self) -> &PostId {
        &self.id
    }
}

impl Entity for Comment {
    type Id = CommentId;

    fn id(&self) -> &CommentId {
        &self.id
    }
}

impl Entity for Keyword {
    type Id = String;

    fn id(&self) -> &String {
        &self.value
    }
}
