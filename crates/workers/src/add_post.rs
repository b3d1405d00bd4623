//! `add-posts-v2`: store a scraped post with its tags and keywords.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{KeywordStatus, NewPost, Post, PostId, StoreResult};
use courier_events::{Delivery, Worker, WorkerError};
use courier_infra::store::DataStore;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::WorkerCtx;
use crate::text::{clean_twitter, decode_html_entities, new_short_id, parse_read_time, twitter_key};

/// Creators whose posts are never ingested.
const BANNED_CREATORS: &[&str] = &["@NewGenDeveloper"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPostData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
    pub publication_id: String,
    #[serde(default)]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ratio: Option<f64>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub site_twitter: Option<String>,
    #[serde(default)]
    pub creator_twitter: Option<String>,
    #[serde(default)]
    pub read_time: Option<JsonValue>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub toc: Option<JsonValue>,
    #[serde(default)]
    pub summary: Option<String>,
}

pub struct AddPost;

#[async_trait]
impl Worker<WorkerCtx> for AddPost {
    type Payload = AddPostData;

    fn subscription(&self) -> &'static str {
        "add-posts-v2"
    }

    async fn handle(
        &self,
        delivery: Delivery<AddPostData>,
        ctx: &WorkerCtx,
    ) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;
        let store = ctx.store.as_ref();

        let existing = store
            .find_post_id_by_url(&data.url, data.canonical_url.as_deref())
            .await?;
        if let Some(post_id) = existing {
            info!(%message_id, url = %data.url, %post_id, "post url already exists");
            return Ok(());
        }

        if data
            .creator_twitter
            .as_deref()
            .is_some_and(|t| BANNED_CREATORS.contains(&t))
        {
            info!(%message_id, url = %data.url, "author is banned");
            return Ok(());
        }

        let Some(title) = data.title.as_deref().filter(|t| !t.is_empty()) else {
            debug!(%message_id, url = %data.url, "post has no title");
            return Ok(());
        };

        let new_post = prepare(store, &data, title, Utc::now()).await?;
        let post_id = new_post.post.id.clone();
        store.add_post(new_post).await?;

        info!(%message_id, %post_id, url = %data.url, "added post");
        Ok(())
    }
}

/// Build the row set for one post. Reads only; nothing is written here.
async fn prepare(
    store: &dyn DataStore,
    data: &AddPostData,
    title: &str,
    created_at: DateTime<Utc>,
) -> StoreResult<NewPost> {
    let keywords = resolve_keywords(store, data.keywords.as_deref().unwrap_or_default()).await?;

    let tags_str = if keywords.is_empty() {
        None
    } else {
        let mut allowed = store.find_keywords(&keywords, KeywordStatus::Allow).await?;
        allowed.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        let joined = allowed
            .into_iter()
            .map(|k| k.value)
            .collect::<Vec<_>>()
            .join(",");
        (!joined.is_empty()).then_some(joined)
    };

    let creator_twitter = clean_twitter(data.creator_twitter.clone());
    let author_id = match creator_twitter.as_deref() {
        Some(handle) => store.find_user_id_by_twitter(&twitter_key(handle)).await?,
        None => None,
    };

    let published_at = data.published_at.as_deref().and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .inspect_err(|e| warn!(published_at = raw, error = %e, "ignoring unparsable publish date"))
            .ok()
    });

    let short_id = new_short_id();
    let mut post = Post::new(
        PostId::new(short_id.clone()),
        data.publication_id.as_str(),
        decode_html_entities(title),
        data.url.clone(),
        created_at,
    );
    post.short_id = short_id;
    post.canonical_url = data.canonical_url.clone();
    post.published_at = published_at;
    post.image = data.image.clone();
    post.ratio = data.ratio;
    post.placeholder = data.placeholder.clone();
    post.score = created_at.timestamp_millis().div_euclid(60_000);
    post.site_twitter = data.site_twitter.clone();
    post.creator_twitter = creator_twitter;
    post.read_time = parse_read_time(data.read_time.as_ref());
    post.tags_str = tags_str;
    post.description = data.description.clone();
    post.toc = data.toc.clone();
    post.summary = data.summary.clone();
    post.sent_analytics_report = author_id.is_none();
    post.author_id = author_id;

    Ok(NewPost {
        post,
        tags: data.tags.clone().unwrap_or_default(),
        keywords,
    })
}

/// Replace synonyms by their canonical keyword, drop purely numeric
/// keywords and duplicates. Order of first appearance is kept.
async fn resolve_keywords(store: &dyn DataStore, raw: &[String]) -> StoreResult<Vec<String>> {
    if raw.is_empty() {
        return Ok(vec![]);
    }
    let synonyms = store.find_keywords(raw, KeywordStatus::Synonym).await?;

    let mut keywords: Vec<String> = Vec::with_capacity(raw.len());
    for keyword in raw {
        let canonical = synonyms
            .iter()
            .find(|s| &s.value == keyword)
            .and_then(|s| s.synonym.clone())
            .unwrap_or_else(|| keyword.clone());
        let numeric = canonical.chars().all(|c| c.is_ascii_digit());
        if !canonical.is_empty() && !numeric && !keywords.contains(&canonical) {
            keywords.push(canonical);
        }
    }
    Ok(keywords)
}
