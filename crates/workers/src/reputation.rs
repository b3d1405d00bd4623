//! Reputation changes driven by upvotes.
//!
//! The author of the upvoted comment or post gains (or loses, on cancel) one
//! point. Upvoting your own content changes nothing. Reputation never goes
//! below zero.

use async_trait::async_trait;
use courier_core::{CommentId, PostId, UserId};
use courier_events::{Delivery, Worker, WorkerError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::WorkerCtx;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentUpvoteData {
    pub user_id: UserId,
    pub comment_id: CommentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUpvoteData {
    pub user_id: UserId,
    pub post_id: PostId,
}

pub struct CommentReputation {
    subscription: &'static str,
    delta: i64,
}

impl CommentReputation {
    pub fn upvoted() -> Self {
        Self {
            subscription: "comment-upvoted-rep",
            delta: 1,
        }
    }

    pub fn upvote_canceled() -> Self {
        Self {
            subscription: "comment-upvote-canceled-rep",
            delta: -1,
        }
    }
}

#[async_trait]
impl Worker<WorkerCtx> for CommentReputation {
    type Payload = CommentUpvoteData;

    fn subscription(&self) -> &'static str {
        self.subscription
    }

    async fn handle(
        &self,
        delivery: Delivery<CommentUpvoteData>,
        ctx: &WorkerCtx,
    ) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;

        let Some(comment) = ctx.store.find_comment(&data.comment_id).await? else {
            info!(%message_id, comment_id = %data.comment_id, "comment not found");
            return Ok(());
        };
        if comment.user_id == data.user_id {
            return Ok(());
        }

        let changed = ctx
            .store
            .increment_reputation(&comment.user_id, self.delta)
            .await?;
        info!(
            %message_id,
            user_id = %data.user_id,
            comment_id = %data.comment_id,
            author_id = %comment.user_id,
            delta = self.delta,
            changed,
            "updated reputation due to comment upvote"
        );
        Ok(())
    }
}

pub struct PostReputation {
    subscription: &'static str,
    delta: i64,
}

impl PostReputation {
    pub fn upvoted() -> Self {
        Self {
            subscription: "post-upvoted-rep",
            delta: 1,
        }
    }

    pub fn upvote_canceled() -> Self {
        Self {
            subscription: "post-upvote-canceled-rep",
            delta: -1,
        }
    }
}

#[async_trait]
impl Worker<WorkerCtx> for PostReputation {
    type Payload = PostUpvoteData;

    fn subscription(&self) -> &'static str {
        self.subscription
    }

    async fn handle(
        &self,
        delivery: Delivery<PostUpvoteData>,
        ctx: &WorkerCtx,
    ) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;

        let post = ctx.store.find_post(&data.post_id).await?;
        let Some(author_id) = post.and_then(|p| p.author_id) else {
            return Ok(());
        };
        if author_id == data.user_id {
            return Ok(());
        }

        let changed = ctx.store.increment_reputation(&author_id, self.delta).await?;
        info!(
            %message_id,
            user_id = %data.user_id,
            post_id = %data.post_id,
            %author_id,
            delta = self.delta,
            changed,
            "updated reputation due to post upvote"
        );
        Ok(())
    }
}
