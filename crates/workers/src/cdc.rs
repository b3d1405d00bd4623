//! `cdc`: turn row changes into business events.
//!
//! | table            | change                         | topic                     |
//! |------------------|--------------------------------|---------------------------|
//! | `upvote`         | create / delete                | `post-upvoted` / `post-upvote-canceled` |
//! | `comment_upvote` | create / delete                | `comment-upvoted` / `comment-upvote-canceled` |
//! | `comment`        | create with a parent           | `comment-commented`       |
//! | `user`           | update, `devcardEligible` set  | `devcard-eligible`        |
//!
//! Everything else is ignored. A change whose before/after images do not fit
//! its operation is dropped as a permanent failure.

use async_trait::async_trait;
use courier_core::{CommentId, PostId, UserId};
use courier_events::{ChangeEnvelope, ChangeOperation, Delivery, Worker, WorkerError, codec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::WorkerCtx;
use crate::context::publish_failed;
use crate::mail::{CommentCommentedData, UserData};
use crate::reputation::{CommentUpvoteData, PostUpvoteData};
use crate::topics;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentRow {
    id: CommentId,
    post_id: PostId,
    user_id: UserId,
    #[serde(default)]
    parent_id: Option<CommentId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRow {
    id: UserId,
    #[serde(default)]
    devcard_eligible: Option<bool>,
}

pub struct CdcRouter;

#[async_trait]
impl Worker<WorkerCtx> for CdcRouter {
    type Payload = ChangeEnvelope<JsonValue>;

    fn subscription(&self) -> &'static str {
        "cdc"
    }

    async fn handle(
        &self,
        delivery: Delivery<ChangeEnvelope<JsonValue>>,
        ctx: &WorkerCtx,
    ) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;
        data.validate()
            .map_err(|e| WorkerError::permanent(e.to_string()))?;

        let table = data.table();
        let op = data.op();
        let routed = match (table, op) {
            ("upvote", ChangeOperation::Create) => {
                let row: PostUpvoteData = row(data.after())?;
                Some((topics::POST_UPVOTED, to_json(&row)?))
            }
            ("upvote", ChangeOperation::Delete) => {
                let row: PostUpvoteData = row(data.before())?;
                Some((topics::POST_UPVOTE_CANCELED, to_json(&row)?))
            }
            ("comment_upvote", ChangeOperation::Create) => {
                let row: CommentUpvoteData = row(data.after())?;
                Some((topics::COMMENT_UPVOTED, to_json(&row)?))
            }
            ("comment_upvote", ChangeOperation::Delete) => {
                let row: CommentUpvoteData = row(data.before())?;
                Some((topics::COMMENT_UPVOTE_CANCELED, to_json(&row)?))
            }
            ("comment", ChangeOperation::Create) => {
                let comment: CommentRow = row(data.after())?;
                match comment.parent_id {
                    Some(_) => Some((
                        topics::COMMENT_COMMENTED,
                        to_json(&CommentCommentedData {
                            user_id: comment.user_id,
                            child_comment_id: comment.id,
                            post_id: comment.post_id,
                        })?,
                    )),
                    None => None,
                }
            }
            ("user", ChangeOperation::Update) => {
                let after: UserRow = row(data.after())?;
                let before = data
                    .before()
                    .map(|b| codec::conform::<UserRow>(b.clone()))
                    .transpose()?;
                let was_eligible = before.and_then(|b| b.devcard_eligible).unwrap_or(false);
                if after.devcard_eligible == Some(true) && !was_eligible {
                    Some((
                        topics::DEVCARD_ELIGIBLE,
                        to_json(&UserData { user_id: after.id })?,
                    ))
                } else {
                    None
                }
            }
            _ => None,
        };

        let Some((topic, payload)) = routed else {
            debug!(%message_id, table, op = op.as_str(), "change ignored");
            return Ok(());
        };

        let published_id = ctx
            .publisher
            .publish(topic, &payload)
            .await
            .map_err(publish_failed)?;
        info!(%message_id, table, op = op.as_str(), topic, %published_id, "change routed");
        Ok(())
    }
}

/// Decode a row image. A missing image where one is required is permanent.
fn row<R: DeserializeOwned>(image: Option<&JsonValue>) -> Result<R, WorkerError> {
    let image = image.ok_or_else(|| WorkerError::permanent("change has no row image"))?;
    Ok(codec::conform(image.clone())?)
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, WorkerError> {
    serde_json::to_value(value).map_err(|e| WorkerError::Other(e.into()))
}
