//! Notification emails.
//!
//! Every email is sent at most once per logical event: the handler claims a
//! side-effect key in the store before sending and releases it when the
//! mailer fails, so a redelivery neither duplicates nor loses the email.

use async_trait::async_trait;
use courier_core::{CommentId, PostId, UserId};
use courier_events::{Delivery, Worker, WorkerError};
use courier_infra::integrations::Email;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::WorkerCtx;
use crate::context::integration_failed;

pub const COMMENT_COMMENTED_AUTHOR_TEMPLATE: &str = "comment-commented-author";
pub const DEVCARD_ELIGIBLE_TEMPLATE: &str = "devcard-eligible";
pub const ANALYTICS_REPORT_TEMPLATE: &str = "analytics-report";

const DEVCARD_URL: &str = "https://app.daily.dev/devcard";

/// Send `email` unless `key` was already claimed. Returns whether it was sent.
pub(crate) async fn send_once(
    ctx: &WorkerCtx,
    key: &str,
    email: Email,
) -> Result<bool, WorkerError> {
    if !ctx.store.claim_side_effect(key).await? {
        return Ok(false);
    }
    if let Err(e) = ctx.mailer.send(email).await {
        if let Err(release) = ctx.store.release_side_effect(key).await {
            warn!(key, error = %release, "failed to release side effect claim");
        }
        return Err(integration_failed(e));
    }
    Ok(true)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentCommentedData {
    pub user_id: UserId,
    pub child_comment_id: CommentId,
    pub post_id: PostId,
}

/// `comment-commented-author-mail`: tell the post author about a new reply.
pub struct CommentCommentedAuthorMail;

#[async_trait]
impl Worker<WorkerCtx> for CommentCommentedAuthorMail {
    type Payload = CommentCommentedData;

    fn subscription(&self) -> &'static str {
        "comment-commented-author-mail"
    }

    async fn handle(
        &self,
        delivery: Delivery<CommentCommentedData>,
        ctx: &WorkerCtx,
    ) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;
        let store = ctx.store.as_ref();

        let Some(comment) = store.find_comment(&data.child_comment_id).await? else {
            return Ok(());
        };
        let Some(post) = store.find_post(&comment.post_id).await? else {
            return Ok(());
        };
        let Some(author_id) = post.author_id.as_ref().filter(|a| **a != data.user_id) else {
            return Ok(());
        };

        let author = store.find_user(author_id).await?;
        let commenter = store.find_user(&data.user_id).await?;
        let (Some(author), Some(commenter)) = (author, commenter) else {
            info!(%message_id, %author_id, user_id = %data.user_id, "author or commenter not found");
            return Ok(());
        };
        let Some(to) = author.email.clone() else {
            return Ok(());
        };

        let email = Email::new(to, COMMENT_COMMENTED_AUTHOR_TEMPLATE)
            .var("profile_image", commenter.image.clone().unwrap_or_default())
            .var("full_name", commenter.name.clone())
            .var("post_title", post.title.clone().unwrap_or_default())
            .var("post_image", post.image.clone().unwrap_or_default())
            .var("new_comment", comment.content.clone())
            .var("post_id", post.id.as_str());

        let key = format!("{}:{}", self.subscription(), comment.id);
        if send_once(ctx, &key, email).await? {
            info!(%message_id, comment_id = %comment.id, "comment commented author email sent");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub user_id: UserId,
}

/// `devcard-eligible-email`: invite a newly eligible user to get a devcard.
pub struct DevcardEligibleEmail;

#[async_trait]
impl Worker<WorkerCtx> for DevcardEligibleEmail {
    type Payload = UserData;

    fn subscription(&self) -> &'static str {
        "devcard-eligible-email"
    }

    async fn handle(&self, delivery: Delivery<UserData>, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;

        let Some(user) = ctx.store.find_user(&data.user_id).await? else {
            return Ok(());
        };
        let Some(to) = user.email.clone() else {
            return Ok(());
        };

        let first_name = user.name.split_whitespace().next().unwrap_or_default().to_string();
        let email = Email::new(to, DEVCARD_ELIGIBLE_TEMPLATE)
            .var("first_name", first_name)
            .var("devcard_link", DEVCARD_URL);

        let key = format!("{}:{}", self.subscription(), user.id);
        if send_once(ctx, &key, email).await? {
            info!(%message_id, user_id = %user.id, "devcard eligible email sent");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    pub post_id: PostId,
}

/// `send-analytics-report-mail`: the author's first-day numbers for a post.
pub struct SendAnalyticsReportMail;

#[async_trait]
impl Worker<WorkerCtx> for SendAnalyticsReportMail {
    type Payload = PostData;

    fn subscription(&self) -> &'static str {
        "send-analytics-report-mail"
    }

    async fn handle(&self, delivery: Delivery<PostData>, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;
        let store = ctx.store.as_ref();

        let Some(post) = store.find_post(&data.post_id).await? else {
            return Ok(());
        };
        let Some(author_id) = post.author_id.as_ref() else {
            return Ok(());
        };
        let Some(to) = store.find_user(author_id).await?.and_then(|u| u.email) else {
            return Ok(());
        };

        let email = Email::new(to, ANALYTICS_REPORT_TEMPLATE)
            .var("post_title", post.title.clone().unwrap_or_default())
            .var("post_image", post.image.clone().unwrap_or_default())
            .var("live_since", post.created_at.to_rfc3339())
            .var("post_views", post.views)
            .var("post_upvotes", post.upvotes)
            .var("post_comments", post.comments);

        let key = format!("{}:{}", self.subscription(), post.id);
        if send_once(ctx, &key, email).await? {
            info!(%message_id, post_id = %post.id, "analytics report email sent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, created_at};
    use courier_core::Comment;

    fn reply(h: &Harness, id: &str, user: &str) {
        h.store.insert_comment(Comment {
            id: id.into(),
            post_id: "p1".into(),
            user_id: user.into(),
            parent_id: Some("c1".into()),
            content: "child comment".into(),
            created_at: created_at(),
            upvotes: 0,
            featured: false,
        });
    }

    fn commented(user: &str, child: &str) -> CommentCommentedData {
        CommentCommentedData {
            user_id: user.into(),
            child_comment_id: child.into(),
            post_id: "p1".into(),
        }
    }

    #[tokio::test]
    async fn mails_the_post_author_once() {
        let h = Harness::with_fixtures();
        reply(&h, "c2", "2");

        h.run(&CommentCommentedAuthorMail, commented("2", "c2"))
            .await
            .unwrap();
        h.run(&CommentCommentedAuthorMail, commented("2", "c2"))
            .await
            .unwrap();

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ido@daily.dev");
        assert_eq!(sent[0].template, COMMENT_COMMENTED_AUTHOR_TEMPLATE);
        assert_eq!(sent[0].variables["full_name"], "Tsahi");
        assert_eq!(sent[0].variables["new_comment"], "child comment");
    }

    #[tokio::test]
    async fn author_commenting_on_own_post_gets_no_mail() {
        let h = Harness::with_fixtures();
        reply(&h, "c2", "1");
        h.run(&CommentCommentedAuthorMail, commented("1", "c2"))
            .await
            .unwrap();
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn mailer_failure_releases_the_claim() {
        let h = Harness::with_fixtures();
        reply(&h, "c2", "2");

        h.mailer.set_failing(true);
        let err = h
            .run(&CommentCommentedAuthorMail, commented("2", "c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Transient(_)));
        assert!(!h.store.side_effect_claimed("comment-commented-author-mail:c2"));

        h.mailer.set_failing(false);
        h.run(&CommentCommentedAuthorMail, commented("2", "c2"))
            .await
            .unwrap();
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn devcard_email_is_sent_once_per_user() {
        let h = Harness::with_fixtures();
        let data = UserData { user_id: "2".into() };
        h.run(&DevcardEligibleEmail, data.clone()).await.unwrap();
        h.run(&DevcardEligibleEmail, data).await.unwrap();

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "tsahi@daily.dev");
        assert_eq!(sent[0].variables["first_name"], "Tsahi");
    }

    #[tokio::test]
    async fn users_without_email_are_skipped() {
        let h = Harness::with_fixtures();
        h.store.insert_user(courier_core::User::new("3", "Silent"));
        h.run(&DevcardEligibleEmail, UserData { user_id: "3".into() })
            .await
            .unwrap();
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn analytics_report_goes_to_the_author() {
        let h = Harness::with_fixtures();
        h.run(&SendAnalyticsReportMail, PostData { post_id: "p1".into() })
            .await
            .unwrap();

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ido@daily.dev");
        assert_eq!(sent[0].template, ANALYTICS_REPORT_TEMPLATE);
        assert_eq!(sent[0].variables["post_title"], "P1");
    }
}
