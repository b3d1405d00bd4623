//! `check-analytics-report` cron: queue the first-day analytics email for
//! posts that have been live long enough.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use courier_events::{CronJob, WorkerError, codec};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::WorkerCtx;
use crate::context::publish_failed;
use crate::topics;

/// How long a post is live before its report is sent.
pub const REPORT_AFTER_HOURS: i64 = 20;

const DEFAULT_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
struct Input {
    #[serde(default)]
    limit: Option<usize>,
}

pub struct CheckAnalyticsReport;

#[async_trait]
impl CronJob<WorkerCtx> for CheckAnalyticsReport {
    fn name(&self) -> &'static str {
        "check-analytics-report"
    }

    async fn run(&self, input: Option<JsonValue>, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        let input: Input = match input {
            Some(v) => codec::conform(v)?,
            None => Input::default(),
        };
        let limit = input.limit.unwrap_or(DEFAULT_LIMIT);
        let created_before = Utc::now() - Duration::hours(REPORT_AFTER_HOURS);

        let posts = ctx
            .store
            .posts_pending_analytics_report(created_before, limit)
            .await?;

        for post in &posts {
            ctx.publisher
                .publish(
                    topics::SEND_ANALYTICS_REPORT,
                    &serde_json::json!({ "postId": post.id }),
                )
                .await
                .map_err(publish_failed)?;
            ctx.store.mark_analytics_report_sent(&post.id).await?;
        }

        info!(posts = posts.len(), "analytics reports queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use courier_core::Post;
    use serde_json::json;

    fn authored(h: &Harness, id: &str, hours_ago: i64) {
        let mut post = Post::new(
            id,
            "a",
            id,
            format!("https://{id}.com"),
            Utc::now() - Duration::hours(hours_ago),
        );
        post.author_id = Some("1".into());
        post.sent_analytics_report = false;
        h.store.insert_post(post);
    }

    #[tokio::test]
    async fn queues_reports_for_old_enough_posts() {
        let h = Harness::with_fixtures();
        authored(&h, "old", 21);
        authored(&h, "fresh", 2);

        CheckAnalyticsReport.run(None, &h.ctx).await.unwrap();

        assert_eq!(
            h.publisher.payloads(topics::SEND_ANALYTICS_REPORT),
            vec![json!({ "postId": "old" })]
        );
        assert!(h.store.post("old").unwrap().sent_analytics_report);
        assert!(!h.store.post("fresh").unwrap().sent_analytics_report);

        // Nothing left on the next tick.
        h.publisher.clear();
        CheckAnalyticsReport.run(None, &h.ctx).await.unwrap();
        assert!(h.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn honours_the_limit() {
        let h = Harness::with_fixtures();
        authored(&h, "a1", 30);
        authored(&h, "a2", 25);

        CheckAnalyticsReport
            .run(Some(json!({ "limit": 1 })), &h.ctx)
            .await
            .unwrap();
        assert_eq!(
            h.publisher.payloads(topics::SEND_ANALYTICS_REPORT),
            vec![json!({ "postId": "a1" })]
        );
    }

    #[tokio::test]
    async fn rejects_malformed_input() {
        let h = Harness::with_fixtures();
        let err = CheckAnalyticsReport
            .run(Some(json!({ "limit": "many" })), &h.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Decode(_)));
    }
}
