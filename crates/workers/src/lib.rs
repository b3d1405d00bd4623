//! Business handlers and cron jobs of the background service.
//!
//! Each handler is a `Worker` bound to one subscription; `workers()` and
//! `crons()` list everything the HTTP surface exposes.

mod add_post;
mod analytics_report;
mod cdc;
mod context;
mod devcard;
mod mail;
mod reputation;
mod text;
pub mod topics;

#[cfg(test)]
mod testing;

use courier_events::{BoxedCron, BoxedWorker, Registry, RegistryError, boxed_cron, boxed_worker};

pub use add_post::{AddPost, AddPostData};
pub use analytics_report::{CheckAnalyticsReport, REPORT_AFTER_HOURS};
pub use cdc::CdcRouter;
pub use context::WorkerCtx;
pub use devcard::{
    CheckDevcardEligibility, DEVCARD_ELIGIBLE_EVENT, DEVCARD_LIMIT_FLAG, DevcardEligibleAnalytics,
    ViewData,
};
pub use mail::{
    ANALYTICS_REPORT_TEMPLATE, COMMENT_COMMENTED_AUTHOR_TEMPLATE, CommentCommentedAuthorMail,
    CommentCommentedData, DEVCARD_ELIGIBLE_TEMPLATE, DevcardEligibleEmail, PostData,
    SendAnalyticsReportMail, UserData,
};
pub use reputation::{CommentReputation, CommentUpvoteData, PostReputation, PostUpvoteData};
pub use topics::topic_map;

pub fn workers() -> Vec<BoxedWorker<WorkerCtx>> {
    vec![
        boxed_worker(AddPost),
        boxed_worker(CommentReputation::upvoted()),
        boxed_worker(CommentReputation::upvote_canceled()),
        boxed_worker(PostReputation::upvoted()),
        boxed_worker(PostReputation::upvote_canceled()),
        boxed_worker(CommentCommentedAuthorMail),
        boxed_worker(CheckDevcardEligibility),
        boxed_worker(DevcardEligibleEmail),
        boxed_worker(DevcardEligibleAnalytics),
        boxed_worker(SendAnalyticsReportMail),
        boxed_worker(CdcRouter),
    ]
}

pub fn crons() -> Vec<BoxedCron<WorkerCtx>> {
    vec![boxed_cron(CheckAnalyticsReport)]
}

/// Every worker and cron, validated.
pub fn registry() -> Result<Registry<WorkerCtx>, RegistryError> {
    Registry::new(workers(), crons())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_and_every_subscription_has_a_topic() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), workers().len() + crons().len());

        let map = topic_map();
        let routed: Vec<&String> = map
            .topics()
            .flat_map(|t| map.subscriptions(t))
            .collect();
        for name in registry.worker_names() {
            assert!(
                routed.iter().any(|s| s.as_str() == name),
                "no topic delivers to {name}"
            );
        }
        for sub in routed {
            assert!(registry.route(sub).is_some(), "topic routes to unknown {sub}");
        }
    }
}
