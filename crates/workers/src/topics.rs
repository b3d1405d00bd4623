//! Topic names and the subscriptions listening on each.

use courier_infra::cdc::CHANGE_TOPIC;
use courier_infra::publish::TopicMap;

pub const POSTS: &str = "posts";
pub const POST_UPVOTED: &str = "post-upvoted";
pub const POST_UPVOTE_CANCELED: &str = "post-upvote-canceled";
pub const COMMENT_UPVOTED: &str = "comment-upvoted";
pub const COMMENT_UPVOTE_CANCELED: &str = "comment-upvote-canceled";
pub const COMMENT_COMMENTED: &str = "comment-commented";
pub const VIEWS: &str = "views";
pub const DEVCARD_ELIGIBLE: &str = "devcard-eligible";
pub const SEND_ANALYTICS_REPORT: &str = "send-analytics-report";

/// Fan-out of every topic to the subscriptions registered in this crate.
pub fn topic_map() -> TopicMap {
    TopicMap::new()
        .with(POSTS, &["add-posts-v2"])
        .with(POST_UPVOTED, &["post-upvoted-rep"])
        .with(POST_UPVOTE_CANCELED, &["post-upvote-canceled-rep"])
        .with(COMMENT_UPVOTED, &["comment-upvoted-rep"])
        .with(COMMENT_UPVOTE_CANCELED, &["comment-upvote-canceled-rep"])
        .with(COMMENT_COMMENTED, &["comment-commented-author-mail"])
        .with(VIEWS, &["check-devcard-eligibility"])
        .with(
            DEVCARD_ELIGIBLE,
            &["devcard-eligible-email", "devcard-eligible-analytics"],
        )
        .with(SEND_ANALYTICS_REPORT, &["send-analytics-report-mail"])
        .with(CHANGE_TOPIC, &["cdc"])
}
