//! Devcard eligibility: a user becomes eligible once their view count
//! reaches a per-user limit served by the feature-flag service.

use async_trait::async_trait;
use courier_core::{PostId, UserId};
use courier_events::{Delivery, Worker, WorkerError};
use courier_infra::integrations::AnalyticsEvent;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::WorkerCtx;
use crate::context::integration_failed;
use crate::mail::UserData;

/// Flag whose numeric value is the view threshold.
pub const DEVCARD_LIMIT_FLAG: &str = "feat_limit_dev_card";

pub const DEVCARD_ELIGIBLE_EVENT: &str = "devcard eligible";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewData {
    pub post_id: PostId,
    pub user_id: UserId,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// `check-devcard-eligibility`
pub struct CheckDevcardEligibility;

#[async_trait]
impl Worker<WorkerCtx> for CheckDevcardEligibility {
    type Payload = ViewData;

    fn subscription(&self) -> &'static str {
        "check-devcard-eligibility"
    }

    async fn handle(&self, delivery: Delivery<ViewData>, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;

        let Some(user) = ctx.store.find_user(&data.user_id).await? else {
            return Ok(());
        };
        if user.devcard_eligible {
            return Ok(());
        }

        let flag = ctx
            .flags
            .flag(user.id.as_str(), DEVCARD_LIMIT_FLAG)
            .await
            .map_err(integration_failed)?;
        let limit = match flag.as_i64() {
            Some(limit) if flag.enabled && limit > 0 => limit,
            _ => return Ok(()),
        };

        let views = ctx.store.count_user_views(&user.id).await?;
        if views < limit {
            return Ok(());
        }

        if ctx.store.mark_devcard_eligible(&user.id).await? {
            info!(%message_id, user_id = %user.id, views, limit, "user is now eligible for devcard");
        }
        Ok(())
    }
}

/// `devcard-eligible-analytics`
pub struct DevcardEligibleAnalytics;

#[async_trait]
impl Worker<WorkerCtx> for DevcardEligibleAnalytics {
    type Payload = UserData;

    fn subscription(&self) -> &'static str {
        "devcard-eligible-analytics"
    }

    async fn handle(&self, delivery: Delivery<UserData>, ctx: &WorkerCtx) -> Result<(), WorkerError> {
        let Delivery { message_id, data } = delivery;

        ctx.analytics
            .track(AnalyticsEvent::new(data.user_id.as_str(), DEVCARD_ELIGIBLE_EVENT))
            .await
            .map_err(integration_failed)?;
        info!(%message_id, user_id = %data.user_id, "devcard eligible event tracked");
        Ok(())
    }
}
