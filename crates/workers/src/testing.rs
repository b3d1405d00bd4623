use std::sync::Arc;

use courier_core::{Comment, Post, User};
use courier_events::{Delivery, Worker, WorkerError};
use courier_infra::integrations::{RecordingAnalytics, RecordingMailer, StaticFlags};
use courier_infra::publish::InMemoryPublisher;
use courier_infra::store::InMemoryStore;
use chrono::{TimeZone, Utc};

use crate::WorkerCtx;

/// Context over in-memory collaborators, with typed handles for assertions.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub mailer: Arc<RecordingMailer>,
    pub analytics: Arc<RecordingAnalytics>,
    pub flags: Arc<StaticFlags>,
    pub publisher: Arc<InMemoryPublisher>,
    pub ctx: WorkerCtx,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let mailer = Arc::new(RecordingMailer::new());
        let analytics = Arc::new(RecordingAnalytics::new());
        let flags = Arc::new(StaticFlags::new());
        let publisher = Arc::new(InMemoryPublisher::new());
        let ctx = WorkerCtx {
            store: store.clone(),
            mailer: mailer.clone(),
            analytics: analytics.clone(),
            flags: flags.clone(),
            publisher: publisher.clone(),
        };
        Self {
            store,
            mailer,
            analytics,
            flags,
            publisher,
            ctx,
        }
    }

    /// Source `a`, users `1` (Ido) and `2` (Tsahi) with emails, post `p1`
    /// by user `1`, comment `c1` on it by user `1`.
    pub fn with_fixtures() -> Self {
        let h = Self::new();
        h.store.insert_source("a");

        let mut ido = User::new("1", "Ido");
        ido.email = Some("ido@daily.dev".into());
        ido.reputation = 3;
        h.store.insert_user(ido);

        let mut tsahi = User::new("2", "Tsahi");
        tsahi.email = Some("tsahi@daily.dev".into());
        h.store.insert_user(tsahi);

        let mut post = Post::new("p1", "a", "P1", "http://p1.com", created_at());
        post.author_id = Some("1".into());
        h.store.insert_post(post);

        h.store.insert_comment(Comment {
            id: "c1".into(),
            post_id: "p1".into(),
            user_id: "1".into(),
            parent_id: None,
            content: "parent comment".into(),
            created_at: created_at(),
            upvotes: 1,
            featured: false,
        });
        h
    }

    pub async fn run<W: Worker<WorkerCtx>>(
        &self,
        worker: &W,
        data: W::Payload,
    ) -> Result<(), WorkerError> {
        worker.handle(Delivery::new("m1", data), &self.ctx).await
    }
}

pub fn created_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 2, 6, 0, 0, 0).unwrap()
}
