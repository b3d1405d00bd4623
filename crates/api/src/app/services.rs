//! Service wiring: collaborators chosen from `Config`, the registry and the
//! dispatcher, and the background tasks (loopback delivery, change relay).

use std::sync::Arc;

use courier_events::{Dispatcher, RegistryError};
use courier_infra::cdc::{CdcNormalizer, ChangeRelay, PgLogicalSlotSource, RelayHandle};
use courier_infra::config::Config;
use courier_infra::integrations::{FeatureFlags, FlagsmithClient, LogAnalytics, LogMailer, StaticFlags};
use courier_infra::publish::{LoopbackPublisher, MessagePublisher, PushRelayPublisher};
use courier_infra::store::{DataStore, InMemoryStore, PostgresStore};
use courier_workers::{WorkerCtx, registry, topic_map};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Rows fetched per change-relay poll.
const CDC_BATCH_SIZE: i32 = 500;

/// Logical server name stamped on change envelopes.
const CDC_SERVER_NAME: &str = "api";

pub struct AppServices {
    pub dispatcher: Dispatcher<WorkerCtx>,
    relay: Option<RelayHandle>,
    loopback: Option<JoinHandle<()>>,
}

impl AppServices {
    /// Registry + dispatcher over an already-built context; no background tasks.
    pub fn from_context(ctx: WorkerCtx) -> Result<Self, RegistryError> {
        let registry = Arc::new(registry()?);
        Ok(Self {
            dispatcher: Dispatcher::new(registry, Arc::new(ctx)),
            relay: None,
            loopback: None,
        })
    }

    /// Stop the background tasks.
    pub async fn shutdown(self) {
        if let Some(relay) = self.relay {
            relay.shutdown().await;
        }
        if let Some(loopback) = self.loopback {
            loopback.abort();
        }
    }
}

pub async fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let postgres = match &config.database {
        Some(db) => {
            let store = PostgresStore::connect(&db.url, db.max_connections).await?;
            store.migrate().await?;
            info!(max_connections = db.max_connections, "using postgres store");
            Some(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store");
            None
        }
    };
    let store: Arc<dyn DataStore> = match &postgres {
        Some(pg) => pg.clone(),
        None => Arc::new(InMemoryStore::new()),
    };

    let flags: Arc<dyn FeatureFlags> = match &config.flagsmith_key {
        Some(key) => Arc::new(FlagsmithClient::new(key.clone())),
        None => {
            warn!("FLAGSMITH_KEY not set; every feature flag is off");
            Arc::new(StaticFlags::new())
        }
    };

    let (publisher, loopback) = match &config.push_endpoint {
        Some(endpoint) => {
            info!(%endpoint, "publishing through push relay");
            let publisher: Arc<dyn MessagePublisher> = Arc::new(
                PushRelayPublisher::new(endpoint.clone(), topic_map()).with_retry(config.retry.clone()),
            );
            (publisher, None)
        }
        None => {
            info!("PUSH_ENDPOINT not set; delivering published messages in-process");
            let (publisher, receiver) = LoopbackPublisher::new(topic_map());
            let publisher: Arc<dyn MessagePublisher> = Arc::new(publisher);
            (publisher, Some(receiver))
        }
    };

    let ctx = WorkerCtx {
        store,
        mailer: Arc::new(LogMailer),
        analytics: Arc::new(LogAnalytics),
        flags,
        publisher: publisher.clone(),
    };
    let mut services = AppServices::from_context(ctx)?;
    info!(
        workers = ?services.dispatcher.registry().worker_names(),
        crons = ?services.dispatcher.registry().cron_names(),
        "registry built"
    );

    if let Some(receiver) = loopback {
        let dispatcher = services.dispatcher.clone();
        services.loopback = Some(tokio::spawn(receiver.run(dispatcher, config.retry.clone())));
    }

    match (&config.cdc, &postgres) {
        (Some(cdc), Some(pg)) => {
            let source = PgLogicalSlotSource::for_store(pg, cdc.slot.clone(), CDC_BATCH_SIZE);
            source.ensure_slot().await?;
            let db = config
                .database
                .as_ref()
                .map(|d| database_name(&d.url))
                .unwrap_or_default();
            let normalizer = CdcNormalizer::new(db, CDC_SERVER_NAME, publisher);
            services.relay = Some(ChangeRelay::new(source, normalizer, cdc.poll_interval).spawn());
            info!(slot = %cdc.slot, "change relay started");
        }
        (Some(_), None) => warn!("CDC_SLOT is set but DATABASE_URL is not; change relay disabled"),
        (None, _) => {}
    }

    Ok(services)
}

/// Database name from a connection URL (`postgres://u:p@host/db?opts`).
fn database_name(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|tail| tail.split('?').next())
        .unwrap_or_default()
        .to_string()
}
