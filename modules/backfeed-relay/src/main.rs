use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backfeed_common::{Clock, Config, PlatformKind, Source, SourceStatus, SystemClock};
use backfeed_silo::{FacebookSilo, Silo, TwitterSilo};
use backfeed_store::{EntityStore, MemoryStore, PgStore};

use backfeed_relay::handlers::RelayHandler;
use backfeed_relay::lease::LeaseManager;
use backfeed_relay::poller::Poller;
use backfeed_relay::propagator::Propagator;
use backfeed_relay::queue::{spawn_workers, Job, JobQueue, QueueConfig};
use backfeed_relay::webmention::HttpWebmentionClient;

#[derive(Parser)]
#[command(about = "Syndicates social-media comments back to their original posts via webmention")]
struct Args {
    /// Upsert sources from SOURCES_FILE and exit without polling.
    #[arg(long)]
    seed_only: bool,
}

/// One entry in the SOURCES_FILE seed list.
#[derive(Debug, Deserialize)]
struct SeedSource {
    id: String,
    platform: PlatformKind,
    name: String,
    credential: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("backfeed=info".parse()?))
        .init();

    let args = Args::parse();

    info!("Backfeed relay starting...");
    let config = Config::from_env();
    config.log_redacted();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn EntityStore> = match &config.database_url {
        Some(database_url) => {
            let store = PgStore::connect(database_url).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store (state is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(path) = &config.sources_file {
        let seeded = seed_sources(store.as_ref(), clock.as_ref(), path).await?;
        info!(seeded, path = path.as_str(), "Sources seeded");
    }
    if args.seed_only {
        return Ok(());
    }

    let timeout = Duration::from_secs(config.http_timeout_secs);
    let mut silos: HashMap<PlatformKind, Arc<dyn Silo>> = HashMap::new();
    silos.insert(PlatformKind::Facebook, Arc::new(FacebookSilo::new(timeout)));
    silos.insert(PlatformKind::Twitter, Arc::new(TwitterSilo::new(timeout)));

    let (queue, receiver) = JobQueue::new();
    let poller = Poller::new(store.clone(), silos, queue.clone(), clock.clone());
    let lease = LeaseManager::new(store.clone(), clock.clone());
    let propagator = Propagator::new(
        store.clone(),
        lease,
        Arc::new(HttpWebmentionClient::new(timeout)),
        config.base_url.clone(),
    );
    let handler = Arc::new(RelayHandler::new(poller, propagator));

    // Seed poll jobs carry each source's current last_polled as their
    // de-duplication token.
    let mut enqueued = 0;
    for source in store.list_sources().await? {
        if source.status == SourceStatus::Disabled {
            continue;
        }
        queue.enqueue(
            Job::Poll {
                source_id: source.id.clone(),
                last_polled: source.last_polled,
            },
            Duration::ZERO,
        );
        enqueued += 1;
    }
    info!(enqueued, workers = config.workers, "Polling started");

    let _workers = spawn_workers(
        config.workers,
        receiver,
        queue.clone(),
        handler,
        QueueConfig::default(),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

/// Upsert sources from a JSON seed file. Existing sources keep their
/// last_polled and status; only the credential and name are refreshed.
async fn seed_sources(
    store: &dyn EntityStore,
    clock: &dyn Clock,
    path: &str,
) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path).await?;
    let seeds: Vec<SeedSource> = serde_json::from_str(&raw)?;

    let mut count = 0;
    for seed in seeds {
        let id = backfeed_common::SourceId::new(seed.id);
        let source = match store.get_source(&id).await? {
            Some(mut existing) => {
                existing.name = seed.name;
                existing.credential = seed.credential;
                existing
            }
            None => Source {
                id,
                platform: seed.platform,
                name: seed.name,
                credential: seed.credential,
                last_polled: clock.now(),
                status: SourceStatus::Enabled,
            },
        };
        store.put_source(&source).await?;
        count += 1;
    }
    Ok(count)
}
