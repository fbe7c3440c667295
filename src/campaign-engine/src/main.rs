//! Campaign Engine: campaign activation, segment targeting and variant
//! selection.
//!
//! Main entry point that wires the segment cache, the campaign store and the
//! background schedulers together.

use campaign_cache::{LocalSegmentStore, RedisSegmentStore, SegmentStore};
use campaign_core::config::AppConfig;
use campaign_core::types::{SegmentBinding, Visitor};
use campaign_management::{apply_seed, load_seed_file, ActivationController, CampaignStore, Showtime};
use campaign_segmentation::{SegmentAggregator, SegmentCache, SegmentGate};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "campaign-engine")]
#[command(about = "Campaign activation, segment targeting and variant selection")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "CAMPAIGN_ENGINE_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_ENGINE__NODE_ID")]
    node_id: Option<String>,

    /// Campaign seed file (overrides config)
    #[arg(long)]
    campaigns: Option<String>,

    /// Keep segment members in process memory instead of Redis
    #[arg(long, default_value_t = false)]
    local_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the schedulers and keep segment caches warm until interrupted
    Serve,
    /// List the segments of every configured provider
    ListSegments,
    /// Refresh the cached members of one segment
    CacheSegment {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        code: String,
        /// Refresh even when an unexpired entry exists
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Evaluate all campaigns for a visitor given as JSON
    Showtime {
        #[arg(long)]
        visitor: String,
    },
}

/// Everything the subcommands share.
struct Engine {
    config: AppConfig,
    store: Arc<CampaignStore>,
    cache: Arc<SegmentCache>,
    local: Option<LocalSegmentStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_engine=info,campaign_segmentation=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(campaigns) = cli.campaigns {
        config.campaigns_file = Some(campaigns);
    }

    info!(
        node_id = %config.node_id,
        providers = config.segments.providers.len(),
        local_cache = cli.local_cache,
        "Configuration loaded"
    );

    let engine = Engine::build(config, cli.local_cache).await?;

    match cli.command {
        Command::Serve => engine.serve().await,
        Command::ListSegments => engine.list_segments().await,
        Command::CacheSegment { provider, code, force } => {
            engine.cache_segment(&provider, &code, force).await
        }
        Command::Showtime { visitor } => engine.showtime(&visitor).await,
    }
}

impl Engine {
    async fn build(config: AppConfig, local_cache: bool) -> anyhow::Result<Self> {
        let aggregator = Arc::new(SegmentAggregator::from_config(&config.segments)?);

        let (segment_store, local): (Arc<dyn SegmentStore>, Option<LocalSegmentStore>) = if local_cache {
            let local = LocalSegmentStore::new();
            (Arc::new(local.clone()), Some(local))
        } else {
            (Arc::new(RedisSegmentStore::new(&config.redis).await?), None)
        };

        let cache = Arc::new(SegmentCache::with_ttl(
            segment_store,
            aggregator,
            Duration::from_secs(config.redis.segment_ttl_secs),
        ));

        let store = Arc::new(CampaignStore::new());
        if let Some(path) = &config.campaigns_file {
            let seeds = load_seed_file(path)?;
            let controller = ActivationController::new(store.clone());
            let created = apply_seed(&store, &controller, seeds)?;
            info!(path = %path, campaigns = created.len(), "Campaigns loaded");
        }

        Ok(Self {
            config,
            store,
            cache,
            local,
        })
    }

    async fn serve(self) -> anyhow::Result<()> {
        self.start_metrics()?;
        refresh_bindings(&self.cache, self.store.segment_bindings()).await;

        // Promote planned schedules whose start time has come
        let store = self.store.clone();
        let tick = Duration::from_secs(self.config.scheduler.tick_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                store.schedules().promote_due(Utc::now());
            }
        });

        // Keep cached segments of every campaign warm
        let store = self.store.clone();
        let cache = self.cache.clone();
        let refresh = Duration::from_secs(self.config.segments.refresh_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh);
            interval.tick().await;
            loop {
                interval.tick().await;
                refresh_bindings(&cache, store.segment_bindings()).await;
            }
        });

        if let Some(local) = self.local.clone() {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                loop {
                    interval.tick().await;
                    let evicted = local.evict_expired();
                    if evicted > 0 {
                        info!(evicted, "Expired segment entries evicted");
                    }
                }
            });
        }

        info!(campaigns = self.store.len(), "Campaign Engine is running");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received, stopping");
        Ok(())
    }

    async fn list_segments(&self) -> anyhow::Result<()> {
        let listing = self.cache.aggregator().list().await;
        for e in &listing.errors {
            warn!(error = %e, "Segment provider unavailable");
        }
        println!("{}", serde_json::to_string_pretty(&listing)?);
        Ok(())
    }

    async fn cache_segment(&self, provider: &str, code: &str, force: bool) -> anyhow::Result<()> {
        let binding = SegmentBinding::new(Uuid::nil(), provider, code, true);
        let outcome = self.cache.refresh(&binding, force).await?;
        info!(provider, code, force, outcome = ?outcome, "Segment cache refreshed");
        println!("{outcome:?}");
        Ok(())
    }

    async fn showtime(&self, visitor: &str) -> anyhow::Result<()> {
        let visitor: Visitor = serde_json::from_str(visitor)?;
        refresh_bindings(&self.cache, self.store.segment_bindings()).await;

        let showtime = Showtime::new(self.store.clone(), SegmentGate::new(self.cache.clone()));
        let decisions = showtime.evaluate(&visitor).await;
        println!("{}", serde_json::to_string_pretty(&decisions)?);
        Ok(())
    }

    fn start_metrics(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.metrics.host.parse()?, self.config.metrics.port);
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

/// Refresh every binding whose entry is missing or expired. Failures are
/// logged and leave the previous entry in place.
async fn refresh_bindings(cache: &SegmentCache, bindings: Vec<SegmentBinding>) {
    for binding in bindings {
        if let Err(e) = cache.refresh(&binding, false).await {
            error!(
                provider = %binding.provider,
                code = %binding.code,
                error = %e,
                "Segment refresh failed"
            );
        }
    }
}
