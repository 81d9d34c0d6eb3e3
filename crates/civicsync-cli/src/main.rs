mod display;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use civicsync_core::{AgeLabel, CompletenessRecord, FreshnessSnapshot, Pipeline, PipelineView};
use civicsync_poll::{PollConfig, PollingClient, QueryState};
use civicsync_store::{CompletenessStore, MemoryStore, StatusWriter, SyncRecordStore};
use civicsync_sync::{CompletenessEvaluator, FreshnessAggregator, RestClient, entity_key};

#[derive(Parser)]
#[command(name = "civicsync", version, about = "Freshness and completeness of civic data")]
struct Cli {
    /// Project URL of the backing store, without `/rest/v1`.
    #[arg(long, env = "CIVICSYNC_URL", global = true)]
    url: Option<String>,

    /// API key sent as `apikey` and bearer token.
    #[arg(long, env = "CIVICSYNC_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Read from a JSON fixture instead of the backing store.
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Print JSON instead of cards.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the sync state and age of each pipeline.
    Status {
        /// Pipelines to include (default: all).
        #[arg(long, value_delimiter = ',')]
        pipelines: Vec<Pipeline>,
    },
    /// Show how complete one entity's data is.
    Completeness {
        /// Entity id, e.g. a bioguide id.
        entity_id: String,
    },
    /// Keep polling and print every change until Ctrl-C.
    Watch {
        /// Also watch this entity's completeness.
        #[arg(long)]
        entity: Option<String>,

        /// Seconds between freshness refetches.
        #[arg(long, default_value_t = 60)]
        refetch_secs: u64,

        /// Seconds before a cached snapshot counts as stale.
        #[arg(long, default_value_t = 30)]
        stale_secs: u64,

        /// Seconds between completeness refetches (default: no interval refetch).
        #[arg(long)]
        completeness_refetch_secs: Option<u64>,
    },
    /// Serve the notification trigger endpoint.
    Notify {
        #[arg(long, default_value = "127.0.0.1:8787")]
        bind: SocketAddr,

        /// Message reported by the trigger.
        #[arg(long, default_value = civicsync_notify::DISABLED_MESSAGE)]
        message: String,
    },
}

impl Command {
    fn poll_config(&self) -> PollConfig {
        let mut config = PollConfig::default();
        if let Command::Watch {
            refetch_secs,
            stale_secs,
            completeness_refetch_secs,
            ..
        } = self
        {
            config.refetch_interval = Duration::from_secs((*refetch_secs).max(1));
            config.stale_time = Duration::from_secs(*stale_secs);
            config.completeness_refetch_interval =
                completeness_refetch_secs.map(|s| Duration::from_secs(s.max(1)));
        }
        config
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotJson {
    last_updated: AgeLabel,
    last_updated_at: Option<chrono::DateTime<Utc>>,
    pipelines: Vec<PipelineView>,
}

impl SnapshotJson {
    fn new(snapshot: &FreshnessSnapshot) -> Self {
        let now = Utc::now();
        Self {
            last_updated: civicsync_core::classify_age(snapshot.last_updated(), now),
            last_updated_at: snapshot.last_updated(),
            pipelines: snapshot.views(now),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletenessJson<'a> {
    entity_id: &'a str,
    completeness: Option<&'a CompletenessRecord>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("civicsync v{}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = &cli.fixture {
        let store = MemoryStore::load_fixture(path)
            .await
            .with_context(|| format!("loading fixture {}", path.display()))?;
        return run(Arc::new(store), cli).await;
    }

    let Some(url) = cli.url.clone() else {
        bail!("no backing store: pass --url (or set CIVICSYNC_URL) or --fixture");
    };
    if cli.api_key.is_none() {
        warn!("no API key configured, requests are anonymous");
    }
    let client = RestClient::new(url, cli.api_key.as_deref()).context("building REST client")?;
    run(Arc::new(client), cli).await
}

async fn run<S>(store: Arc<S>, cli: Cli) -> anyhow::Result<()>
where
    S: SyncRecordStore + CompletenessStore + StatusWriter + 'static,
{
    let config = cli.command.poll_config();
    match cli.command {
        Command::Status { pipelines } => {
            let mut aggregator = FreshnessAggregator::new(store);
            if !pipelines.is_empty() {
                aggregator = aggregator.with_pipelines(pipelines);
            }
            let snapshot = aggregator.fetch_snapshot().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&SnapshotJson::new(&snapshot))?);
            } else {
                display::print_snapshot(&snapshot, Utc::now());
            }
        }
        Command::Completeness { entity_id } => {
            let Some(key) = entity_key(Some(&entity_id)) else {
                bail!("entity id must not be blank");
            };
            let record = CompletenessEvaluator::new(store).evaluate(Some(key)).await?;
            print_completeness(cli.json, key, record.as_ref())?;
        }
        Command::Watch { entity, .. } => {
            let client = PollingClient::new(store, config);
            watch(&client, entity.as_deref(), cli.json).await?;
        }
        Command::Notify { bind, message } => {
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            let writer: Arc<dyn StatusWriter> = store;
            civicsync_notify::serve(listener, civicsync_notify::router(writer, &message)).await?;
        }
    }
    Ok(())
}

async fn watch<S>(client: &PollingClient<S>, entity: Option<&str>, json: bool) -> anyhow::Result<()>
where
    S: SyncRecordStore + CompletenessStore + ?Sized + 'static,
{
    let mut freshness = client.watch_freshness();
    let mut completeness = client.watch_completeness(entity);
    let entity = entity_key(entity);
    info!(entity = ?entity, "watching for changes, Ctrl-C to stop");

    loop {
        tokio::select! {
            changed = freshness.changed() => {
                if !changed {
                    break;
                }
                print_freshness_state(&freshness.state(), json)?;
            }
            changed = completeness.changed(), if completeness.is_active() => {
                if !changed {
                    break;
                }
                if let Some(entity) = entity {
                    print_completeness_state(entity, &completeness.state(), json)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("stopping watch");
                break;
            }
        }
    }
    Ok(())
}

fn print_freshness_state(state: &QueryState<FreshnessSnapshot>, json: bool) -> anyhow::Result<()> {
    match state {
        QueryState::Success { value, is_fetching, error, .. } => {
            // Only print settled values; the in-flight transition follows shortly.
            if *is_fetching {
                return Ok(());
            }
            if let Some(err) = error {
                warn!(error = %err, "refresh failed, showing last snapshot");
            }
            if json {
                println!("{}", serde_json::to_string(&SnapshotJson::new(value))?);
            } else {
                display::print_snapshot(value, Utc::now());
                println!();
            }
        }
        QueryState::Error(err) => warn!(error = %err, "freshness unavailable"),
        QueryState::Idle | QueryState::Loading => {}
    }
    Ok(())
}

fn print_completeness_state(
    entity_id: &str,
    state: &QueryState<Option<CompletenessRecord>>,
    json: bool,
) -> anyhow::Result<()> {
    match state {
        QueryState::Success { value, is_fetching: false, error, .. } => {
            if let Some(err) = error {
                warn!(entity_id, error = %err, "refresh failed, showing last record");
            }
            print_completeness(json, entity_id, value.as_ref())?;
        }
        QueryState::Error(err) => warn!(entity_id, error = %err, "completeness unavailable"),
        _ => {}
    }
    Ok(())
}

fn print_completeness(
    json: bool,
    entity_id: &str,
    record: Option<&CompletenessRecord>,
) -> anyhow::Result<()> {
    if json {
        let out = CompletenessJson {
            entity_id,
            completeness: record,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        display::print_completeness(entity_id, record, Utc::now());
    }
    Ok(())
}
