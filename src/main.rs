use ai_news_digest::{
    ExtractiveSummarizer, ItemStore, PipelineConfig, PipelineError, PipelineOrchestrator,
    Scheduler, SqliteStore,
};
use clap::{Parser, Subcommand};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ai-news-digest", about = "Scheduled AI news digest pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single collect -> process -> digest cycle.
    RunOnce,
    /// Run cycles on a fixed interval until interrupted.
    Run {
        #[arg(long, default_value_t = 21600)]
        interval_secs: u64,
    },
    /// Print the latest cycle and digest state.
    Status,
}

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_ALREADY_RUNNING: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let store = match SqliteStore::connect(&config.database_url, config.max_attempts).await {
        Ok(store) => Arc::new(store.with_stale_timeout(config.stale_cycle_timeout)),
        Err(e) => {
            error!("Cannot open item store: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match run(cli.command, store, config).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            if matches!(
                e.downcast_ref::<PipelineError>(),
                Some(PipelineError::AlreadyRunning)
            ) {
                error!("Another cycle is already running");
                ExitCode::from(EXIT_ALREADY_RUNNING)
            } else {
                error!("Fatal: {:#}", e);
                ExitCode::from(EXIT_FATAL)
            }
        }
    }
}

async fn run(
    command: Command,
    store: Arc<SqliteStore>,
    config: PipelineConfig,
) -> anyhow::Result<()> {
    match command {
        Command::RunOnce => {
            let scheduler = Scheduler::new(Arc::new(build_orchestrator(store, config)?));
            let report = scheduler.run_once().await?;
            info!(
                "Cycle {} reached {:?}: {} candidates, {} collected, {} processed, {} failed",
                report.cycle_id,
                report.stage_reached,
                report.candidates,
                report.collected,
                report.processed,
                report.failed
            );
            for err in &report.connector_errors {
                info!("Connector error: {}", err);
            }
            if let Some(fatal) = report.fatal {
                anyhow::bail!("cycle {} failed: {}", report.cycle_id, fatal);
            }
            Ok(())
        }
        Command::Run { interval_secs } => {
            let scheduler = Scheduler::new(Arc::new(build_orchestrator(store, config)?));
            scheduler
                .run_continuous(Duration::from_secs(interval_secs))
                .await?;
            Ok(())
        }
        Command::Status => {
            match store.latest_cycle().await? {
                Some(cycle) => {
                    info!(
                        "Latest cycle {}: stage {:?}, started {}, finished {:?}, {} items touched",
                        cycle.cycle_id,
                        cycle.stage,
                        cycle.started_at,
                        cycle.finished_at,
                        cycle.touched.len()
                    );
                    if let Some(digest) = store.get_digest_for_cycle(cycle.cycle_id).await? {
                        info!(
                            "Digest {}: {} entries, delivery {:?}",
                            digest.digest_id,
                            digest.entries.len(),
                            digest.delivery_status
                        );
                    }
                }
                None => info!("No cycles recorded yet"),
            }
            Ok(())
        }
    }
}

fn build_orchestrator(
    store: Arc<SqliteStore>,
    config: PipelineConfig,
) -> Result<PipelineOrchestrator, PipelineError> {
    let mut orchestrator =
        PipelineOrchestrator::new(store, Arc::new(ExtractiveSummarizer::new()), config);

    for (source_id, name, url) in configured_feeds()? {
        let source = ai_news_digest::sources::RssSource::new(source_id, name, url)?;
        orchestrator.add_source(Arc::new(source));
    }
    Ok(orchestrator)
}

/// Feeds come from DIGEST_FEEDS ("name=url,name=url"); a small default
/// set keeps the binary useful out of the box.
fn configured_feeds() -> Result<Vec<(String, String, String)>, PipelineError> {
    let raw = match env::var("DIGEST_FEEDS") {
        Ok(v) if !v.trim().is_empty() => v,
        _ => {
            return Ok(vec![(
                "techcrunch-startups".to_string(),
                "TechCrunch Startups".to_string(),
                "https://techcrunch.com/category/startups/feed/".to_string(),
            )])
        }
    };

    raw.split(',')
        .map(|pair| {
            let (name, url) = pair.split_once('=').ok_or_else(|| {
                PipelineError::Config(format!("DIGEST_FEEDS entry '{}' is not name=url", pair))
            })?;
            let id = name.trim().to_lowercase().replace(' ', "-");
            Ok((id, name.trim().to_string(), url.trim().to_string()))
        })
        .collect()
}
