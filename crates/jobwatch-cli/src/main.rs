use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobwatch_pipeline::{
    run_daemon, Dispatcher, IngestionPipeline, LogDispatcher, PipelineConfig, SlackDispatcher,
};
use jobwatch_store::SqliteStore;

#[derive(Parser)]
#[command(name = "jobwatch", about = "Personal job-search watcher", version)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = "jobwatch.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one poll cycle and print the report.
    Run {
        /// Also flush the digest queue after the cycle.
        #[arg(long)]
        flush_digest: bool,
    },
    /// Poll and send digests on the configured cron schedules until ctrl-c.
    Daemon,
    /// Send the pending digest batch now.
    Digest,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)?;

    let store = Arc::new(
        SqliteStore::open(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?,
    );
    let dispatcher: Arc<dyn Dispatcher> = match &config.slack_webhook_url {
        Some(url) => Arc::new(SlackDispatcher::new(url.clone())),
        None => Arc::new(LogDispatcher),
    };
    let pipeline = Arc::new(IngestionPipeline::new(config, store, dispatcher)?);

    match cli.command {
        Command::Run { flush_digest } => {
            let report = pipeline.run_cycle().await;
            if flush_digest {
                pipeline.flush_digest().await?;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Daemon => run_daemon(pipeline).await?,
        Command::Digest => {
            let report = pipeline.flush_digest().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
