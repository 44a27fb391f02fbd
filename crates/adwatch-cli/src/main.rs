use std::path::{Path, PathBuf};

use adwatch_storage::ActiveFilter;
use adwatch_sync::{
    build_enrichment, build_poller, export_active, open_catalog, shutdown_channel,
    spawn_ctrl_c_handler, AppConfig, DEFAULT_CONFIG_FILE, DEFAULT_EXPORT_FILE,
};
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "adwatch")]
#[command(about = "Classified ad feed watcher")]
struct Cli {
    /// TOML or YAML config file. Without it `config.toml` is read if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or upgrade the catalog schema.
    Migrate,
    /// Poll all feeds every interval until interrupted.
    Poll {
        /// Also enrich up to N pending entries after every interval.
        #[arg(long, value_name = "N")]
        enrich: Option<u32>,
    },
    /// Run a single poll cycle and exit.
    PollOnce,
    /// Fetch detail pages and patch the matching catalog entries.
    Enrich {
        urls: Vec<String>,
        /// Enrich up to N active entries that have no description yet.
        #[arg(long, value_name = "N", conflicts_with = "urls")]
        pending: Option<u32>,
    },
    /// Write active entries to CSV.
    Export {
        #[arg(long)]
        min_price: Option<u32>,
        #[arg(long)]
        max_price: Option<u32>,
        #[arg(long)]
        max_age_days: Option<u32>,
        #[arg(long, default_value = DEFAULT_EXPORT_FILE)]
        output: PathBuf,
    },
}

/// An explicit path must exist; only the implicit default may be absent.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => AppConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let catalog = open_catalog(&config).await?;

    match cli.command.unwrap_or(Commands::PollOnce) {
        Commands::Migrate => {
            let active = catalog.count_active().await?;
            println!(
                "catalog ready: database={} active={active}",
                config.database.display()
            );
        }
        Commands::Poll { enrich } => {
            let (tx, rx) = shutdown_channel();
            let signal = spawn_ctrl_c_handler(tx);

            let enrich_task = match enrich {
                Some(limit) if limit > 0 => {
                    let pass = build_enrichment(&config, catalog.clone())?;
                    let interval = config.poll_interval();
                    let rx = rx.clone();
                    Some(tokio::spawn(async move {
                        pass.run_pending_loop(limit, interval, rx).await
                    }))
                }
                _ => None,
            };

            let mut poller = build_poller(&config, catalog.clone()).await?;
            tracing::info!(
                feeds = config.feeds.len(),
                interval_minutes = config.poll_interval_minutes,
                "starting poll loop"
            );
            poller.run_loop(config.poll_interval(), rx).await?;

            if let Some(task) = enrich_task {
                task.await.context("enrichment task panicked")??;
            }
            signal.abort();
            println!("poll loop stopped");
        }
        Commands::PollOnce => {
            let (tx, rx) = shutdown_channel();
            let signal = spawn_ctrl_c_handler(tx);
            let mut poller = build_poller(&config, catalog.clone()).await?;
            let summary = poller.run_cycle(&rx).await?;
            signal.abort();
            println!(
                "cycle complete: cycle_id={} feeds={} failed={} merged={} skipped={} deactivated={} swept={} interrupted={}",
                summary.cycle_id,
                summary.feeds_polled,
                summary.feeds_failed,
                summary.entries_merged,
                summary.entries_skipped,
                summary.deactivated,
                summary.swept,
                summary.interrupted
            );
        }
        Commands::Enrich { urls, pending } => {
            if urls.is_empty() && pending.is_none() {
                bail!("enrich needs detail URLs or --pending N");
            }
            let (tx, rx) = shutdown_channel();
            let signal = spawn_ctrl_c_handler(tx);
            let pass = build_enrichment(&config, catalog.clone())?;
            let summary = match pending {
                Some(limit) => pass.run_pending(limit, &rx).await?,
                None => pass.run_urls(&urls, &rx).await?,
            };
            signal.abort();
            println!(
                "enrichment complete: targets={} enriched={} not_found={} failed={} skipped={}",
                summary.targets, summary.enriched, summary.not_found, summary.failed, summary.skipped
            );
        }
        Commands::Export {
            min_price,
            max_price,
            max_age_days,
            output,
        } => {
            let filter = ActiveFilter {
                min_price,
                max_price,
                max_age_days,
            };
            let rows =
                export_active(&catalog, &filter, Local::now().date_naive(), &output).await?;
            println!("exported {rows} ads to {}", output.display());
        }
    }

    catalog.close().await;
    Ok(())
}
