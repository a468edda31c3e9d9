use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use engblogs::aggregate;
use engblogs::config::Config;
use engblogs::crawl::{repair_directory, CrawlConfig, RepairConfig, Scheduler};
use engblogs::feed::{export_opml, opml, DirectoryLocation, Fetcher, HttpFetcher};
use engblogs::storage::{MemoryStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(
    name = "engblogs",
    version,
    about = "Crawls engineering blogs into a weekly listing"
)]
struct Cli {
    /// Path to the TOML config file (optional)
    #[arg(short, long, default_value = "engblogs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every feed in the directory and store recent entries
    Crawl {
        /// OPML file path or URL
        #[arg(long)]
        directory: Option<String>,
        /// SQLite database file
        #[arg(long)]
        database: Option<String>,
        /// Feeds crawled at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Keep entries in memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Write the current listing as JSON
    Build {
        #[arg(long)]
        database: Option<String>,
        /// Directory the listing is written into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Drop feeds that no longer load and print the cleaned directory
    Repair {
        #[arg(long)]
        directory: Option<String>,
        /// Write the OPML here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for summaries and OPML.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("engblogs=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Command::Crawl {
            directory,
            database,
            concurrency,
            dry_run,
        } => {
            let mut config = config;
            if let Some(directory) = directory {
                config.directory = directory;
            }
            if let Some(database) = database {
                config.database_path = database;
            }
            if let Some(concurrency) = concurrency {
                config.concurrency_cap = concurrency;
            }
            config.validate()?;
            run_crawl(&config, dry_run).await
        }
        Command::Build { database, output } => {
            let database = database.unwrap_or_else(|| config.database_path.clone());
            let output = output.unwrap_or_else(|| PathBuf::from(&config.output_dir));
            run_build(&database, &output).await
        }
        Command::Repair { directory, output } => {
            let mut config = config;
            if let Some(directory) = directory {
                config.directory = directory;
            }
            config.validate()?;
            run_repair(&config, output).await
        }
    }
}

fn http_fetcher(config: &Config) -> Result<Arc<HttpFetcher>> {
    let fetcher = HttpFetcher::new(&config.fetch_settings()).context("Failed to build HTTP client")?;
    Ok(Arc::new(fetcher))
}

async fn run_crawl(config: &Config, dry_run: bool) -> Result<()> {
    let fetcher = http_fetcher(config)?;
    let location = DirectoryLocation::parse(&config.directory);
    let sources = opml::load(&location, fetcher.as_ref()).await?;

    let mut crawl_config = if dry_run {
        tracing::info!("Dry run, entries are kept in memory only");
        CrawlConfig::new(Arc::new(MemoryStore::new()), fetcher as Arc<dyn Fetcher>)
    } else {
        let store = SqliteStore::open(&config.database_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database_path))?;
        let store = Arc::new(store);
        CrawlConfig::new(store.clone(), fetcher as Arc<dyn Fetcher>).with_validator_cache(store)
    };
    crawl_config = crawl_config
        .with_concurrency_cap(config.concurrency_cap)
        .with_recency_window(config.crawl_window()?)
        .with_serialized_writes(config.serialize_writes);

    let summary = Scheduler::new(crawl_config).run(sources).await;

    // Individual feed failures never fail the run.
    println!(
        "{}",
        serde_json::to_string(&summary).context("Failed to serialize crawl summary")?
    );
    Ok(())
}

async fn run_build(database: &str, output: &std::path::Path) -> Result<()> {
    let store = SqliteStore::open(database)
        .await
        .with_context(|| format!("Failed to open database at {database}"))?;

    let report = aggregate::build(&store, output).await?;
    println!(
        "Wrote {} of {} entries to {}",
        report.published,
        report.scanned,
        report.listing_path.display()
    );
    Ok(())
}

async fn run_repair(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let fetcher = http_fetcher(config)?;
    let location = DirectoryLocation::parse(&config.directory);
    let sources = opml::load(&location, fetcher.as_ref()).await?;

    let mut repair_config = RepairConfig::new(fetcher as Arc<dyn Fetcher>);
    repair_config.concurrency_cap = config.repair_concurrency_cap;
    repair_config.recency_window = config.repair_window()?;

    let report = repair_directory(&repair_config, sources).await;
    for dead in &report.dead {
        tracing::info!(feed = %dead.title, url = %dead.fetch_url, "Dropping feed from directory");
    }

    let document = export_opml(&report.live)?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, document)
                .await
                .with_context(|| format!("Failed to write OPML to {}", path.display()))?;
            eprintln!(
                "Kept {} feeds, dropped {} ({})",
                report.live.len(),
                report.dead.len(),
                path.display()
            );
        }
        None => print!("{document}"),
    }
    Ok(())
}
