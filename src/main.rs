use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use csv::Writer;
use ingest_core::{create_listing_table, Database, Importer, ListingFilter, RunId, SourceId};
use listing_ingest::api::{build_app, AppState};
use listing_ingest::{
    ConfigDescriptor, CrawlOutcome, IngestConfig, LogLevel, RunState, Supervisor,
};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    config: IngestConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the listing sites into the staging table
    #[command(long_about = "Crawl the listing sites page by page and stage every listing found. Ctrl-C stops the crawl after the page in flight.")]
    Crawl(CrawlCommand),

    /// Promote staged listings into canonical properties
    Import(ImportCommand),

    /// List staged listings
    List(ListCommand),

    /// Show staging statistics per source
    Status,

    /// Export staged listings to CSV
    Export(ExportCommand),

    /// Print the crawl capabilities as JSON
    Config,

    /// Serve the HTTP control plane
    Serve(ServeCommand),
}

#[derive(Parser)]
struct CrawlCommand {
    /// Pages per site (-p, --pages); defaults to the configured default
    #[arg(short = 'p', long)]
    pages: Option<u32>,

    /// Site to crawl (-s, --site). Can be repeated or comma separated; all sites when omitted.
    #[arg(short = 's', long = "site", value_delimiter = ',')]
    sites: Vec<SourceId>,

    /// Also print per-record log lines (-v, --verbose)
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Parser)]
struct ImportCommand {
    /// Rows per batch (-b, --batch-size)
    #[arg(short = 'b', long, default_value_t = 100)]
    batch_size: u32,

    /// Keep importing batches until nothing is left (-a, --all)
    #[arg(short = 'a', long)]
    all: bool,
}

#[derive(Parser)]
struct ListCommand {
    /// Source to filter by (-f, --source)
    #[arg(short = 'f', long)]
    source: Option<SourceId>,

    /// Only imported listings
    #[arg(long, conflicts_with = "pending")]
    imported: bool,

    /// Only listings awaiting import
    #[arg(long)]
    pending: bool,

    /// Page number, starting at 1 (-n, --page)
    #[arg(short = 'n', long, default_value_t = 1)]
    page: u32,

    /// Listings per page (-l, --limit)
    #[arg(short = 'l', long, default_value_t = 20)]
    limit: u32,
}

#[derive(Parser)]
struct ExportCommand {
    /// Output file path (-o, --output)
    #[arg(short = 'o', long, default_value = "listings.csv")]
    output: PathBuf,
}

#[derive(Parser)]
struct ServeCommand {
    /// Address to listen on (-b, --bind)
    #[arg(short = 'b', long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
}

#[derive(Tabled)]
struct SiteRow {
    #[tabled(rename = "Site")]
    site: String,
    #[tabled(rename = "Pages")]
    pages: u32,
    #[tabled(rename = "Staged")]
    staged: u32,
    #[tabled(rename = "New")]
    inserted: u32,
    #[tabled(rename = "Updated")]
    updated: u32,
    #[tabled(rename = "Errors")]
    errors: u32,
    #[tabled(rename = "Last error")]
    last_error: String,
}

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Total")]
    total: i64,
    #[tabled(rename = "Imported")]
    imported: i64,
    #[tabled(rename = "Pending")]
    pending: i64,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The crawl command prints the run log itself.
    let default_filter = match &cli.command {
        Commands::Crawl(_) => "info,listing_ingest::runlog=off",
        _ => "info",
    };
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    cli.config.validate()?;

    match cli.command {
        Commands::Config => {
            let descriptor = ConfigDescriptor::from(cli.config.limits());
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Commands::Crawl(cmd) => {
            let db = Database::new(&cli.config.database).await?;
            let supervisor = Supervisor::from_config(db, &cli.config)?;

            let mut crawl = supervisor.default_crawl();
            if let Some(pages) = cmd.pages {
                crawl.page_limit = pages;
            }
            if !cmd.sites.is_empty() {
                crawl.sites = cmd.sites;
            }

            let id = supervisor.start(crawl)?;
            let state = follow_run(&supervisor, id, cmd.verbose).await?;
            let status = supervisor
                .status(Some(id))
                .context("run disappeared from history")?;

            if let Some(outcome) = &status.outcome {
                println!("{}", outcome_table(outcome));
            }
            match state {
                RunState::Completed => println!("Run {} {}", id, "completed".green()),
                RunState::Cancelled => println!("Run {} {}", id, "cancelled".yellow()),
                _ => bail!(
                    "run {} failed: {}",
                    id,
                    status.error.unwrap_or_else(|| "unknown error".to_string())
                ),
            }
        }
        Commands::Import(cmd) => {
            let db = Database::new(&cli.config.database).await?;
            let importer = Importer::new(db);
            let report = if cmd.all {
                importer.import_all(cmd.batch_size).await?
            } else {
                importer.import_batch(cmd.batch_size).await?
            };

            println!(
                "Imported {} listings, skipped {}",
                report.imported.to_string().green(),
                report.skipped.to_string().yellow()
            );
            for error in &report.errors {
                println!(
                    "  #{} {} {}: {}",
                    error.listing_id,
                    error.source,
                    error.source_url,
                    error.reason.red()
                );
            }
        }
        Commands::List(cmd) => {
            let db = Database::new(&cli.config.database).await?;
            let imported = match (cmd.imported, cmd.pending) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let filter = ListingFilter {
                source: cmd.source,
                imported,
                page: cmd.page,
                limit: cmd.limit,
            };
            let page = db.list_listings(&filter).await?;

            println!("{}", create_listing_table(&page.rows));
            let pages = (page.total + i64::from(page.limit) - 1) / i64::from(page.limit);
            println!(
                "Page {} of {} ({} listings)",
                page.page,
                pages.max(1),
                page.total
            );
        }
        Commands::Status => {
            let db = Database::new(&cli.config.database).await?;
            let stats = db.listing_stats().await?;
            let rows: Vec<SourceRow> = stats
                .per_source
                .iter()
                .map(|source| SourceRow {
                    source: source.source.to_string(),
                    total: source.total,
                    imported: source.imported,
                    pending: source.pending,
                    last_seen: source
                        .last_seen_at
                        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();

            let mut table = Table::new(&rows);
            table.with(Style::modern());
            println!("{}", table);
            println!(
                "Total {} staged, {} imported, {} pending",
                stats.total, stats.imported, stats.pending
            );
        }
        Commands::Export(cmd) => {
            let db = Database::new(&cli.config.database).await?;
            let listings = db.all_listings().await?;

            let mut writer = Writer::from_path(&cmd.output)?;
            writer.write_record([
                "ID",
                "Source",
                "URL",
                "Title",
                "Price",
                "Price (KES)",
                "Location",
                "Bedrooms",
                "Bathrooms",
                "Imported",
                "Import error",
                "First seen",
                "Last seen",
            ])?;
            for listing in &listings {
                writer.write_record([
                    listing.id.to_string(),
                    listing.source.to_string(),
                    listing.source_url.clone(),
                    listing.title.clone().unwrap_or_default(),
                    listing.price_text.clone().unwrap_or_default(),
                    listing
                        .price_amount
                        .map(|amount| format!("{:.0}", amount))
                        .unwrap_or_default(),
                    listing.location_text.clone().unwrap_or_default(),
                    listing.bedrooms.map(|n| n.to_string()).unwrap_or_default(),
                    listing.bathrooms.map(|n| n.to_string()).unwrap_or_default(),
                    listing.imported.to_string(),
                    listing.import_error.clone().unwrap_or_default(),
                    listing.created_at.to_rfc3339(),
                    listing.updated_at.to_rfc3339(),
                ])?;
            }
            writer.flush()?;
            info!("Exported {} listings to {}", listings.len(), cmd.output.display());
        }
        Commands::Serve(cmd) => {
            let db = Database::new(&cli.config.database).await?;
            let supervisor = Supervisor::from_config(db, &cli.config)?;
            let app = build_app(AppState::new(supervisor.clone()));

            let listener = tokio::net::TcpListener::bind(cmd.bind).await?;
            info!("Control plane listening on {}", cmd.bind);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(supervisor))
                .await?;
        }
    }

    Ok(())
}

/// Print the run log as it grows until the run ends. The first Ctrl-C asks
/// the run to stop after its current page.
async fn follow_run(supervisor: &Supervisor, id: RunId, verbose: bool) -> anyhow::Result<RunState> {
    let mut offset = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let finished = supervisor.wait(id);
    tokio::pin!(finished);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;

    let state = loop {
        tokio::select! {
            state = &mut finished => break state?,
            _ = ticker.tick() => {
                offset = print_log_lines(supervisor, id, offset, verbose)?;
            }
            signal = &mut ctrl_c, if !cancel_sent => {
                signal?;
                cancel_sent = true;
                eprintln!("{}", "Cancelling after the current page...".yellow());
                supervisor.cancel(Some(id))?;
            }
        }
    };

    print_log_lines(supervisor, id, offset, verbose)?;
    Ok(state)
}

fn print_log_lines(
    supervisor: &Supervisor,
    id: RunId,
    offset: usize,
    verbose: bool,
) -> anyhow::Result<usize> {
    let lines = supervisor.logs_since(id, offset)?;
    let next = lines.last().map(|line| line.seq + 1).unwrap_or(offset);
    for line in lines {
        let level = match line.level {
            LogLevel::Debug if !verbose => continue,
            LogLevel::Debug => "DEBUG".dimmed(),
            LogLevel::Info => " INFO".green(),
            LogLevel::Warn => " WARN".yellow(),
            LogLevel::Error => "ERROR".red(),
        };
        eprintln!("{} {} {}", line.timestamp.format("%H:%M:%S%.3f"), level, line.message);
    }
    Ok(next)
}

fn outcome_table(outcome: &CrawlOutcome) -> String {
    let rows: Vec<SiteRow> = outcome
        .sites
        .iter()
        .map(|(site, result)| SiteRow {
            site: site.to_string(),
            pages: result.pages_fetched,
            staged: result.records_staged,
            inserted: result.records_inserted,
            updated: result.records_updated,
            errors: result.errors,
            last_error: result.last_error.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.to_string()
}

async fn shutdown_signal(supervisor: Supervisor) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    if supervisor.cancel(None).is_ok() {
        info!("Cancelled the active crawl");
    }
    info!("Received shutdown signal, starting graceful shutdown");
}
