mod error;
mod fetch;
mod geocode;
mod merge;
mod model;
mod net;
mod parser;
mod sentiment;
mod series;
mod settings;
mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;

use geocode::{CoordCache, Nominatim};
use model::ListingKind;
use net::{HttpClient, PageSource};
use parser::{PlaceListings, SeenIds};
use settings::Settings;

#[derive(Parser)]
#[command(name = "wishmap", about = "Maps and charts the Ježíškova vnoučata wish list")]
struct Cli {
    /// Optional TOML settings file (WISHMAP_* environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the wish list, geocode places and write a snapshot
    Fetch {
        /// Path to the JSON output
        output: PathBuf,
        /// Cache file for place coordinates
        #[arg(short, long, default_value = "place_cache.json")]
        cache: PathBuf,
        /// Directory for timestamped snapshot copies
        #[arg(short, long, default_value = "backup")]
        backup_dir: PathBuf,
        /// Do not write a backup copy
        #[arg(long)]
        no_backup: bool,
        /// Listing kinds to fetch
        #[arg(short, long = "kind", value_enum, default_values_t = [ListingKind::Gift])]
        kinds: Vec<ListingKind>,
    },
    /// Aggregate the snapshot history into chart series
    Stats {
        /// Path to the JSON output
        #[arg(default_value = "stats.json")]
        output: PathBuf,
        /// Directory holding the snapshot history
        #[arg(short, long, default_value = "backup")]
        backup_dir: PathBuf,
        /// Fold the history into one compressed bundle afterwards
        #[arg(short, long)]
        compress: bool,
    },
    /// Group the location comment sheet by region code
    Sentiment {
        /// Path to the JSON output
        output: PathBuf,
        /// CSV export URL (defaults to the configured sentiment_url)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Fetch {
            output,
            cache,
            backup_dir,
            no_backup,
            kinds,
        } => {
            let backup = (!no_backup).then_some(backup_dir.as_path());
            run_fetch(&settings, &output, &cache, backup, &kinds).await
        }
        Commands::Stats {
            output,
            backup_dir,
            compress,
        } => run_stats(&output, &backup_dir, compress),
        Commands::Sentiment { output, url } => {
            let url = url
                .or_else(|| settings.sentiment_url.clone())
                .context("No sentiment feed URL given (use --url or WISHMAP_SENTIMENT_URL)")?;
            run_sentiment(&settings, &url, &output).await
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

async fn run_fetch(
    settings: &Settings,
    output: &Path,
    cache_path: &Path,
    backup_dir: Option<&Path>,
    kinds: &[ListingKind],
) -> anyhow::Result<()> {
    let http: Arc<dyn PageSource> = Arc::new(
        HttpClient::new(&settings.user_agent, settings.max_attempts)?.with_retry_pause(settings.retry_pause()),
    );
    let mut cache = CoordCache::load(cache_path);
    info!("Place cache holds {} entries", cache.len());

    let stats = fetch::fetch_main_stats(http.as_ref(), settings).await;

    // Phase 1: listings, strictly page after page
    let mut listings = PlaceListings::new();
    let mut seen = SeenIds::new();
    for &kind in kinds {
        let summary = fetch::fetch_kind(http.as_ref(), settings, kind, &mut seen, &mut listings).await;
        println!(
            "{}: {} wishes from {} pages{}",
            summary.kind,
            summary.listings,
            summary.pages,
            if summary.complete { "" } else { " (incomplete)" }
        );
    }
    let total: usize = listings.values().map(Vec::len).sum();
    println!("{} wishes in {} places", total, listings.len());

    // Phase 2: geocode places the cache does not know yet
    let missing = cache.missing(listings.keys());
    if !missing.is_empty() {
        println!("Geocoding {} new places...", missing.len());
        let geocoder = Arc::new(Nominatim::new(Arc::clone(&http), settings.clone()));
        let resolved = geocode::resolve_all(
            geocoder,
            missing,
            &settings.geocode_country,
            settings.geocode_concurrency,
        )
        .await;
        cache.extend(resolved);
    }

    let now = Local::now();
    let snap = snapshot::build(now.timestamp(), stats, listings, &cache);
    let written = write_fetch_outputs(output, backup_dir, &snap, now);

    cache.save()?;
    written?;
    println!("Wrote {} places to {:?}", snap.places.len(), output);
    Ok(())
}

fn write_fetch_outputs(
    output: &Path,
    backup_dir: Option<&Path>,
    snap: &model::Snapshot,
    now: chrono::DateTime<Local>,
) -> anyhow::Result<()> {
    snapshot::write_json(output, snap)?;
    if let Some(dir) = backup_dir {
        let path = snapshot::write_backup(dir, snap, now)?;
        info!("Backup written to {:?}", path);
    }
    Ok(())
}

fn run_stats(output: &Path, backup_dir: &Path, compress: bool) -> anyhow::Result<()> {
    let history = snapshot::load_history(backup_dir)?;
    let merged = merge::merge(history.snapshots);

    let distinct: usize = merge::merge_places(&merged).values().map(Vec::len).sum();
    println!(
        "{} snapshots from {} files, {} distinct wishes seen",
        merged.len(),
        history.files.len(),
        distinct
    );

    let now = Local::now();
    let doc = series::aggregate(&merged, &Local, now.timestamp());
    snapshot::write_json(output, &doc)?;
    println!("Wrote {:?} ({} money points)", output, doc.money.len());

    if compress && history.files.len() > 1 {
        let bundle = snapshot::compact(backup_dir, &merged, &history.files, now)?;
        println!("Compacted history into {:?}", bundle);
    }
    Ok(())
}

async fn run_sentiment(settings: &Settings, url: &str, output: &Path) -> anyhow::Result<()> {
    let http = HttpClient::new(&settings.user_agent, settings.max_attempts)?.with_retry_pause(settings.retry_pause());
    let csv = http.get_text(url, &[], settings.page_timeout()).await?;
    let grouped = sentiment::group_comments(&csv)?;
    snapshot::write_json(output, &grouped)?;
    println!("Wrote comments for {} regions to {:?}", grouped.len(), output);
    Ok(())
}
