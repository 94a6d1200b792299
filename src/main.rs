mod api;
mod db;
mod extract;
mod models;
mod progress;
mod settings;
mod tables;
mod topology;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use api::ApiClient;
use settings::Settings;

#[derive(Parser)]
#[command(name = "er_crawler", about = "Election results crawler: area listings and precinct returns to CSV")]
struct Cli {
    /// Configuration file (default: ./er_crawler.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Directory for CSV tables and crawl state
    #[arg(short, long, global = true)]
    out_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl regions, provinces, cities and barangays
    Topology,
    /// Crawl precincts of every listed barangay
    Precincts,
    /// Fetch precinct returns, resuming after the last committed precinct
    Extract {
        /// Max precincts to process (default: all remaining)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Topology + precincts + extract in one go. The crawls are skipped when
    /// a precinct listing already exists, so a rerun resumes extraction.
    Run {
        /// Max precincts to extract
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Crawl topology and precincts again even if a listing exists
        #[arg(long)]
        recrawl: bool,
    },
    /// Show extraction progress
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.out_dir {
        settings.out_dir = dir;
    }
    std::fs::create_dir_all(&settings.out_dir)
        .with_context(|| format!("Failed to create {:?}", settings.out_dir))?;
    info!(base_url = %settings.base_url, out_dir = ?settings.out_dir, "Starting crawler");

    let result = match cli.command {
        Commands::Topology => run_topology(&settings),
        Commands::Precincts => run_precincts(&settings),
        Commands::Extract { limit } => run_extract(&settings, limit),
        Commands::Run { limit, recrawl } => run_listing(&settings, recrawl)
            .and_then(|_| run_extract(&settings, limit)),
        Commands::Stats => print_stats(&settings.out_dir),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn run_topology(settings: &Settings) -> anyhow::Result<()> {
    let api = ApiClient::from_settings(settings)?;
    let summary = topology::crawl_topology(&api, &settings.out_dir)?;
    for (level, count) in &summary.levels {
        println!("{:<10} {:>8}", level, count);
    }
    Ok(())
}

fn run_precincts(settings: &Settings) -> anyhow::Result<()> {
    let api = ApiClient::from_settings(settings)?;
    let n = topology::crawl_precincts_in(&api, &settings.out_dir, settings.progress)?;
    println!("Listed {} precincts", n);
    Ok(())
}

fn run_listing(settings: &Settings, recrawl: bool) -> anyhow::Result<()> {
    if !recrawl && topology::listing_ready(&settings.out_dir) {
        info!("Precinct listing present, skipping topology and precinct crawl");
        return Ok(());
    }
    run_topology(settings)?;
    run_precincts(settings)
}

fn run_extract(settings: &Settings, limit: Option<usize>) -> anyhow::Result<()> {
    let api = ApiClient::from_settings(settings)?;
    let conn = db::connect(&settings.out_dir)?;
    db::init_schema(&conn)?;
    let stats = extract::run(
        &api,
        &conn,
        &settings.out_dir,
        &settings.contests(),
        limit,
        settings.progress,
    )?;
    println!(
        "Done: {} processed ({} loaded, {} no data, {} malformed), {} already done, {} listed.",
        stats.processed, stats.loaded, stats.no_data, stats.malformed, stats.skipped, stats.listed
    );
    Ok(())
}

fn print_stats(out_dir: &Path) -> anyhow::Result<()> {
    let listing = out_dir.join(topology::PRECINCT_TABLE);
    let listed = tables::count_data_rows(&listing)?;
    let conn = db::connect(out_dir)?;
    db::init_schema(&conn)?;
    let s = db::get_stats(&conn)?;

    let next = s.next_index.unwrap_or(0);
    println!("Listed:     {}", listed);
    println!("Committed:  {}", next);
    println!("Remaining:  {}", listed.saturating_sub(next));
    println!("Loaded:     {}", s.loaded);
    println!("No data:    {}", s.no_data);
    println!("Malformed:  {}", s.malformed);
    println!("Candidates: {}", s.candidate_rows);
    if let Some(at) = s.updated_at {
        println!("Updated:    {}", at);
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
