#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the adaptive areal fetcher.
//!
//! Sweeps bicycle thefts from `data.police.uk` and bicycle parking from
//! the Overpass API over a set of boundary polygons, caching every raw
//! response under `data/cache/<profile>/`.
//!
//! Uses `indicatif-log-bridge` (via [`bike_risk_cli_utils::init_logger`])
//! so that log lines and the sweep progress bar share the terminal.

mod boundaries;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bike_risk_cli_utils::{IndicatifProgress, MultiProgress};
use bike_risk_fetch::cache::FileCache;
use bike_risk_fetch::fetcher::AdaptiveFetcher;
use bike_risk_fetch::paths;
use bike_risk_fetch::police::{fallback_months, resolve_periods};
use bike_risk_fetch::profile::{
    EndpointProfile, OSM_BICYCLE_PARKING, POLICE_BICYCLE_THEFT, load_profile, profile,
};
use bike_risk_fetch::sweep::{NamedRegion, sweep};
use bike_risk_fetch_models::TimePeriod;
use clap::{Args, Parser, Subcommand};

use crate::boundaries::{BoundaryProperties, load_boundaries};
use crate::report::{SweepReport, crime_cell, parking_cell, write_report};

#[derive(Parser)]
#[command(
    name = "bike_risk",
    about = "Fetch bicycle theft and parking statistics per area"
)]
struct Cli {
    /// Root of the response cache (default: `data/cache` in the workspace)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    /// Endpoint profile TOML to use instead of the bundled one
    #[arg(long, global = true)]
    profile: Option<PathBuf>,
    /// Number of cells fetched concurrently
    #[arg(long, global = true, default_value = "1")]
    jobs: usize,
    /// Write the JSON report here instead of stdout
    #[arg(long, global = true)]
    out: Option<PathBuf>,
    /// Resolve periods and boundaries but make no API calls
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BoundaryArgs {
    /// `GeoJSON` `FeatureCollection` of area boundaries (WGS84)
    #[arg(long)]
    boundaries: PathBuf,
    /// Feature property holding the area id
    #[arg(long, default_value = "id")]
    id_property: String,
    /// Feature property holding the area name
    #[arg(long, default_value = "name")]
    name_property: String,
}

impl BoundaryArgs {
    fn load(&self) -> Result<Vec<NamedRegion>, boundaries::BoundaryError> {
        load_boundaries(
            &self.boundaries,
            &BoundaryProperties {
                id: self.id_property.clone(),
                name: self.name_property.clone(),
            },
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the latest months with published Police data
    Months {
        /// Number of latest months to list
        #[arg(long, default_value = "12")]
        months: usize,
    },
    /// Bicycle thefts per area and month
    Crimes {
        #[command(flatten)]
        boundaries: BoundaryArgs,
        /// Number of latest available months to include
        #[arg(long, default_value = "12")]
        months: usize,
    },
    /// Bicycle parking facilities per area
    Parking {
        #[command(flatten)]
        boundaries: BoundaryArgs,
    },
}

/// Uses `--profile` when given, otherwise the bundled profile `default_id`.
fn select_profile(
    path: Option<&Path>,
    default_id: &str,
) -> Result<EndpointProfile, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(load_profile(path)?),
        None => profile(default_id).ok_or_else(|| format!("Unknown profile: {default_id}").into()),
    }
}

fn http_client(profile: &EndpointProfile) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(profile.transport.timeout())
        .user_agent(profile.transport.user_agent.clone())
        .build()
}

async fn periods_for(
    profile: &EndpointProfile,
    months: usize,
    dry_run: bool,
) -> Result<Vec<TimePeriod>, Box<dyn std::error::Error>> {
    let today = chrono::Local::now().date_naive();
    if dry_run && profile.periods.fixed.is_none() {
        return Ok(fallback_months(today, months));
    }
    Ok(resolve_periods(&http_client(profile)?, &profile.periods, months, today).await)
}

fn fetcher_for(
    cli: &Cli,
    profile: &EndpointProfile,
) -> Result<AdaptiveFetcher, Box<dyn std::error::Error>> {
    let cache_root = cli.cache_dir.clone().unwrap_or_else(paths::cache_dir);
    let cache = FileCache::new(paths::profile_cache_dir(&cache_root, &profile.id));
    log::info!("Caching responses under {}", cache.root().display());
    Ok(AdaptiveFetcher::from_profile(profile, Arc::new(cache))?)
}

fn print_plan(profile: &EndpointProfile, regions: &[NamedRegion], periods: &[TimePeriod]) {
    println!("Profile:  {} ({})", profile.name, profile.id);
    println!("Areas:    {}", regions.len());
    if let (Some(first), Some(last)) = (periods.first(), periods.last()) {
        println!("Periods:  {first} … {last} ({})", periods.len());
    }
    println!("Cells:    {}", regions.len() * periods.len());
    println!("Depth:    up to {}", profile.subdivision.max_depth);
}

async fn run_crimes(
    cli: &Cli,
    multi: &MultiProgress,
    boundaries: &BoundaryArgs,
    months: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = select_profile(cli.profile.as_deref(), POLICE_BICYCLE_THEFT)?;
    let regions = boundaries.load()?;
    let periods = periods_for(&profile, months, cli.dry_run).await?;

    if cli.dry_run {
        print_plan(&profile, &regions, &periods);
        return Ok(());
    }

    let fetcher = fetcher_for(cli, &profile)?;
    let progress = IndicatifProgress::cells_bar(multi, "Fetching bicycle thefts");
    let cells = sweep(&fetcher, &regions, &periods, cli.jobs, progress).await;

    let report = SweepReport::new(
        &profile.id,
        periods,
        cells.into_iter().map(crime_cell).collect(),
    );
    write_report(&report, cli.out.as_deref())
}

async fn run_parking(
    cli: &Cli,
    multi: &MultiProgress,
    boundaries: &BoundaryArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = select_profile(cli.profile.as_deref(), OSM_BICYCLE_PARKING)?;
    let regions = boundaries.load()?;
    let periods = periods_for(&profile, 1, cli.dry_run).await?;

    if cli.dry_run {
        print_plan(&profile, &regions, &periods);
        return Ok(());
    }

    let fetcher = fetcher_for(cli, &profile)?;
    let progress = IndicatifProgress::cells_bar(multi, "Fetching bicycle parking");
    let cells = sweep(&fetcher, &regions, &periods, cli.jobs, progress).await;

    // Cells come back region-major, so each region owns a run of
    // `periods.len()` consecutive cells.
    let per_region = periods.len().max(1);
    let reports = cells
        .into_iter()
        .enumerate()
        .map(|(i, cell)| parking_cell(cell, &regions[i / per_region].region))
        .collect();

    let report = SweepReport::new(&profile.id, periods, reports);
    write_report(&report, cli.out.as_deref())
}

async fn run_months(cli: &Cli, months: usize) -> Result<(), Box<dyn std::error::Error>> {
    let profile = select_profile(cli.profile.as_deref(), POLICE_BICYCLE_THEFT)?;
    let periods = periods_for(&profile, months, cli.dry_run).await?;
    for period in &periods {
        println!("{period}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = bike_risk_cli_utils::init_logger();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Months { months } => run_months(&cli, *months).await,
        Commands::Crimes { boundaries, months } => {
            run_crimes(&cli, &multi, boundaries, *months).await
        }
        Commands::Parking { boundaries } => run_parking(&cli, &multi, boundaries).await,
    }
}
