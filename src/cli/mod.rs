//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use chrono::NaiveDate;
use clap::{command, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    appeears::{self, OutputFormat},
    cds,
    geo::BoundingBox,
    period::{YearMonth, DEFAULT_MAX_DAYS},
    poll,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the commands
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get MODIS land products through AppEEARS area tasks
    Appeears(AppeearsArgs),
    /// Get ERA5-Land hourly reanalysis from the Climate Data Store
    Cds(CdsArgs),
}

/// Region, output and credentials shared by every command.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Bounding box as `lat_min,lat_max,lon_min,lon_max`
    #[arg(long, allow_hyphen_values = true, conflicts_with = "zone")]
    pub bbox: Option<BoundingBox>,

    /// Zone name looked up in the zones file
    #[arg(long, required_unless_present = "bbox")]
    pub zone: Option<String>,

    /// Zones file
    #[arg(long, default_value = "zones.yaml")]
    pub zones: PathBuf,

    /// Output root directory [default: ~/Data]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Credentials file
    #[arg(short, long, default_value = "config.yml")]
    pub config: PathBuf,

    /// Seconds between job status checks
    #[arg(long, default_value_t = poll::DEFAULT_INTERVAL.as_secs())]
    pub poll_interval: u64,

    /// Status checks before a job is declared stalled
    #[arg(long, default_value_t = poll::DEFAULT_MAX_ATTEMPTS)]
    pub poll_attempts: u32,

    /// Hours before a job is declared stalled
    #[arg(long, default_value_t = 24)]
    pub poll_timeout_hours: u64,
}

impl CommonArgs {
    pub fn poll_policy(&self) -> poll::PollPolicy {
        poll::PollPolicy {
            interval: Duration::from_secs(self.poll_interval),
            max_attempts: self.poll_attempts,
            timeout: Duration::from_secs(self.poll_timeout_hours * 60 * 60),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AppeearsArgs {
    /// Product identifier, e.g. MOD11A1.061
    #[arg(short, long)]
    pub product: String,

    /// Layers of the product to request
    #[arg(short, long = "layer", required = true)]
    pub layers: Vec<String>,

    /// First day (YYYY-MM-DD)
    #[arg(long)]
    pub start: NaiveDate,

    /// Last day, included (YYYY-MM-DD)
    #[arg(long)]
    pub end: NaiveDate,

    /// Maximum number of days per remote task
    #[arg(long, default_value_t = DEFAULT_MAX_DAYS)]
    pub max_days: u32,

    #[arg(long, value_enum, default_value_t = OutputFormat::Geotiff)]
    pub format: OutputFormat,

    /// Tasks polled and fetched concurrently
    #[arg(short, long, default_value_t = 1)]
    pub workers: usize,

    /// Do not download QC and metadata files
    #[arg(long)]
    pub skip_aux: bool,

    /// Always submit new tasks, even if one with the same name exists
    #[arg(long)]
    pub no_reuse: bool,

    #[arg(long, default_value = appeears::DEFAULT_API_URL)]
    pub api_url: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CdsArgs {
    /// Dataset names (ERA5-land)
    #[arg(short, long = "dataset", default_value = "ERA5-land")]
    pub datasets: Vec<String>,

    /// Variables, e.g. total_precipitation
    #[arg(short, long = "variable", required = true)]
    pub variables: Vec<String>,

    /// First month (YYYYMM)
    #[arg(long)]
    pub start: YearMonth,

    /// Last month, included (YYYYMM)
    #[arg(long)]
    pub end: YearMonth,

    /// Months retrieved concurrently
    #[arg(short, long, default_value_t = cds::DEFAULT_WORKERS)]
    pub workers: usize,

    /// Download again months already on disk
    #[arg(long)]
    pub overwrite: bool,

    #[arg(long, default_value = cds::DEFAULT_API_URL)]
    pub api_url: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    let style = ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .map(|s| s.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    ProgressBar::new(size).with_message(message).with_style(style)
}

// -- Tests -------------------------------------------------------------------
