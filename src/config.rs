use clap::Parser;

/// Link-Quality Cache Demo Configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// How long samples are retained, in seconds.
    #[arg(long, default_value_t = 600)]
    pub max_age_secs: u64,

    /// Background sweep interval in seconds.
    #[arg(long, default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Status logging interval in seconds, -1 to disable.
    #[arg(long, default_value_t = 15)]
    pub status_interval: i32,

    /// Directory for a periodically rewritten stats.json. Empty = no file writes.
    #[arg(long, default_value = "")]
    pub work_dir: String,

    /// Write a snapshot of the cache to this file on shutdown.
    #[arg(long, value_name = "FILE")]
    pub save_on_exit: Option<String>,

    /// Load a snapshot file, print a summary, and exit.
    #[arg(long, value_name = "FILE")]
    pub inspect: Option<String>,

    /// Synthetic feed period in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub feed_period_ms: u64,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}
