//! `powerdial` command-line runner
//!
//! Drives dialing sessions against the simulated telephony backend, with
//! queue and session records kept in SQLite.

mod commands;

use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "powerdial", version, about = "Outbound power dialer runner")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dial a contact list until the queue is exhausted
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// JSON file holding an array of contacts ({id, name, phone, phone2, phone3})
    #[arg(long)]
    pub contacts: PathBuf,

    /// Outbound caller-id numbers, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub numbers: Vec<String>,

    /// Simultaneous calls (defaults to the configured default)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// sqlx database URL, overriding the configuration
    #[arg(long)]
    pub database: Option<String>,

    /// Fraction of simulated calls that answer
    #[arg(long, default_value_t = 0.4)]
    pub answer_rate: f64,

    /// Seconds a simulated answered call lasts
    #[arg(long, default_value_t = 5)]
    pub talk_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = powerdial_core::logging::parse_log_level(&cli.log_level)?;
    let mut logging = powerdial_core::logging::LoggingConfig::new(level, "powerdial");
    if cli.json_logs {
        logging = logging.with_json();
    }
    powerdial_core::logging::setup_logging(logging)?;

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
    }
}
