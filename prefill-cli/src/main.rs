//! Prefill CLI - voter bulk-file and early-voting site tooling.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use prefill_core::{Address, Feature};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;
mod exit_codes;
mod utils;

use config::Settings;
use exit_codes::{ExitCode, EXIT_CODES_HELP};

/// Output format for command results
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

/// CRM tag to record for a looked-up voter
#[derive(Debug, Clone, Copy, ValueEnum)]
enum TagArg {
    AbsenteeApplication,
    Registration,
    BallotStatus,
    EarlyVoting,
}

impl From<TagArg> for Feature {
    fn from(tag: TagArg) -> Self {
        match tag {
            TagArg::AbsenteeApplication => Feature::AbsenteeApplication,
            TagArg::Registration => Feature::Registration,
            TagArg::BallotStatus => Feature::BallotStatus,
            TagArg::EarlyVoting => Feature::EarlyVoting,
        }
    }
}

#[derive(Parser)]
#[command(name = "prefill")]
#[command(author, version, about = "Voter fingerprint and early-voting site tooling", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress human-readable output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the fingerprint registry from a bulk voter file
    Ingest {
        /// Path to the bulk voter file (CSV, no header required)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Upsert the registry into the PostgreSQL voter store (DATABASE_URL)
        #[arg(long)]
        load: bool,

        /// Output format for the ingest report
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Append a fingerprint column to a bulk voter file (stdout)
    Checksum {
        /// Path to the bulk voter file (stdin when omitted)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Check the fingerprint column of a post-processed bulk file
    VerifyChecksums {
        /// Path to the post-processed bulk file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Resolve a fingerprint to its voter record (JSON)
    Lookup {
        /// 8-character fingerprint from a mailer link
        #[arg(value_name = "FINGERPRINT")]
        fingerprint: String,

        /// Bulk voter file to search (DATABASE_URL voter store when omitted)
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Tag the voter in the CRM (CRM_API_URL, CRM_API_KEY)
        #[arg(long, value_enum)]
        tag: Option<TagArg>,
    },

    /// Find the nearest early-voting site for a residence (FACILITIES_FILE)
    Nearest {
        /// House number
        #[arg(long)]
        house: String,

        /// Street name
        #[arg(long)]
        street: String,

        /// Postal code
        #[arg(long)]
        zip: String,

        /// Restrict to these facilities (repeatable; all when omitted)
        #[arg(long = "candidate", value_name = "NAME")]
        candidates: Vec<String>,

        /// Output format for the chosen facility
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

/// Logs go to stderr so stdout stays data.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "prefill_core=debug,prefill=debug"
    } else {
        "prefill_core=info,prefill=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Ingest { file, load, format } => {
            commands::ingest::execute(file, load, format, &settings, quiet).await
        }
        Commands::Checksum { file } => commands::checksum::execute(file, quiet).await,
        Commands::VerifyChecksums { file } => {
            commands::checksum::execute_verify(file, quiet).await
        }
        Commands::Lookup {
            fingerprint,
            file,
            tag,
        } => {
            commands::lookup::execute(fingerprint, file, tag.map(Feature::from), &settings, quiet)
                .await
        }
        Commands::Nearest {
            house,
            street,
            zip,
            candidates,
            format,
        } => {
            let residence = Address::new(&house, &street, &zip);
            commands::nearest::execute(residence, candidates, format, &settings, quiet).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        let exit = ExitCode::from_anyhow(&err);
        eprintln!("{} {}", "error:".red().bold(), exit.message);
        std::process::exit(exit.code);
    }
}
