//! Ingest command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use prefill_core::VoterRegistry;
use tracing::info;

use crate::config::Settings;
use crate::utils::read_bulk_file;
use crate::OutputFormat;

/// Execute the ingest command.
pub async fn execute(
    file: PathBuf,
    load: bool,
    format: OutputFormat,
    settings: &Settings,
    quiet: bool,
) -> Result<()> {
    let rows = read_bulk_file(&file)?;
    let (registry, report) = VoterRegistry::ingest(&rows)
        .with_context(|| format!("Ingestion of {} aborted", file.display()))?;

    info!(
        path = %file.display(),
        voters = registry.len(),
        "Ingested bulk file"
    );

    let loaded = if load {
        Some(load_into_database(&registry, settings).await?)
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let mut value =
                serde_json::to_value(&report).context("Failed to serialize ingest report")?;
            value["voters"] = registry.len().into();
            if let Some(loaded) = loaded {
                value["loaded"] = loaded.into();
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("Failed to serialize ingest report")?
            );
        }
        OutputFormat::Text if !quiet => {
            println!();
            println!("{}", "Voter file ingested".green().bold());
            println!();
            println!("   {} {}", "Voters:".dimmed(), registry.len());
            println!("   {} {}", "Voter ID column:".dimmed(), report.voter_id_column);
            println!("   {} {}", "Repeated rows:".dimmed(), report.reingested);
            println!("   {} {}", "Skipped rows:".dimmed(), report.skipped_rows.len());
            if report.truncated_ids > 0 {
                println!(
                    "   {} {}",
                    "Truncated IDs:".dimmed(),
                    report.truncated_ids.to_string().yellow()
                );
            }
            if let Some(loaded) = loaded {
                println!("   {} {}", "Loaded into database:".dimmed(), loaded);
            }
        }
        OutputFormat::Text => {}
    }

    Ok(())
}

#[cfg(feature = "postgres")]
async fn load_into_database(registry: &VoterRegistry, settings: &Settings) -> Result<u64> {
    use prefill_core::PostgresVoterStore;

    let url = settings
        .database_url
        .as_deref()
        .context("--load requires DATABASE_URL")?;
    let store = PostgresVoterStore::new(url, settings.database_max_connections)
        .await
        .context("Failed to connect to the voter database")?;
    let written = store
        .load(registry)
        .await
        .context("Failed to load voters into the database")?;
    Ok(written)
}

#[cfg(not(feature = "postgres"))]
async fn load_into_database(_registry: &VoterRegistry, _settings: &Settings) -> Result<u64> {
    anyhow::bail!("--load requires the postgres feature")
}
