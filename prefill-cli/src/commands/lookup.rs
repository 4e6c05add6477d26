//! Lookup command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use prefill_core::{lookup, CrmClient, CrmConfig, Feature, VoterDirectory, VoterRegistry};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::utils::read_bulk_file;

/// Execute the lookup command.
///
/// "Not found" is a normal outcome and exits successfully.
pub async fn execute(
    token: String,
    file: Option<PathBuf>,
    tag: Option<Feature>,
    settings: &Settings,
    quiet: bool,
) -> Result<()> {
    let directory = open_directory(file, settings).await?;

    let Some(record) = lookup(directory.as_ref(), &token)
        .await
        .context("Failed to look up fingerprint")?
    else {
        info!("Fingerprint not found");
        if !quiet {
            eprintln!("{}", "not found".yellow());
        }
        return Ok(());
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("Failed to serialize voter record")?
    );

    if let Some(feature) = tag {
        match CrmClient::from_config(CrmConfig::default()).context("Invalid CRM configuration")? {
            Some(crm) => {
                let crm = Arc::new(crm);
                // Detached, but the process must not exit before it finishes
                let handle = crm.notify_detached(record.voter_id.as_str(), feature);
                wait_for_tag(handle).await;
            }
            None => debug!("CRM not configured, skipping tag"),
        }
    }

    Ok(())
}

/// Returns false when the tagging task did not run to completion.
async fn wait_for_tag(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "CRM tagging task failed");
            false
        }
    }
}

async fn open_directory(
    file: Option<PathBuf>,
    settings: &Settings,
) -> Result<Box<dyn VoterDirectory>> {
    if let Some(file) = file {
        let rows = read_bulk_file(&file)?;
        let (registry, _) = VoterRegistry::ingest(&rows)
            .with_context(|| format!("Ingestion of {} aborted", file.display()))?;
        return Ok(Box::new(registry));
    }
    open_database(settings).await
}

#[cfg(feature = "postgres")]
async fn open_database(settings: &Settings) -> Result<Box<dyn VoterDirectory>> {
    let url = settings
        .database_url
        .as_deref()
        .context("Either --file or DATABASE_URL is required")?;
    let store = prefill_core::PostgresVoterStore::new(url, settings.database_max_connections)
        .await
        .context("Failed to connect to the voter database")?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_database(_settings: &Settings) -> Result<Box<dyn VoterDirectory>> {
    anyhow::bail!("--file is required without the postgres feature")
}
