//! Nearest command implementation.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use prefill_core::{
    Address, Facility, GeocodeCache, GeocodeStore, GoogleDistanceMatrix, GoogleGeocoder,
    MemoryStore, NearestSiteResolver, SiteDecisionStore, StaticFacilityIndex,
};
use tracing::{info, warn};

use crate::config::Settings;
use crate::utils::load_facilities;
use crate::OutputFormat;

/// Execute the nearest command.
///
/// A failed resolution prints the fallback URL and still succeeds.
pub async fn execute(
    residence: Address,
    candidates: Vec<String>,
    format: OutputFormat,
    settings: &Settings,
    quiet: bool,
) -> Result<()> {
    let path = settings
        .facilities_file
        .as_deref()
        .context("FACILITIES_FILE is not set")?;
    let facilities = load_facilities(path)?;
    let chosen = select_candidates(&facilities, &candidates)?;

    let (geocode_store, decision_store) = open_stores(settings).await?;
    let geocoder = GoogleGeocoder::new().context("Failed to create geocoding client")?;
    let matrix = GoogleDistanceMatrix::new().context("Failed to create distance matrix client")?;

    let resolver = NearestSiteResolver::new(
        GeocodeCache::new(Arc::new(geocoder), geocode_store),
        Arc::new(StaticFacilityIndex::new(facilities)),
        Arc::new(matrix),
        decision_store,
    );

    match resolver.nearest(&residence, &chosen).await {
        Ok(facility) => {
            info!(facility = %facility.name, "Nearest site resolved");
            print_facility(&facility, format, quiet)?;
        }
        Err(e) => {
            warn!(error = %e, fallback = %settings.site_fallback_url, "Using fallback site URL");
            if !quiet {
                eprintln!(
                    "{} {}",
                    "Could not resolve a site, falling back:".yellow(),
                    e
                );
            }
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({ "fallback_url": settings.site_fallback_url })
                ),
                OutputFormat::Text => println!("{}", settings.site_fallback_url),
            }
        }
    }
    Ok(())
}

/// Candidates named on the command line, or every facility when none are.
fn select_candidates(facilities: &[Facility], names: &[String]) -> Result<Vec<Facility>> {
    if names.is_empty() {
        return Ok(facilities.to_vec());
    }
    names
        .iter()
        .map(|name| match facilities.iter().find(|f| &f.name == name) {
            Some(facility) => Ok(facility.clone()),
            None => bail!("Unknown facility: {name}"),
        })
        .collect()
}

fn print_facility(facility: &Facility, format: OutputFormat, quiet: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(facility).context("Failed to serialize facility")?
        ),
        OutputFormat::Text if quiet => println!("{}", facility.name),
        OutputFormat::Text => {
            println!("{}", facility.name.green().bold());
            println!("   {} {}", "Address:".dimmed(), facility.address);
        }
    }
    Ok(())
}

type Stores = (Arc<dyn GeocodeStore>, Arc<dyn SiteDecisionStore>);

#[cfg(feature = "postgres")]
async fn open_stores(settings: &Settings) -> Result<Stores> {
    if let Some(url) = settings.database_url.as_deref() {
        let store = Arc::new(
            prefill_core::PostgresStore::new(url, settings.database_max_connections)
                .await
                .context("Failed to connect to the cache database")?,
        );
        let geocodes: Arc<dyn GeocodeStore> = store.clone();
        let decisions: Arc<dyn SiteDecisionStore> = store;
        return Ok((geocodes, decisions));
    }
    Ok(memory_stores())
}

#[cfg(not(feature = "postgres"))]
async fn open_stores(settings: &Settings) -> Result<Stores> {
    if settings.database_url.is_some() {
        warn!("DATABASE_URL ignored without the postgres feature");
    }
    Ok(memory_stores())
}

fn memory_stores() -> Stores {
    let store = Arc::new(MemoryStore::new());
    let geocodes: Arc<dyn GeocodeStore> = store.clone();
    let decisions: Arc<dyn SiteDecisionStore> = store;
    (geocodes, decisions)
}
