//! Common utility functions shared across CLI commands.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use prefill_core::{read_rows, Facility};
use tracing::debug;

/// Open `path`, or stdin when no path is given.
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(io::stdin().lock())),
    }
}

/// Read every row of a bulk voter file.
pub fn read_bulk_file(path: &Path) -> Result<Vec<Vec<String>>> {
    let rows = read_rows(open_input(Some(path))?)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    debug!(path = %path.display(), rows = rows.len(), "Read bulk file");
    Ok(rows)
}

/// Load the facility list.
pub fn load_facilities(path: &Path) -> Result<Vec<Facility>> {
    let facilities = Facility::load_all(open_input(Some(path))?)
        .with_context(|| format!("Failed to read facilities file: {}", path.display()))?;
    debug!(path = %path.display(), count = facilities.len(), "Loaded facilities");
    Ok(facilities)
}
