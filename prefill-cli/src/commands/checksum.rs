//! Checksum commands: append a fingerprint column, and verify one.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use prefill_core::{append_checksums, verify_checksums};
use tracing::{info, warn};

use crate::utils::{open_input, read_bulk_file};

/// Execute the checksum command: CSV out on stdout, summary on stderr.
pub async fn execute(file: Option<PathBuf>, quiet: bool) -> Result<()> {
    let input = open_input(file.as_deref())?;
    let stdout = io::stdout();
    let mut output = stdout.lock();

    let summary = append_checksums(input, &mut output).context("Failed to append checksums")?;
    output.flush().context("Failed to write output")?;

    info!(rows = summary.rows_written, "Checksums appended");
    if !quiet {
        eprintln!(
            "{} {} rows, voter ID column {}",
            "Checksums appended:".green(),
            summary.rows_written,
            summary.voter_id_column
        );
        if !summary.rows_without_checksum.is_empty() {
            eprintln!(
                "{} {} rows had no parseable voter ID",
                "Warning:".yellow(),
                summary.rows_without_checksum.len()
            );
        }
    }
    Ok(())
}

/// Execute the verify-checksums command.
pub async fn execute_verify(file: PathBuf, quiet: bool) -> Result<()> {
    let rows = read_bulk_file(&file)?;
    let mismatches = verify_checksums(&rows)
        .with_context(|| format!("Failed to read checksums from {}", file.display()))?;

    if mismatches.is_empty() {
        info!(path = %file.display(), rows = rows.len(), "Checksums verified");
        if !quiet {
            println!("{} {} rows", "Checksums valid:".green().bold(), rows.len());
        }
        return Ok(());
    }

    for mismatch in &mismatches {
        warn!(
            row = mismatch.row,
            voter_id = %mismatch.voter_id,
            expected = %mismatch.expected,
            found = %mismatch.found,
            "Checksum mismatch"
        );
        if !quiet {
            println!(
                "   {} row {}: {} expected {} found {}",
                "MISMATCH".red(),
                mismatch.row,
                mismatch.voter_id,
                mismatch.expected,
                if mismatch.found.is_empty() {
                    "(empty)"
                } else {
                    &mismatch.found
                }
            );
        }
    }
    bail!(
        "Checksum verification failed: {} rows disagree",
        mismatches.len()
    )
}
