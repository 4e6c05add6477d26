//! Bulk voter-file reading and checksum post-processing.

use std::io::{Read, Write};

use csv::{QuoteStyle, ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::columns::{ColumnFinder, DEFAULT_SCAN_ROWS};
use crate::error::Result;
use crate::fingerprint::{fingerprint, VoterId};

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input)
}

fn record_to_row(record: &StringRecord) -> Vec<String> {
    record.iter().map(|cell| cell.trim().to_string()).collect()
}

/// Read every row of a bulk file, with cell whitespace trimmed.
pub fn read_rows<R: Read>(input: R) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    for record in reader(input).records() {
        rows.push(record_to_row(&record?));
    }
    debug!(rows = rows.len(), "Read bulk file");
    Ok(rows)
}

/// Outcome of [`append_checksums`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChecksumSummary {
    pub voter_id_column: usize,
    pub rows_written: usize,
    /// 1-based row numbers whose voter ID could not be fingerprinted.
    pub rows_without_checksum: Vec<usize>,
}

/// Copy a bulk file, appending each row's fingerprint as a final column.
///
/// Rows whose voter ID does not parse get an empty checksum cell. Cells are
/// written back exactly as read.
pub fn append_checksums<R: Read, W: Write>(input: R, output: W) -> Result<ChecksumSummary> {
    let mut records = reader(input).into_records();

    // Buffer just enough rows to discover the voter-ID column
    let mut prefix: Vec<StringRecord> = Vec::new();
    for record in records.by_ref() {
        prefix.push(record?);
        if prefix.len() > DEFAULT_SCAN_ROWS {
            break;
        }
    }
    let trimmed: Vec<Vec<String>> = prefix.iter().map(record_to_row).collect();
    let column = ColumnFinder::voter_id().find(&trimmed)?;
    debug!(column, "Discovered voter ID column");

    let mut writer = WriterBuilder::new()
        .flexible(true)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(output);

    let mut summary = ChecksumSummary {
        voter_id_column: column,
        ..Default::default()
    };

    let mut write_row = |record: StringRecord, summary: &mut ChecksumSummary| -> Result<()> {
        summary.rows_written += 1;
        let checksum = match record.get(column).map(fingerprint) {
            Some(Ok(fp)) => fp.to_string(),
            _ => {
                summary.rows_without_checksum.push(summary.rows_written);
                String::new()
            }
        };
        let mut out = record;
        out.push_field(&checksum);
        writer.write_record(&out)?;
        Ok(())
    };

    for record in prefix {
        write_row(record, &mut summary)?;
    }
    for record in records {
        write_row(record?, &mut summary)?;
    }
    drop(write_row);
    writer.flush().map_err(csv::Error::from)?;

    if !summary.rows_without_checksum.is_empty() {
        warn!(
            rows = summary.rows_without_checksum.len(),
            "Rows without a parseable voter ID were written with an empty checksum"
        );
    }
    info!(rows = summary.rows_written, column, "Appended checksums");
    Ok(summary)
}

/// A row whose stored checksum disagrees with its voter ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumMismatch {
    /// 1-based row number.
    pub row: usize,
    pub voter_id: String,
    pub expected: String,
    pub found: String,
}

/// Recompute fingerprints of a post-processed file and report disagreements.
///
/// Rows without a parseable voter ID (such as the header) are not checked.
pub fn verify_checksums(rows: &[Vec<String>]) -> Result<Vec<ChecksumMismatch>> {
    let id_column = ColumnFinder::voter_id().find(rows)?;
    let checksum_column = ColumnFinder::checksum().find_excluding(rows, Some(id_column))?;
    debug!(id_column, checksum_column, "Discovered checksum columns");

    let mismatches = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let voter_id: VoterId = row.get(id_column)?.parse().ok()?;
            let expected = voter_id.fingerprint().to_string();
            let found = row.get(checksum_column).cloned().unwrap_or_default();
            (found != expected).then(|| ChecksumMismatch {
                row: i + 1,
                voter_id: voter_id.to_string(),
                expected,
                found,
            })
        })
        .collect();

    Ok(mismatches)
}
