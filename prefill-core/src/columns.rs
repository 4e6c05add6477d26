//! Column discovery for bulk files whose layout drifts between deliveries.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{PrefillError, Result};

lazy_static! {
    static ref VOTER_ID: Regex = Regex::new(r"^[A-Za-z]{2}[0-9]+$").unwrap(/* known good */);
    static ref CHECKSUM: Regex = Regex::new(r"^[0-9a-f]{8}$").unwrap(/* known good */);
}

/// Rows examined after skipping the first (possibly header) row.
pub const DEFAULT_SCAN_ROWS: usize = 8;

/// Finds the column whose cells match a pattern.
///
/// The first row is skipped since it may be a header. The next `scan_rows`
/// rows are examined in order and the first row containing a match decides
/// the column (leftmost matching cell, or rightmost for appended columns).
/// No match anywhere is an error; there is no default column.
#[derive(Debug, Clone)]
pub struct ColumnFinder {
    pattern: Regex,
    scan_rows: usize,
    rightmost: bool,
}

impl ColumnFinder {
    pub fn new(pattern: Regex, scan_rows: usize) -> Self {
        Self {
            pattern,
            scan_rows,
            rightmost: false,
        }
    }

    /// Cells shaped like `NY000012345`.
    pub fn voter_id() -> Self {
        Self::new(VOTER_ID.clone(), DEFAULT_SCAN_ROWS)
    }

    /// Cells holding an 8-hex-digit fingerprint.
    ///
    /// Checksums are appended as the last column, and 8-digit numeric fields
    /// (dates, padded codes) also look like hex, so the rightmost match wins.
    pub fn checksum() -> Self {
        Self::new(CHECKSUM.clone(), DEFAULT_SCAN_ROWS).rightmost()
    }

    /// Prefer the rightmost matching cell of a row.
    pub fn rightmost(mut self) -> Self {
        self.rightmost = true;
        self
    }

    pub fn with_scan_rows(mut self, scan_rows: usize) -> Self {
        self.scan_rows = scan_rows;
        self
    }

    pub fn find<R: AsRef<[String]>>(&self, rows: &[R]) -> Result<usize> {
        self.find_excluding(rows, None)
    }

    /// As [`find`](Self::find), ignoring one column (e.g. an already discovered one).
    pub fn find_excluding<R: AsRef<[String]>>(
        &self,
        rows: &[R],
        exclude: Option<usize>,
    ) -> Result<usize> {
        let scanned = rows.iter().skip(1).take(self.scan_rows);
        let rows_scanned = scanned.len();

        for row in scanned {
            let mut hits = row
                .as_ref()
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != exclude)
                .filter(|(_, cell)| self.pattern.is_match(cell.trim()));
            let hit = if self.rightmost {
                hits.last()
            } else {
                hits.next()
            };
            if let Some((i, _)) = hit {
                return Ok(i);
            }
        }

        Err(PrefillError::ColumnNotFound {
            pattern: self.pattern.as_str().to_string(),
            rows_scanned,
        })
    }
}
