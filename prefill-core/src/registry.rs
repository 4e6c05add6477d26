//! Fingerprint to voter record registry.
//!
//! Two interchangeable backings implement [`VoterDirectory`]:
//! - [`VoterRegistry`]: built once from a bulk file and read-only afterward.
//! - `PostgresVoterStore` (feature `postgres`): a live store queried per request.
//!
//! Either way, callers go through [`lookup`], which rejects malformed tokens
//! before the backing store is touched.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::columns::ColumnFinder;
use crate::error::{PrefillError, Result};
use crate::fingerprint::{Fingerprint, VoterId};
use crate::record::{ColumnLayout, VoterRecord};

/// Source of voter records by fingerprint.
#[async_trait]
pub trait VoterDirectory: Send + Sync {
    /// Fetch the record for an already validated fingerprint.
    async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<VoterRecord>>;
}

/// Resolve an untrusted token to a voter record.
///
/// Anything that is not exactly 8 hex characters is "not found" without a
/// query. Tokens are compared case-insensitively.
#[instrument(level = "debug", skip(directory))]
pub async fn lookup(directory: &dyn VoterDirectory, token: &str) -> Result<Option<VoterRecord>> {
    let Some(fingerprint) = Fingerprint::parse(token) else {
        debug!("Rejected malformed fingerprint");
        return Ok(None);
    };
    let record = directory.find(&fingerprint).await?;
    debug!(fingerprint = %fingerprint, found = record.is_some(), "Looked up fingerprint");
    Ok(record)
}

/// Counters from one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub voter_id_column: usize,
    pub ingested: usize,
    /// Rows that repeated a voter ID already ingested in this run.
    pub reingested: usize,
    /// 1-based row numbers skipped because their voter ID did not parse.
    pub skipped_rows: Vec<usize>,
    /// Voter IDs too large for 32 bits; their fingerprints ignore the high bits.
    pub truncated_ids: usize,
}

/// In-memory registry owning its index.
#[derive(Debug, Clone, Default)]
pub struct VoterRegistry {
    records: HashMap<Fingerprint, VoterRecord>,
}

impl VoterRegistry {
    /// Build a registry from bulk-file rows using the default column layout.
    pub fn ingest<R: AsRef<[String]>>(rows: &[R]) -> Result<(Self, IngestReport)> {
        Self::ingest_with_layout(rows, &ColumnLayout::default())
    }

    /// Build a registry from bulk-file rows.
    ///
    /// The voter-ID column is discovered from the rows themselves. Rows whose
    /// ID does not parse are skipped. A fingerprint shared by two different
    /// voter IDs aborts the whole run.
    #[instrument(level = "info", skip_all, fields(rows = rows.len()))]
    pub fn ingest_with_layout<R: AsRef<[String]>>(
        rows: &[R],
        layout: &ColumnLayout,
    ) -> Result<(Self, IngestReport)> {
        let column = ColumnFinder::voter_id().find(rows)?;
        let mut registry = Self::default();
        let mut report = IngestReport {
            voter_id_column: column,
            ..Default::default()
        };

        for (i, row) in rows.iter().enumerate() {
            let row: Vec<String> = row.as_ref().iter().map(|c| c.trim().to_string()).collect();
            let voter_id = match row.get(column).map(|cell| cell.parse::<VoterId>()) {
                Some(Ok(id)) => id,
                Some(Err(e)) => {
                    debug!(row = i + 1, error = %e, "Skipping row");
                    report.skipped_rows.push(i + 1);
                    continue;
                }
                None => {
                    debug!(row = i + 1, "Skipping row without a voter ID cell");
                    report.skipped_rows.push(i + 1);
                    continue;
                }
            };

            if voter_id.exceeds_32_bits() {
                report.truncated_ids += 1;
            }

            let record = VoterRecord::from_row(&row, layout, voter_id);
            if registry.insert(record)? {
                report.reingested += 1;
            } else {
                report.ingested += 1;
            }
        }

        if !report.skipped_rows.is_empty() {
            warn!(skipped = report.skipped_rows.len(), "Skipped rows without a parseable voter ID");
        }
        if report.truncated_ids > 0 {
            warn!(
                count = report.truncated_ids,
                "Voter IDs exceed 32 bits and were truncated before fingerprinting"
            );
        }
        info!(
            voters = registry.len(),
            reingested = report.reingested,
            column,
            "Voter registry built"
        );

        Ok((registry, report))
    }

    /// Insert or overwrite a record.
    ///
    /// Returns `true` when the fingerprint was already held by the same voter ID.
    /// A different voter ID under the same fingerprint is a collision and leaves
    /// the registry unchanged.
    pub fn insert(&mut self, record: VoterRecord) -> Result<bool> {
        let fingerprint = record.fingerprint();
        let replaced = match self.records.get(&fingerprint) {
            Some(existing) if existing.voter_id != record.voter_id => {
                return Err(PrefillError::Collision {
                    fingerprint: fingerprint.to_string(),
                    existing: existing.voter_id.to_string(),
                    incoming: record.voter_id.to_string(),
                });
            }
            Some(_) => true,
            None => false,
        };
        self.records.insert(fingerprint, record);
        Ok(replaced)
    }

    /// Synchronous lookup with the same validation as [`lookup`].
    pub fn get(&self, token: &str) -> Option<&VoterRecord> {
        self.records.get(&Fingerprint::parse(token)?)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &VoterRecord)> {
        self.records.iter()
    }
}

#[async_trait]
impl VoterDirectory for VoterRegistry {
    async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<VoterRecord>> {
        Ok(self.records.get(fingerprint).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn row(voter_id: &str, surname: &str) -> Vec<String> {
        let mut row = vec![String::new(); 40];
        row[1] = surname.to_string();
        row[38] = voter_id.to_string();
        row
    }

    fn header() -> Vec<String> {
        let mut row = vec!["col".to_string(); 40];
        row[38] = "sbid".to_string();
        row
    }

    /// Directory that counts queries.
    #[derive(Default)]
    struct CountingDirectory {
        queries: AtomicUsize,
    }

    #[async_trait]
    impl VoterDirectory for CountingDirectory {
        async fn find(&self, _fingerprint: &Fingerprint) -> Result<Option<VoterRecord>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[test]
    fn test_ingest_and_get() {
        let rows = vec![header(), row(" NY1 ", "smith"), row("NY2", "doe")];
        let (registry, report) = VoterRegistry::ingest(&rows).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(report.voter_id_column, 38);
        assert_eq!(report.ingested, 2);
        assert_eq!(report.skipped_rows, vec![1]);

        let record = registry.get("04b669fb").unwrap();
        assert_eq!(record.surname, "Smith");
        assert_eq!(record.voter_id.as_str(), "NY1");
        assert_eq!(registry.get("04B669FB"), Some(record));
    }

    #[test]
    fn test_collision_aborts_ingestion() {
        // 4294967297 = 2^32 + 1 truncates to 1
        let rows = vec![header(), row("NY1", "smith"), row("NY4294967297", "doe")];
        let err = VoterRegistry::ingest(&rows).unwrap_err();
        match err {
            PrefillError::Collision {
                fingerprint,
                existing,
                incoming,
            } => {
                assert_eq!(fingerprint, "04b669fb");
                assert_eq!(existing, "NY1");
                assert_eq!(incoming, "NY4294967297");
            }
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[test]
    fn test_reingesting_same_id_is_idempotent() {
        let rows = vec![header(), row("NY1", "smith"), row("NY1", "smyth")];
        let (registry, report) = VoterRegistry::ingest(&rows).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(report.ingested, 1);
        assert_eq!(report.reingested, 1);
        // Last write wins
        assert_eq!(registry.get("04b669fb").unwrap().surname, "Smyth");
    }

    #[test]
    fn test_skips_unparseable_rows() {
        let rows = vec![header(), row("NY1", "a"), row("NYabc", "b"), vec!["short".to_string()]];
        let (registry, report) = VoterRegistry::ingest(&rows).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(report.skipped_rows, vec![1, 3, 4]);
    }

    #[test]
    fn test_counts_truncated_ids() {
        let rows = vec![header(), row("NY99999999999", "a")];
        let (_, report) = VoterRegistry::ingest(&rows).unwrap();
        assert_eq!(report.truncated_ids, 1);
    }

    #[test]
    fn test_insert_collision_leaves_registry_unchanged() {
        let rows = vec![header(), row("NY1", "smith")];
        let (mut registry, _) = VoterRegistry::ingest(&rows).unwrap();
        let intruder = VoterRecord::from_row(
            &row("NY4294967297", "doe"),
            &ColumnLayout::default(),
            "NY4294967297".parse().unwrap(),
        );
        assert!(registry.insert(intruder).is_err());
        assert_eq!(registry.get("04b669fb").unwrap().surname, "Smith");
    }

    #[tokio::test]
    async fn test_lookup_rejects_malformed_without_query() {
        let directory = CountingDirectory::default();
        assert!(lookup(&directory, "not-8-hex!").await.unwrap().is_none());
        assert!(lookup(&directory, "").await.unwrap().is_none());
        assert!(lookup(&directory, "deadbeef00").await.unwrap().is_none());
        assert_eq!(directory.queries.load(Ordering::SeqCst), 0);

        assert!(lookup(&directory, "deadbeef").await.unwrap().is_none());
        assert_eq!(directory.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_against_registry() {
        let rows = vec![header(), row("NY1", "smith")];
        let (registry, _) = VoterRegistry::ingest(&rows).unwrap();

        assert!(lookup(&registry, "deadbeef").await.unwrap().is_none());
        let found = lookup(&registry, "04B669FB").await.unwrap().unwrap();
        assert_eq!(found.surname, "Smith");
    }
}
