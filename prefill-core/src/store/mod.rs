//! Persistent caches for the nearest-site resolver.
//!
//! Two caches, both keyed by normalized [`Address`]:
//! - **Geocodes**: address -> coordinates, written once and reused until invalidated.
//! - **Site decisions**: (address, exact candidate set) -> chosen facility name.
//!
//! Writes are whole-value upserts, so concurrent writers to one key converge
//! on a single entry. No negative results are ever stored.
//!
//! Backends:
//! - [`MemoryStore`]: process-local, for tests and single-shot tools.
//! - `PostgresStore` (feature `postgres`): survives restarts.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresStore, PostgresVoterStore};

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::facility::Facility;
use crate::geo::{Address, GeoPoint};

/// Key of a nearest-site decision.
///
/// Candidate order and duplicates do not matter; membership does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteKey {
    pub residence: Address,
    pub candidates: BTreeSet<String>,
}

impl SiteKey {
    pub fn new(residence: Address, candidates: &[Facility]) -> Self {
        Self {
            residence,
            candidates: candidates.iter().map(|f| f.name.clone()).collect(),
        }
    }

    /// Canonical text form of the candidate set (sorted JSON array of names).
    pub fn candidates_key(&self) -> String {
        let names: Vec<&str> = self.candidates.iter().map(String::as_str).collect();
        serde_json::Value::from(names).to_string()
    }
}

#[async_trait]
pub trait GeocodeStore: Send + Sync {
    async fn get_geocode(&self, address: &Address) -> Result<Option<GeoPoint>>;

    /// Upsert; replaces any existing value for the address.
    async fn put_geocode(&self, address: &Address, point: GeoPoint) -> Result<()>;

    /// Remove an entry. Returns whether one existed.
    async fn invalidate_geocode(&self, address: &Address) -> Result<bool>;
}

#[async_trait]
pub trait SiteDecisionStore: Send + Sync {
    /// Name of the facility previously chosen for this key.
    async fn get_decision(&self, key: &SiteKey) -> Result<Option<String>>;

    /// Upsert; replaces any existing decision for the key.
    async fn put_decision(&self, key: &SiteKey, facility: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_key_ignores_order_and_duplicates() {
        let a = Facility::new("A", "a", GeoPoint::new(0.0, 0.0));
        let b = Facility::new("B", "b", GeoPoint::new(0.0, 0.0));
        let home = Address::new("1", "Main St", "14604");

        let k1 = SiteKey::new(home.clone(), &[a.clone(), b.clone()]);
        let k2 = SiteKey::new(home.clone(), &[b.clone(), a.clone(), b.clone()]);
        let k3 = SiteKey::new(home, &[a]);

        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert_eq!(k1.candidates_key(), r#"["A","B"]"#);
    }

    #[test]
    fn test_candidates_key_escapes_names() {
        let odd = Facility::new(r#"Hall "B", East"#, "x", GeoPoint::new(0.0, 0.0));
        let key = SiteKey::new(Address::new("1", "x", "1"), &[odd]);
        let names: Vec<String> = serde_json::from_str(&key.candidates_key()).unwrap();
        assert_eq!(names, vec![r#"Hall "B", East"#.to_string()]);
    }
}
