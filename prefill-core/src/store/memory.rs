//! In-memory cache backend.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{GeocodeStore, SiteDecisionStore, SiteKey};
use crate::error::Result;
use crate::geo::{Address, GeoPoint};

/// DashMap-backed store. Lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    geocodes: DashMap<Address, GeoPoint>,
    decisions: DashMap<SiteKey, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geocode_count(&self) -> usize {
        self.geocodes.len()
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }
}

#[async_trait]
impl GeocodeStore for MemoryStore {
    async fn get_geocode(&self, address: &Address) -> Result<Option<GeoPoint>> {
        Ok(self.geocodes.get(address).map(|entry| *entry.value()))
    }

    async fn put_geocode(&self, address: &Address, point: GeoPoint) -> Result<()> {
        self.geocodes.insert(address.clone(), point);
        Ok(())
    }

    async fn invalidate_geocode(&self, address: &Address) -> Result<bool> {
        Ok(self.geocodes.remove(address).is_some())
    }
}

#[async_trait]
impl SiteDecisionStore for MemoryStore {
    async fn get_decision(&self, key: &SiteKey) -> Result<Option<String>> {
        Ok(self.decisions.get(key).map(|entry| entry.value().clone()))
    }

    async fn put_decision(&self, key: &SiteKey, facility: &str) -> Result<()> {
        self.decisions.insert(key.clone(), facility.to_string());
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("geocodes", &self.geocodes.len())
            .field("decisions", &self.decisions.len())
            .finish()
    }
}
