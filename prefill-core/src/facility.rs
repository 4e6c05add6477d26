//! Early-voting facilities and the straight-line shortlist.

use std::collections::BTreeSet;
use std::io::Read;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PrefillError, Result};
use crate::geo::GeoPoint;

/// A named site voters can be sent to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub name: String,
    /// Street address, as given to the distance-matrix service.
    pub address: String,
    #[serde(flatten)]
    pub location: GeoPoint,
}

impl Facility {
    pub fn new(name: impl Into<String>, address: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            location,
        }
    }

    /// Parse a JSON array of `{ "name", "address", "lat", "lng" }`.
    pub fn load_all<R: Read>(reader: R) -> Result<Vec<Facility>> {
        let facilities: Vec<Facility> = serde_json::from_reader(reader)
            .map_err(|e| PrefillError::Config(format!("Invalid facilities file: {e}")))?;

        let mut names = BTreeSet::new();
        for facility in &facilities {
            if !names.insert(facility.name.as_str()) {
                return Err(PrefillError::Config(format!(
                    "Duplicate facility name: {}",
                    facility.name
                )));
            }
        }
        Ok(facilities)
    }
}

/// "k nearest facilities to a point" over the known facility set.
#[async_trait]
pub trait FacilityIndex: Send + Sync {
    /// Up to `k` facilities named in `among`, nearest first by straight-line distance.
    async fn nearest(
        &self,
        point: GeoPoint,
        among: &BTreeSet<String>,
        k: usize,
    ) -> Result<Vec<Facility>>;
}

/// Facility index over a small, fixed list held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticFacilityIndex {
    facilities: Vec<Facility>,
}

impl StaticFacilityIndex {
    pub fn new(facilities: Vec<Facility>) -> Self {
        Self { facilities }
    }

    pub fn facilities(&self) -> &[Facility] {
        &self.facilities
    }

    pub fn get(&self, name: &str) -> Option<&Facility> {
        self.facilities.iter().find(|f| f.name == name)
    }
}

#[async_trait]
impl FacilityIndex for StaticFacilityIndex {
    async fn nearest(
        &self,
        point: GeoPoint,
        among: &BTreeSet<String>,
        k: usize,
    ) -> Result<Vec<Facility>> {
        let mut ranked: Vec<(f64, &Facility)> = self
            .facilities
            .iter()
            .filter(|f| among.contains(&f.name))
            .map(|f| (point.distance_km(&f.location), f))
            .collect();

        // Stable: equal distances keep list order
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranked.truncate(k);

        debug!(
            candidates = among.len(),
            shortlisted = ranked.len(),
            "Shortlisted facilities"
        );
        Ok(ranked.into_iter().map(|(_, f)| f.clone()).collect())
    }
}
