//! Nearest early-voting site for a residence.
//!
//! Resolution runs as a small state machine:
//!
//! ```text
//! CACHE_CHECK -> (hit) DONE
//!             -> (miss) GEOCODE -> SHORTLIST -> ROAD_DISTANCE -> PICK -> CACHE_WRITE -> DONE
//! any failure -> FALLBACK (ResolutionFailed)
//! ```
//!
//! A geocode fetched during resolution is only persisted at CACHE_WRITE, so a
//! failed resolution leaves both caches as it found them.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::distance::{batched_distances, DistanceMatrix, MAX_DESTINATIONS_PER_REQUEST};
use crate::error::{PrefillError, Result};
use crate::facility::{Facility, FacilityIndex};
use crate::geo::Address;
use crate::geocode::GeocodeCache;
use crate::store::SiteDecisionStore;

pub use crate::store::SiteKey;

/// Facilities compared by road distance after the straight-line shortlist.
pub const DEFAULT_SHORTLIST_SIZE: usize = 3;

/// Two-stage nearest-site resolver with cached decisions.
#[derive(Clone)]
pub struct NearestSiteResolver {
    geocodes: GeocodeCache,
    index: Arc<dyn FacilityIndex>,
    matrix: Arc<dyn DistanceMatrix>,
    decisions: Arc<dyn SiteDecisionStore>,
    shortlist_size: usize,
    batch_size: usize,
}

impl NearestSiteResolver {
    pub fn new(
        geocodes: GeocodeCache,
        index: Arc<dyn FacilityIndex>,
        matrix: Arc<dyn DistanceMatrix>,
        decisions: Arc<dyn SiteDecisionStore>,
    ) -> Self {
        Self {
            geocodes,
            index,
            matrix,
            decisions,
            shortlist_size: DEFAULT_SHORTLIST_SIZE,
            batch_size: MAX_DESTINATIONS_PER_REQUEST,
        }
    }

    pub fn with_shortlist_size(mut self, shortlist_size: usize) -> Self {
        self.shortlist_size = shortlist_size.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_DESTINATIONS_PER_REQUEST);
        self
    }

    /// The facility among `candidates` nearest to `residence` by road.
    ///
    /// Every failure, including an empty candidate list, comes back as
    /// [`PrefillError::ResolutionFailed`]; callers send the voter to their
    /// fallback page.
    #[instrument(level = "info", skip_all, fields(candidates = candidates.len()))]
    pub async fn nearest(&self, residence: &Address, candidates: &[Facility]) -> Result<Facility> {
        let start = Instant::now();
        match self.resolve(residence, candidates).await {
            Ok(facility) => {
                info!(
                    facility = %facility.name,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Resolved nearest site"
                );
                Ok(facility)
            }
            Err(e) => {
                warn!(error = %e, "Nearest-site resolution failed, falling back");
                Err(match e {
                    PrefillError::ResolutionFailed(_) => e,
                    other => PrefillError::ResolutionFailed(other.to_string()),
                })
            }
        }
    }

    async fn resolve(&self, residence: &Address, candidates: &[Facility]) -> Result<Facility> {
        let key = SiteKey::new(residence.clone(), candidates);

        // CACHE_CHECK
        if let Some(name) = self.decisions.get_decision(&key).await? {
            if let Some(facility) = candidates.iter().find(|f| f.name == name) {
                debug!(facility = %name, "Site decision cache hit");
                return Ok(facility.clone());
            }
            warn!(facility = %name, "Cached site decision names no candidate, recomputing");
        }
        debug!("Site decision cache miss");

        // GEOCODE
        let geocoded = self.geocodes.resolve_deferred(residence).await?;
        debug!(
            geohash = %geocoded.point.log_cell(),
            fresh = geocoded.fresh,
            "Residence geocoded"
        );

        // SHORTLIST
        let shortlist = self
            .index
            .nearest(geocoded.point, &key.candidates, self.shortlist_size)
            .await?;
        if shortlist.is_empty() {
            return Err(PrefillError::ResolutionFailed(
                "no candidate facility is known to the facility index".to_string(),
            ));
        }
        debug!(shortlisted = shortlist.len(), "Shortlisted by straight-line distance");

        // ROAD_DISTANCE
        let destinations: Vec<String> = shortlist.iter().map(|f| f.address.clone()).collect();
        let distances = batched_distances(
            self.matrix.as_ref(),
            &geocoded.point.as_query(),
            &destinations,
            self.batch_size,
        )
        .await?;

        // PICK: strict less-than keeps the first of equal distances
        let mut best = 0;
        for (i, distance) in distances.iter().enumerate() {
            if *distance < distances[best] {
                best = i;
            }
        }
        let chosen = shortlist[best].clone();
        debug!(facility = %chosen.name, metres = distances[best], "Picked nearest by road");

        // CACHE_WRITE
        if geocoded.fresh {
            self.geocodes.commit(residence, geocoded.point).await?;
        }
        self.decisions.put_decision(&key, &chosen.name).await?;

        Ok(chosen)
    }
}

impl std::fmt::Debug for NearestSiteResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearestSiteResolver")
            .field("shortlist_size", &self.shortlist_size)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::facility::StaticFacilityIndex;
    use crate::geo::GeoPoint;
    use crate::geocode::Geocoder;
    use crate::store::{GeocodeStore, MemoryStore};

    struct FixedGeocoder {
        point: Option<GeoPoint>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, _query: &str) -> Result<GeoPoint> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.point
                .ok_or_else(|| PrefillError::GeocodeUnavailable("down".to_string()))
        }
    }

    /// Road distances looked up by destination address; unknown addresses fail.
    struct TableMatrix {
        metres: HashMap<String, u64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DistanceMatrix for TableMatrix {
        async fn distances(&self, _origin: &str, destinations: &[String]) -> Result<Vec<u64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            destinations
                .iter()
                .map(|d| {
                    self.metres
                        .get(d)
                        .copied()
                        .ok_or_else(|| PrefillError::Upstream(format!("no route to {d}")))
                })
                .collect()
        }
    }

    struct Harness {
        resolver: NearestSiteResolver,
        store: Arc<MemoryStore>,
        geocoder: Arc<FixedGeocoder>,
        matrix: Arc<TableMatrix>,
    }

    fn facilities() -> Vec<Facility> {
        vec![
            Facility::new("Library", "115 South Ave", GeoPoint::new(43.151, -77.608)),
            Facility::new("Town Hall", "30 Church St", GeoPoint::new(43.158, -77.611)),
            Facility::new("Fire House", "9 Elm St", GeoPoint::new(43.160, -77.600)),
            Facility::new("Far School", "1 Lake Rd", GeoPoint::new(43.4, -77.9)),
        ]
    }

    fn harness(point: Option<GeoPoint>, metres: &[(&str, u64)]) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let geocoder = Arc::new(FixedGeocoder {
            point,
            calls: AtomicUsize::new(0),
        });
        let matrix = Arc::new(TableMatrix {
            metres: metres.iter().map(|(a, m)| (a.to_string(), *m)).collect(),
            calls: AtomicUsize::new(0),
        });
        let resolver = NearestSiteResolver::new(
            GeocodeCache::new(geocoder.clone(), store.clone()),
            Arc::new(StaticFacilityIndex::new(facilities())),
            matrix.clone(),
            store.clone(),
        );
        Harness {
            resolver,
            store,
            geocoder,
            matrix,
        }
    }

    fn home() -> Address {
        Address::new("1", "Main St", "14604")
    }

    fn home_point() -> Option<GeoPoint> {
        Some(GeoPoint::new(43.1566, -77.6088))
    }

    const ROADS: &[(&str, u64)] = &[
        ("115 South Ave", 2400),
        ("30 Church St", 900),
        ("9 Elm St", 1500),
        ("1 Lake Rd", 100),
    ];

    #[tokio::test]
    async fn test_picks_minimum_road_distance() {
        let h = harness(home_point(), ROADS);
        let chosen = h.resolver.nearest(&home(), &facilities()).await.unwrap();
        // Far School is closest by road but never makes the straight-line shortlist
        assert_eq!(chosen.name, "Town Hall");
        assert_eq!(h.store.geocode_count(), 1);
        assert_eq!(h.store.decision_count(), 1);
    }

    #[tokio::test]
    async fn test_tie_goes_to_first_in_shortlist() {
        let ties = &[("115 South Ave", 1000), ("30 Church St", 1000), ("9 Elm St", 1000)];
        let h = harness(home_point(), ties);
        let chosen = h.resolver.nearest(&home(), &facilities()).await.unwrap();

        let index = StaticFacilityIndex::new(facilities());
        let names = SiteKey::new(home(), &facilities()).candidates;
        let shortlist = index.nearest(home_point().unwrap(), &names, 3).await.unwrap();
        assert_eq!(chosen.name, shortlist[0].name);
    }

    #[tokio::test]
    async fn test_cached_decision_skips_services() {
        let h = harness(home_point(), ROADS);
        let first = h.resolver.nearest(&home(), &facilities()).await.unwrap();

        // Reordering and duplicating candidates hits the same entry
        let mut reordered = facilities();
        reordered.reverse();
        reordered.push(reordered[0].clone());
        let second = h.resolver.nearest(&home(), &reordered).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.matrix.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_candidate_set_is_a_miss() {
        let h = harness(home_point(), ROADS);
        h.resolver.nearest(&home(), &facilities()).await.unwrap();

        let fewer: Vec<Facility> = facilities()
            .into_iter()
            .filter(|f| f.name != "Town Hall" && f.name != "Far School")
            .collect();
        let chosen = h.resolver.nearest(&home(), &fewer).await.unwrap();

        assert_eq!(chosen.name, "Fire House");
        assert_eq!(h.store.decision_count(), 2);
        // The geocode is reused
        assert_eq!(h.geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_converge() {
        let h = harness(home_point(), ROADS);
        let candidates = facilities();
        let home = home();
        let (a, b) = tokio::join!(
            h.resolver.nearest(&home, &candidates),
            h.resolver.nearest(&home, &candidates)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(h.store.decision_count(), 1);
        assert_eq!(h.store.geocode_count(), 1);
    }

    #[tokio::test]
    async fn test_distance_failure_falls_back_without_caching() {
        let h = harness(home_point(), &[]);
        let err = h.resolver.nearest(&home(), &facilities()).await.unwrap_err();

        assert!(matches!(err, PrefillError::ResolutionFailed(_)));
        assert_eq!(h.store.geocode_count(), 0);
        assert_eq!(h.store.decision_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_leaves_existing_geocode_untouched() {
        let h = harness(home_point(), &[]);
        let earlier = GeoPoint::new(43.15, -77.61);
        h.store.put_geocode(&home(), earlier).await.unwrap();

        assert!(h.resolver.nearest(&home(), &facilities()).await.is_err());
        assert_eq!(h.store.get_geocode(&home()).await.unwrap(), Some(earlier));
        assert_eq!(h.store.geocode_count(), 1);
        assert_eq!(h.geocoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_geocode_failure_is_resolution_failure() {
        let h = harness(None, ROADS);
        let err = h.resolver.nearest(&home(), &facilities()).await.unwrap_err();
        assert!(matches!(err, PrefillError::ResolutionFailed(_)));
        assert_eq!(h.matrix.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.geocode_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_candidates_fail() {
        let h = harness(home_point(), ROADS);
        let stranger = vec![Facility::new("Nowhere", "0 Void", GeoPoint::new(0.0, 0.0))];
        let err = h.resolver.nearest(&home(), &stranger).await.unwrap_err();
        assert!(matches!(err, PrefillError::ResolutionFailed(_)));

        let err = h.resolver.nearest(&home(), &[]).await.unwrap_err();
        assert!(matches!(err, PrefillError::ResolutionFailed(_)));
    }
}
