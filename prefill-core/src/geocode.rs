//! Address geocoding with a persistent cache in front.
//!
//! [`GeocodeCache`] consults its [`GeocodeStore`] first and only calls the
//! [`Geocoder`] on a miss. Failed lookups are never cached, so the next
//! request for the same address tries the service again.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{PrefillError, Result};
use crate::geo::{Address, GeoPoint};
use crate::http::{ServiceClient, ServiceConfig};
use crate::store::GeocodeStore;

/// Default Google Geocoding API endpoint.
const DEFAULT_API_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Free-text address to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<GeoPoint>;
}

/// Configuration for [`GoogleGeocoder`].
#[derive(Clone)]
pub struct GeocoderConfig {
    pub api_url: String,
    pub api_key: String,
    pub service: ServiceConfig,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            api_url: std::env::var("GEOCODE_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key: std::env::var("GOOGLE_MAPS_API_KEY").unwrap_or_default(),
            service: ServiceConfig::default(),
        }
    }
}

impl fmt::Debug for GeocoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocoderConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("service", &self.service)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: GeoPoint,
}

/// Google Geocoding API client.
#[derive(Debug, Clone)]
pub struct GoogleGeocoder {
    client: ServiceClient,
    api_url: String,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new() -> Result<Self> {
        Self::with_config(GeocoderConfig::default())
    }

    pub fn with_config(config: GeocoderConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(PrefillError::Config(
                "GOOGLE_MAPS_API_KEY is not set".to_string(),
            ));
        }
        Ok(Self {
            client: ServiceClient::new("geocoder", config.service)?,
            api_url: config.api_url,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    #[instrument(level = "debug", skip_all)]
    async fn geocode(&self, query: &str) -> Result<GeoPoint> {
        let response: GeocodeResponse = self
            .client
            .send_json(|c| {
                c.get(&self.api_url)
                    .query(&[("address", query), ("key", self.api_key.as_str())])
            })
            .await
            .map_err(|e| PrefillError::GeocodeUnavailable(e.to_string()))?;

        if response.status != "OK" {
            let detail = response.error_message.unwrap_or_default();
            return Err(PrefillError::GeocodeUnavailable(format!(
                "status {} {detail}",
                response.status
            )));
        }

        let point = response
            .results
            .into_iter()
            .next()
            .map(|r| r.geometry.location)
            .ok_or_else(|| PrefillError::GeocodeUnavailable("no results".to_string()))?;

        debug!(geohash = %point.log_cell(), "Geocoded address");
        Ok(point)
    }
}

/// Coordinates for an address, and whether they came from the service just now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geocoded {
    pub point: GeoPoint,
    /// `true` when fetched from the geocoder and not yet persisted.
    pub fresh: bool,
}

/// Read-through geocode cache.
#[derive(Clone)]
pub struct GeocodeCache {
    geocoder: Arc<dyn Geocoder>,
    store: Arc<dyn GeocodeStore>,
}

impl GeocodeCache {
    pub fn new(geocoder: Arc<dyn Geocoder>, store: Arc<dyn GeocodeStore>) -> Self {
        Self { geocoder, store }
    }

    /// Coordinates for `address`, fetching and persisting them on a miss.
    pub async fn resolve(&self, address: &Address) -> Result<GeoPoint> {
        let geocoded = self.resolve_deferred(address).await?;
        if geocoded.fresh {
            self.commit(address, geocoded.point).await?;
        }
        Ok(geocoded.point)
    }

    /// Like [`resolve`](Self::resolve), but leaves a freshly fetched value
    /// unpersisted. The caller decides whether to [`commit`](Self::commit) it.
    #[instrument(level = "debug", skip_all)]
    pub async fn resolve_deferred(&self, address: &Address) -> Result<Geocoded> {
        if let Some(point) = self.store.get_geocode(address).await? {
            debug!(geohash = %point.log_cell(), "Geocode cache hit");
            return Ok(Geocoded { point, fresh: false });
        }

        debug!("Geocode cache miss");
        let point = self
            .geocoder
            .geocode(&address.query_string())
            .await
            .map_err(|e| {
                warn!(error = %e, "Geocoding failed");
                match e {
                    PrefillError::GeocodeUnavailable(_) => e,
                    other => PrefillError::GeocodeUnavailable(other.to_string()),
                }
            })?;
        Ok(Geocoded { point, fresh: true })
    }

    /// Persist a geocode; concurrent commits for one address converge.
    pub async fn commit(&self, address: &Address, point: GeoPoint) -> Result<()> {
        self.store.put_geocode(address, point).await
    }

    /// Drop the cached geocode for `address` so the next request refetches it.
    pub async fn invalidate(&self, address: &Address) -> Result<bool> {
        self.store.invalidate_geocode(address).await
    }
}

impl fmt::Debug for GeocodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocodeCache").finish_non_exhaustive()
    }
}
