//! Road distances from one origin to many destinations.

use std::fmt;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{PrefillError, Result};
use crate::http::{ServiceClient, ServiceConfig};

/// Default Google Distance Matrix API endpoint.
const DEFAULT_API_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";

/// Most destinations the service accepts in one request.
pub const MAX_DESTINATIONS_PER_REQUEST: usize = 10;

/// One-origin road distance lookup.
#[async_trait]
pub trait DistanceMatrix: Send + Sync {
    /// Road distance in metres to each destination, in input order.
    ///
    /// Callers pass at most [`MAX_DESTINATIONS_PER_REQUEST`] destinations.
    async fn distances(&self, origin: &str, destinations: &[String]) -> Result<Vec<u64>>;
}

/// Split `destinations` into batches of at most `batch_size`, query them
/// concurrently and return the distances in input order.
///
/// Any failed batch fails the whole call.
#[instrument(level = "debug", skip_all, fields(destinations = destinations.len(), batch_size = batch_size))]
pub async fn batched_distances(
    matrix: &dyn DistanceMatrix,
    origin: &str,
    destinations: &[String],
    batch_size: usize,
) -> Result<Vec<u64>> {
    let batch_size = batch_size.clamp(1, MAX_DESTINATIONS_PER_REQUEST);
    let batches = destinations
        .chunks(batch_size)
        .map(|chunk| matrix.distances(origin, chunk));

    let results = try_join_all(batches).await?;
    let distances: Vec<u64> = results.into_iter().flatten().collect();

    if distances.len() != destinations.len() {
        return Err(PrefillError::Upstream(format!(
            "expected {} distances, got {}",
            destinations.len(),
            distances.len()
        )));
    }
    debug!(batches = destinations.len().div_ceil(batch_size), "Fetched road distances");
    Ok(distances)
}

/// Configuration for [`GoogleDistanceMatrix`].
#[derive(Clone)]
pub struct DistanceMatrixConfig {
    pub api_url: String,
    pub api_key: String,
    pub service: ServiceConfig,
}

impl Default for DistanceMatrixConfig {
    fn default() -> Self {
        Self {
            api_url: std::env::var("DISTANCE_MATRIX_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key: std::env::var("GOOGLE_MAPS_API_KEY").unwrap_or_default(),
            service: ServiceConfig::default(),
        }
    }
}

impl fmt::Debug for DistanceMatrixConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistanceMatrixConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("service", &self.service)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    rows: Vec<MatrixRow>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    #[serde(default)]
    distance: Option<Distance>,
}

#[derive(Debug, Deserialize)]
struct Distance {
    value: u64,
}

/// Google Distance Matrix API client.
#[derive(Debug, Clone)]
pub struct GoogleDistanceMatrix {
    client: ServiceClient,
    api_url: String,
    api_key: String,
}

impl GoogleDistanceMatrix {
    pub fn new() -> Result<Self> {
        Self::with_config(DistanceMatrixConfig::default())
    }

    pub fn with_config(config: DistanceMatrixConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(PrefillError::Config(
                "GOOGLE_MAPS_API_KEY is not set".to_string(),
            ));
        }
        Ok(Self {
            client: ServiceClient::new("distance-matrix", config.service)?,
            api_url: config.api_url,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl DistanceMatrix for GoogleDistanceMatrix {
    #[instrument(level = "debug", skip_all, fields(destinations = destinations.len()))]
    async fn distances(&self, origin: &str, destinations: &[String]) -> Result<Vec<u64>> {
        if destinations.len() > MAX_DESTINATIONS_PER_REQUEST {
            return Err(PrefillError::InvalidInput(format!(
                "{} destinations exceeds the per-request limit of {MAX_DESTINATIONS_PER_REQUEST}",
                destinations.len()
            )));
        }

        let joined = destinations.join("|");
        let response: MatrixResponse = self
            .client
            .send_json(|c| {
                c.get(&self.api_url).query(&[
                    ("origins", origin),
                    ("destinations", joined.as_str()),
                    ("key", self.api_key.as_str()),
                ])
            })
            .await?;

        if response.status != "OK" {
            return Err(PrefillError::Upstream(format!(
                "distance matrix status {} {}",
                response.status,
                response.error_message.unwrap_or_default()
            )));
        }

        let row = response
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| PrefillError::Upstream("distance matrix returned no rows".to_string()))?;

        if row.elements.len() != destinations.len() {
            return Err(PrefillError::Upstream(format!(
                "distance matrix returned {} elements for {} destinations",
                row.elements.len(),
                destinations.len()
            )));
        }

        row.elements
            .into_iter()
            .zip(destinations)
            .map(|(element, destination)| match (element.status.as_str(), element.distance) {
                ("OK", Some(d)) => Ok(d.value),
                (status, _) => Err(PrefillError::Upstream(format!(
                    "no route to {destination}: {status}"
                ))),
            })
            .collect()
    }
}
