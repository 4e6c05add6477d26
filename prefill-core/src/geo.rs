//! Addresses and coordinates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::normalize;

/// Mean Earth radius used for great-circle distances.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Geohash precision used when a location is written to logs (~5 km cells).
pub const LOG_GEOHASH_PRECISION: usize = 5;

/// A residence or facility address, normalized on construction.
///
/// This is the natural key of both the geocode cache and the site decision cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub house: String,
    pub street: String,
    pub postal_code: String,
}

impl Address {
    pub fn new(house: &str, street: &str, postal_code: &str) -> Self {
        Self {
            house: normalize(house),
            street: normalize(street),
            postal_code: normalize(postal_code),
        }
    }

    /// Free-text query for a geocoding service: `"house street, postal-code"`.
    pub fn query_string(&self) -> String {
        format!("{} {}, {}", self.house, self.street, self.postal_code)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_string())
    }
}

/// Latitude/longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle (haversine) distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    /// Geohash of this point at the given precision, if the point is in range.
    pub fn geohash(&self, precision: usize) -> Option<String> {
        geohash::encode(
            geohash::Coord {
                x: self.lng,
                y: self.lat,
            },
            precision,
        )
        .ok()
    }

    /// Coarse location suitable for log fields.
    pub fn log_cell(&self) -> String {
        self.geohash(LOG_GEOHASH_PRECISION)
            .unwrap_or_else(|| "invalid".to_string())
    }

    /// `"lat,lng"` as accepted by map APIs.
    pub fn as_query(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }
}
