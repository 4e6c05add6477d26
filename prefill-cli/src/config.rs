//! CLI settings loaded from environment variables.
//!
//! Service credentials and endpoints are read by the core client configs
//! (`GeocoderConfig`, `DistanceMatrixConfig`, `CrmConfig`); this covers the
//! rest.

use std::path::PathBuf;

/// Where voters are sent when no site can be resolved.
pub const DEFAULT_SITE_FALLBACK_URL: &str = "https://www.monroecounty.gov/etc/voter/";

#[derive(Clone)]
pub struct Settings {
    /// PostgreSQL stores when set, in-memory otherwise.
    pub database_url: Option<String>,
    /// Connection pool size (default: 10)
    pub database_max_connections: u32,
    pub site_fallback_url: String,
    /// JSON array of `{ name, address, lat, lng }`.
    pub facilities_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            site_fallback_url: DEFAULT_SITE_FALLBACK_URL.to_string(),
            facilities_file: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            site_fallback_url: non_empty_var("SITE_FALLBACK_URL")
                .unwrap_or(defaults.site_fallback_url),
            facilities_file: non_empty_var("FACILITIES_FILE").map(PathBuf::from),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL may embed a password
        f.debug_struct("Settings")
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("database_max_connections", &self.database_max_connections)
            .field("site_fallback_url", &self.site_fallback_url)
            .field("facilities_file", &self.facilities_file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.database_url.is_none());
        assert_eq!(settings.database_max_connections, 10);
        assert_eq!(settings.site_fallback_url, DEFAULT_SITE_FALLBACK_URL);
    }

    #[test]
    fn test_debug_redacts_database_url() {
        let settings = Settings {
            database_url: Some("postgres://user:hunter2@db/prefill".to_string()),
            ..Default::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
    }
}
