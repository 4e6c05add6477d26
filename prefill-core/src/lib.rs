//! Prefill Core - voter fingerprints and nearest early-voting sites for mailer links
//!
//! Printed mailers carry a short fingerprint of each voter's state ID. When a
//! voter follows the link, the fingerprint resolves back to their registration
//! record so forms can be prefilled, and their residence resolves to the
//! nearest early-voting site.
//!
//! # Features
//!
//! - 8-hex-character FNV-1a fingerprints with load-time collision detection
//! - Bulk voter-file ingestion with voter-ID column discovery
//! - Two-stage nearest-site resolution (straight-line shortlist, then road distance)
//! - Persistent geocode and site-decision caches (memory or PostgreSQL)
//! - Bounded throttle retry on every outbound call
//!
//! # Example
//!
//! ```
//! use prefill_core::{fingerprint, VoterRegistry};
//!
//! # fn example() -> prefill_core::Result<()> {
//! assert_eq!(fingerprint("NY1")?.to_string(), "04b669fb");
//!
//! let rows: Vec<Vec<String>> = vec![
//!     vec!["county".into(), "last".into(), "sbid".into()],
//!     vec!["MC".into(), "SMITH".into(), "NY1".into()],
//! ];
//! let (registry, _report) = VoterRegistry::ingest(&rows)?;
//! assert!(registry.get("04B669FB").is_some());
//! assert!(registry.get("not-a-token").is_none());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod bulk;
pub mod columns;
pub mod crm;
pub mod distance;
pub mod error;
pub mod facility;
pub mod fingerprint;
pub mod geo;
pub mod geocode;
pub mod http;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod store;

// Re-export main types for convenience
pub use bulk::{append_checksums, read_rows, verify_checksums, ChecksumMismatch, ChecksumSummary};
pub use columns::ColumnFinder;
pub use crm::{CrmClient, CrmConfig, Feature};
pub use distance::{DistanceMatrix, DistanceMatrixConfig, GoogleDistanceMatrix};
pub use error::{PrefillError, Result};
pub use facility::{Facility, FacilityIndex, StaticFacilityIndex};
pub use fingerprint::{fingerprint, Fingerprint, VoterId};
pub use geo::{Address, GeoPoint};
pub use geocode::{GeocodeCache, Geocoder, GeocoderConfig, GoogleGeocoder};
pub use http::{ServiceClient, ServiceConfig};
pub use record::{ColumnLayout, VoterRecord};
pub use registry::{lookup, IngestReport, VoterDirectory, VoterRegistry};
pub use resolver::{NearestSiteResolver, SiteKey};
pub use store::{GeocodeStore, MemoryStore, SiteDecisionStore};

#[cfg(feature = "postgres")]
pub use store::{PostgresStore, PostgresVoterStore};
