//! PostgreSQL backends for the caches and the live voter directory.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, instrument};

use super::{GeocodeStore, SiteDecisionStore, SiteKey};
use crate::error::{PrefillError, Result};
use crate::fingerprint::Fingerprint;
use crate::geo::{Address, GeoPoint};
use crate::record::VoterRecord;
use crate::registry::{VoterDirectory, VoterRegistry};

/// Connect and run the embedded migrations.
async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| PrefillError::Storage(format!("connection failed: {e}")))?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Connected to PostgreSQL and applied migrations");
    Ok(pool)
}

/// Geocode and site-decision caches in PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct GeocodeRow {
    lat: f64,
    lng: f64,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        Ok(Self {
            pool: connect(database_url, max_connections).await?,
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn check_health(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl GeocodeStore for PostgresStore {
    async fn get_geocode(&self, address: &Address) -> Result<Option<GeoPoint>> {
        let row: Option<GeocodeRow> = sqlx::query_as(
            r#"
            SELECT lat, lng FROM geocodes
            WHERE house = $1 AND street = $2 AND postal_code = $3
            "#,
        )
        .bind(&address.house)
        .bind(&address.street)
        .bind(&address.postal_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| GeoPoint::new(r.lat, r.lng)))
    }

    async fn put_geocode(&self, address: &Address, point: GeoPoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO geocodes (house, street, postal_code, lat, lng)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (house, street, postal_code) DO UPDATE SET
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                resolved_at = NOW()
            "#,
        )
        .bind(&address.house)
        .bind(&address.street)
        .bind(&address.postal_code)
        .bind(point.lat)
        .bind(point.lng)
        .execute(&self.pool)
        .await?;

        debug!(geohash = %point.log_cell(), "Stored geocode");
        Ok(())
    }

    async fn invalidate_geocode(&self, address: &Address) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM geocodes WHERE house = $1 AND street = $2 AND postal_code = $3",
        )
        .bind(&address.house)
        .bind(&address.street)
        .bind(&address.postal_code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SiteDecisionStore for PostgresStore {
    async fn get_decision(&self, key: &SiteKey) -> Result<Option<String>> {
        let facility: Option<String> = sqlx::query_scalar(
            r#"
            SELECT facility FROM site_decisions
            WHERE house = $1 AND street = $2 AND postal_code = $3 AND candidates = $4
            "#,
        )
        .bind(&key.residence.house)
        .bind(&key.residence.street)
        .bind(&key.residence.postal_code)
        .bind(key.candidates_key())
        .fetch_optional(&self.pool)
        .await?;

        Ok(facility)
    }

    async fn put_decision(&self, key: &SiteKey, facility: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO site_decisions (house, street, postal_code, candidates, facility)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (house, street, postal_code, candidates) DO UPDATE SET
                facility = EXCLUDED.facility,
                decided_at = NOW()
            "#,
        )
        .bind(&key.residence.house)
        .bind(&key.residence.street)
        .bind(&key.residence.postal_code)
        .bind(key.candidates_key())
        .bind(facility)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Live voter directory: fingerprint -> record document.
#[derive(Clone)]
pub struct PostgresVoterStore {
    pool: PgPool,
}

impl PostgresVoterStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        Ok(Self {
            pool: connect(database_url, max_connections).await?,
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert every mapping of an ingested registry.
    ///
    /// A row already owned by a different voter ID is never overwritten; the
    /// first such conflict aborts the load with [`PrefillError::Collision`].
    /// Rows written before the conflict stay written.
    #[instrument(level = "info", skip_all, fields(voters = registry.len()))]
    pub async fn load(&self, registry: &VoterRegistry) -> Result<u64> {
        let mut written = 0u64;
        for (fingerprint, record) in registry.iter() {
            self.upsert(fingerprint, record).await?;
            written += 1;
        }
        info!(written, "Loaded voter registry into PostgreSQL");
        Ok(written)
    }

    pub async fn upsert(&self, fingerprint: &Fingerprint, record: &VoterRecord) -> Result<()> {
        let document = serde_json::to_value(record)
            .map_err(|e| PrefillError::Storage(format!("cannot serialize record: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO voters (fingerprint, voter_id, record)
            VALUES ($1, $2, $3)
            ON CONFLICT (fingerprint) DO UPDATE SET
                record = EXCLUDED.record,
                updated_at = NOW()
            WHERE voters.voter_id = EXCLUDED.voter_id
            "#,
        )
        .bind(fingerprint.to_string())
        .bind(record.voter_id.as_str())
        .bind(&document)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let existing: String =
                sqlx::query_scalar("SELECT voter_id FROM voters WHERE fingerprint = $1")
                    .bind(fingerprint.to_string())
                    .fetch_one(&self.pool)
                    .await?;
            return Err(PrefillError::Collision {
                fingerprint: fingerprint.to_string(),
                existing,
                incoming: record.voter_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VoterDirectory for PostgresVoterStore {
    async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<VoterRecord>> {
        let document: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT record FROM voters WHERE fingerprint = $1")
                .bind(fingerprint.to_string())
                .fetch_optional(&self.pool)
                .await?;

        document
            .map(|doc| {
                serde_json::from_value(doc)
                    .map_err(|e| PrefillError::Storage(format!("corrupt voter record: {e}")))
            })
            .transpose()
    }
}
