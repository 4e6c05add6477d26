use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrefillError {
    /// A voter ID, row, or token that cannot be parsed. Bulk ingestion skips these.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Two distinct voter IDs produced the same fingerprint.
    #[error("Fingerprint collision on {fingerprint}: {incoming} collides with {existing}")]
    Collision {
        fingerprint: String,
        existing: String,
        incoming: String,
    },

    #[error("No column matching {pattern} in the first {rows_scanned} data rows")]
    ColumnNotFound {
        pattern: String,
        rows_scanned: usize,
    },

    #[error("Geocoding unavailable: {0}")]
    GeocodeUnavailable(String),

    #[error("Nearest-site resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("{service} still throttled with status {status} after {attempts} attempts")]
    RateLimited {
        service: String,
        status: u16,
        attempts: u32,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl PrefillError {
    /// Whether the error came from an external dependency rather than from local data.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::GeocodeUnavailable(_)
                | Self::ResolutionFailed(_)
                | Self::RateLimited { .. }
                | Self::Upstream(_)
                | Self::HttpError(_)
        )
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PrefillError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for PrefillError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Storage(format!("migration failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, PrefillError>;
