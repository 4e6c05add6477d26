//! Exit codes following sysexits.h conventions.
//!
//! Scripts driving bulk-file runs can tell bad data from an unavailable
//! service by the exit status alone.

use prefill_core::PrefillError;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Data format error (fingerprint collision, checksum mismatch).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open or parse an input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Service unavailable (maps APIs, CRM, database).
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// I/O error (cannot write output).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Help text listing the codes above.
pub const EXIT_CODES_HELP: &str = "Exit codes:
  0   Success (including a fallback site URL)
  1   General error
  65  Data error (fingerprint collision, checksum mismatch)
  66  Input file missing or unreadable
  69  External service or database unavailable
  74  Output could not be written";

/// Represents an exit code with error context.
pub struct ExitCode {
    pub code: i32,
    pub message: String,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let core = err.chain().find_map(|e| e.downcast_ref::<PrefillError>());
        let code = match core {
            Some(PrefillError::Collision { .. }) => DATA_ERROR,
            Some(PrefillError::ColumnNotFound { .. } | PrefillError::Csv(_)) => INPUT_ERROR,
            Some(PrefillError::Storage(_)) => UNAVAILABLE,
            Some(e) if e.is_upstream() => UNAVAILABLE,
            // Classify by message for errors raised in the CLI itself
            _ if message.contains("Failed to read") => INPUT_ERROR,
            _ if message.contains("verification failed") => DATA_ERROR,
            _ if message.contains("Failed to write") => IO_ERROR,
            _ => GENERAL_ERROR,
        };

        Self { code, message }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_collision_is_data_error() {
        let err = anyhow::Error::new(PrefillError::Collision {
            fingerprint: "04b669fb".to_string(),
            existing: "NY1".to_string(),
            incoming: "NY4294967297".to_string(),
        });
        let exit = ExitCode::from_anyhow(&err);
        assert_eq!(exit.code, DATA_ERROR);
        assert!(exit.message.contains("NY4294967297"));
    }

    #[test]
    fn test_context_does_not_hide_classification() {
        let err: anyhow::Result<()> = Err(PrefillError::RateLimited {
            service: "geocoder".to_string(),
            status: 429,
            attempts: 5,
        })
        .context("Failed to geocode");
        assert_eq!(ExitCode::from_anyhow(&err.unwrap_err()).code, UNAVAILABLE);
    }

    #[test]
    fn test_message_classification() {
        let read = anyhow::anyhow!("Failed to read file: voters.csv");
        assert_eq!(ExitCode::from_anyhow(&read).code, INPUT_ERROR);

        let write = anyhow::anyhow!("Failed to write output");
        assert_eq!(ExitCode::from_anyhow(&write).code, IO_ERROR);

        let other = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_anyhow(&other).code, GENERAL_ERROR);
    }
}
