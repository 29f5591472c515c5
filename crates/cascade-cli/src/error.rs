//! CLI errors and the exit codes they map to

use cascade_cache::{CacheError, RecordId};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Bad argument value that clap could not catch
    #[error("{0}")]
    Usage(String),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Record too large: {size} bytes does not fit the {budget}-byte hot tier (raise hot.budget_bytes)")]
    TooLarge { size: u64, budget: u64 },

    #[error("Storage unavailable: {detail}. Check that {} is reachable and retry", .data_dir.display())]
    Storage { detail: String, data_dir: PathBuf },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(CacheError),

    #[error("Could not encode output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        CliError::Usage(msg.into())
    }

    /// Attach the data directory to storage failures so the message says where to look
    pub fn in_data_dir(self, data_dir: &std::path::Path) -> Self {
        match self {
            CliError::Storage { detail, .. } => CliError::Storage {
                detail,
                data_dir: data_dir.to_path_buf(),
            },
            other => other,
        }
    }

    /// Process exit code: 2 for usage and config errors, 3 when storage is
    /// down and a retry may help, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) | CliError::Config(_) => 2,
            CliError::Storage { .. } => 3,
            _ => 1,
        }
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::CapacityExceeded { size, budget } => CliError::TooLarge { size, budget },
            CacheError::StorageUnavailable(detail) => CliError::Storage {
                detail,
                data_dir: PathBuf::new(),
            },
            CacheError::Config(msg) => CliError::Config(msg),
            CacheError::NotFound(id) => CliError::NotFound(id),
            other => CliError::Cache(other),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_capacity_maps_to_too_large() {
        let err = CliError::from(CacheError::CapacityExceeded { size: 10, budget: 4 });
        assert!(matches!(err, CliError::TooLarge { size: 10, budget: 4 }));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("hot.budget_bytes"));
    }

    #[test]
    fn test_storage_names_data_dir() {
        let err = CliError::from(CacheError::StorageUnavailable("blob read timed out".to_string()))
            .in_data_dir(Path::new("/var/lib/cascade"));
        assert_eq!(err.exit_code(), 3);
        let msg = err.to_string();
        assert!(msg.contains("blob read timed out"));
        assert!(msg.contains("/var/lib/cascade"));
    }

    #[test]
    fn test_other_cache_errors_pass_through() {
        let err = CliError::from(CacheError::Conflict("busy".to_string()));
        assert_eq!(err.to_string(), "Conflict: busy");
        assert_eq!(CliError::from(CacheError::Config("bad".to_string())).exit_code(), 2);
        assert_eq!(CliError::usage("nope").exit_code(), 2);

        let id = RecordId::new();
        let err = CliError::from(CacheError::NotFound(id));
        assert_eq!(err.to_string(), format!("Record not found: {id}"));
    }
}
