//! Error types for the rotation engine
//!
//! Every stage of a rotation returns one of these. The `Display` text is what ends up in
//! the recorded rotation result, so each message names the stage that failed.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::keys::SecretKey;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, RotationError>;

/// What happened to the original file after a failed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStatus {
    /// The original content was copied back from the backup
    Restored,
    /// Copying the backup back failed; the backup is left on disk
    NotRestored { backup_path: PathBuf },
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreStatus::Restored => write!(f, "original content restored from backup"),
            RestoreStatus::NotRestored { backup_path } => write!(
                f,
                "backup NOT restored, it remains at {} for manual recovery",
                backup_path.display()
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum RotationError {
    #[error("Network unavailable: could not initialise HTTP transport: {0}")]
    NetworkUnavailable(String),

    #[error("Failed to fetch salts: {0}")]
    Transport(String),

    #[error("Salt API returned HTTP status {0}")]
    HttpStatus(u16),

    #[error("Salt API response is missing required keys: {}", format_keys(.missing))]
    IncompleteSecretSet { missing: Vec<SecretKey> },

    #[error("Config file not found in any of: {}", format_paths(.candidates))]
    ConfigFileNotFound { candidates: Vec<PathBuf> },

    #[error("Failed to acquire rotation lock {}: {reason}", .path.display())]
    LockFailed { path: PathBuf, reason: String },

    #[error("Failed to read {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create backup {}: {source}", .backup_path.display())]
    BackupFailed {
        backup_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write updated {}: {source}; {restore}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        restore: RestoreStatus,
    },

    #[error("Rotation task did not complete: {0}")]
    TaskFailed(String),
}

fn format_keys(keys: &[SecretKey]) -> String {
    keys.iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(no candidate paths configured)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_write_failed_restored_message() {
        let err = RotationError::WriteFailed {
            path: PathBuf::from("/srv/wp-config.php"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
            restore: RestoreStatus::Restored,
        };
        let msg = err.to_string();
        assert!(msg.contains("/srv/wp-config.php"));
        assert!(msg.contains("disk full"));
        assert!(msg.contains("restored from backup"));
    }

    #[test]
    fn test_write_failed_not_restored_names_backup() {
        let err = RotationError::WriteFailed {
            path: PathBuf::from("/srv/wp-config.php"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
            restore: RestoreStatus::NotRestored {
                backup_path: PathBuf::from("/srv/wp-config.php.bak.20240101-000000"),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("NOT restored"));
        assert!(msg.contains("/srv/wp-config.php.bak.20240101-000000"));
    }

    #[test]
    fn test_incomplete_lists_keys() {
        let err = RotationError::IncompleteSecretSet {
            missing: vec![SecretKey::NonceKey, SecretKey::NonceSalt],
        };
        assert_eq!(
            err.to_string(),
            "Salt API response is missing required keys: NONCE_KEY, NONCE_SALT"
        );
    }

    #[test]
    fn test_not_found_without_candidates() {
        let err = RotationError::ConfigFileNotFound { candidates: vec![] };
        assert!(err.to_string().contains("no candidate paths"));
    }
}
