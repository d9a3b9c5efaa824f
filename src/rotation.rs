use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Result, RotationError};
use crate::keys::SecretKey;
use crate::parser;
use crate::rewriter::{AppliedRotation, ConfigRewriter, RotationPlan};
use crate::sources::{HttpSource, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Record of one rotation attempt, handed to whoever triggered it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationResult {
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaced: Vec<SecretKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inserted: Vec<SecretKey>,
}

impl RotationResult {
    pub fn success(applied: &AppliedRotation) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome: Outcome::Success,
            error: None,
            config_path: Some(applied.config_path.clone()),
            backup_path: Some(applied.backup_path.clone()),
            replaced: applied.replaced.clone(),
            inserted: applied.inserted.clone(),
        }
    }

    pub fn failure(err: &RotationError) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome: Outcome::Failure,
            error: Some(err.to_string()),
            config_path: None,
            backup_path: None,
            replaced: Vec::new(),
            inserted: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Runs fetch, parse and rewrite for one rotation
///
/// Holds no state between runs; scheduling and retries belong to the caller.
pub struct Rotator {
    source: Source,
    rewriter: Arc<ConfigRewriter>,
}

impl Rotator {
    pub fn new(source: Source, rewriter: ConfigRewriter) -> Self {
        Self {
            source,
            rewriter: Arc::new(rewriter),
        }
    }

    /// Build the production rotator: HTTP salt source, configured target file
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = HttpSource::new(&config.source)?;
        Ok(Self::new(
            Box::new(source),
            ConfigRewriter::from_config(&config.target),
        ))
    }

    /// Perform one rotation; never fails, the outcome is in the result
    pub async fn rotate(&self) -> RotationResult {
        match self.try_rotate().await {
            Ok(applied) => {
                info!(
                    "Rotation succeeded: {} replaced, {} inserted, backup at {}",
                    applied.replaced.len(),
                    applied.inserted.len(),
                    applied.backup_path.display()
                );
                RotationResult::success(&applied)
            }
            Err(e) => {
                error!("Rotation failed: {}", e);
                RotationResult::failure(&e)
            }
        }
    }

    /// Fetch and parse, then report what a rotation would change without writing
    pub async fn preview(&self) -> Result<(PathBuf, RotationPlan)> {
        let bundle = self.fetch_bundle().await?;
        self.rewriter.preview(&bundle)
    }

    async fn try_rotate(&self) -> Result<AppliedRotation> {
        let bundle = self.fetch_bundle().await?;

        // Lock waits and disk I/O stay off the async workers
        let rewriter = Arc::clone(&self.rewriter);
        joined(tokio::task::spawn_blocking(move || rewriter.apply(&bundle)).await)
    }

    async fn fetch_bundle(&self) -> Result<parser::SecretBundle> {
        info!("Fetching new salts ({})", self.source.source_type());
        let raw = self.source.fetch().await?;
        parser::parse(&raw)
    }
}

/// A panicked or cancelled file stage is a failed rotation like any other
fn joined<T>(result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    result.unwrap_or_else(|e| Err(RotationError::TaskFailed(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::parser::tests::sample_response;
    use crate::sources::SecretSource;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const OLD_CONFIG: &str = "<?php\n\
define( 'DB_NAME', 'wordpress' );\n\
define('AUTH_KEY', 'o1');\n\
define('SECURE_AUTH_KEY', 'o2');\n\
define('LOGGED_IN_KEY', 'o3');\n\
define('NONCE_KEY', 'o4');\n\
define('AUTH_SALT', 'o5');\n\
define('SECURE_AUTH_SALT', 'o6');\n\
define('LOGGED_IN_SALT', 'o7');\n\
define('NONCE_SALT', 'o8');\n\
$table_prefix = 'wp_';\n\
/* That's all, stop editing! Happy publishing. */\n\
require_once ABSPATH . 'wp-settings.php';\n";

    /// In-memory source; `None` simulates a dropped connection
    struct StaticSource(Option<String>);

    #[async_trait::async_trait]
    impl SecretSource for StaticSource {
        async fn fetch(&self) -> Result<String> {
            self.0
                .clone()
                .ok_or_else(|| RotationError::Transport("connection reset by peer".to_string()))
        }

        fn source_type(&self) -> &'static str {
            "static"
        }
    }

    fn setup() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wp-config.php");
        fs::write(&path, OLD_CONFIG).unwrap();
        (dir, path)
    }

    fn static_rotator(body: Option<String>, path: &Path) -> Rotator {
        Rotator::new(
            Box::new(StaticSource(body)),
            ConfigRewriter::new(vec![path.to_path_buf()]),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_over_http() {
        let (_dir, path) = setup();
        let mut server = mockito::Server::new_async().await;
        let body = "define('AUTH_KEY', 'a');\n\
                    define('SECURE_AUTH_KEY', 'b');\n\
                    define('LOGGED_IN_KEY', 'c');\n\
                    define('NONCE_KEY', 'd');\n\
                    define('AUTH_SALT', 'e');\n\
                    define('SECURE_AUTH_SALT', 'f');\n\
                    define('LOGGED_IN_SALT', 'g');\n\
                    define('NONCE_SALT', 'h');\n";
        let mock = server
            .mock("GET", "/secret-key/1.1/salt/")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let source = HttpSource::new(&SourceConfig {
            url: format!("{}/secret-key/1.1/salt/", server.url()),
            ..SourceConfig::default()
        })
        .unwrap();
        let rotator = Rotator::new(Box::new(source), ConfigRewriter::new(vec![path.clone()]));

        let result = rotator.rotate().await;
        mock.assert_async().await;

        assert_eq!(result.outcome, Outcome::Success, "{:?}", result.error);
        assert!(result.error.is_none());
        assert_eq!(result.config_path.as_ref(), Some(&path));
        assert_eq!(result.replaced.len(), 8);

        let new_lines: Vec<String> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        let old_lines: Vec<&str> = OLD_CONFIG.lines().collect();
        assert_eq!(new_lines.len(), old_lines.len());
        assert_eq!(new_lines[2], "define('AUTH_KEY', 'a');");
        assert_eq!(new_lines[9], "define('NONCE_SALT', 'h');");
        for i in [0, 1, 10, 11, 12] {
            assert_eq!(new_lines[i], old_lines[i]);
        }

        let backup = result.backup_path.unwrap();
        assert_eq!(fs::read_to_string(backup).unwrap(), OLD_CONFIG);
    }

    #[tokio::test]
    async fn test_http_status_failure_leaves_file_alone() {
        let (dir, path) = setup();
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;

        let source = HttpSource::new(&SourceConfig {
            url: format!("{}/", server.url()),
            ..SourceConfig::default()
        })
        .unwrap();
        let rotator = Rotator::new(Box::new(source), ConfigRewriter::new(vec![path.clone()]));

        let result = rotator.rotate().await;
        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.error.unwrap().contains("HTTP status 500"));
        assert_eq!(fs::read_to_string(&path).unwrap(), OLD_CONFIG);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let (_dir, path) = setup();
        let result = static_rotator(None, &path).rotate().await;

        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_incomplete_response_aborts_before_touching_file() {
        let (dir, path) = setup();
        let partial: String = sample_response("n")
            .lines()
            .filter(|l| !l.contains("'NONCE_SALT'"))
            .collect::<Vec<_>>()
            .join("\n");

        let result = static_rotator(Some(partial), &path).rotate().await;

        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.error.unwrap().contains("NONCE_SALT"));
        assert_eq!(fs::read_to_string(&path).unwrap(), OLD_CONFIG);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wp-config.php");

        let result = static_rotator(Some(sample_response("n")), &path)
            .rotate()
            .await;

        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.error.unwrap().contains("Config file not found"));
    }

    #[tokio::test]
    async fn test_preview_does_not_write() {
        let (dir, path) = setup();
        let rotator = static_rotator(Some(sample_response("n")), &path);

        let (resolved, plan) = rotator.preview().await.unwrap();

        assert_eq!(resolved, path);
        assert_eq!(plan.replaced.len(), 8);
        assert_eq!(fs::read_to_string(&path).unwrap(), OLD_CONFIG);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_panicked_file_stage_is_a_failure() {
        let panicked = tokio::task::spawn_blocking(|| -> Result<AppliedRotation> {
            panic!("writer blew up")
        })
        .await;

        let err = joined(panicked).unwrap_err();
        assert!(matches!(err, RotationError::TaskFailed(_)));

        let result = RotationResult::failure(&err);
        assert_eq!(result.outcome, Outcome::Failure);
        assert!(result.error.unwrap().contains("did not complete"));
    }

    #[test]
    fn test_result_json_shape() {
        let failure = RotationResult::failure(&RotationError::HttpStatus(502));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["error"], "Salt API returned HTTP status 502");
        assert!(json.get("backup_path").is_none());
        assert!(json.get("replaced").is_none());

        let parsed: RotationResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, failure);
    }
}
