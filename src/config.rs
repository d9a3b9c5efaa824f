use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SALT_API: &str = "https://api.wordpress.org/secret-key/1.1/salt/";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Where fresh salts come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

/// The wp-config.php being rotated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Tried in order; the first existing path is rewritten
    #[serde(default = "default_candidates")]
    pub candidates: Vec<PathBuf>,
    /// Directory for backups; next to the config file when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_days")]
    pub interval_days: u32,
    /// Wait after a failed attempt before `run` tries again
    #[serde(default = "default_retry_minutes")]
    pub retry_minutes: u32,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_url() -> String {
    DEFAULT_SALT_API.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_timeout() -> u64 {
    20
}

fn default_candidates() -> Vec<PathBuf> {
    candidates_for_root(Path::new("."), None)
}

fn default_lock_timeout() -> u64 {
    30
}

fn default_interval_days() -> u32 {
    30
}

fn default_retry_minutes() -> u32 {
    60
}

fn default_state_file() -> PathBuf {
    PathBuf::from("wpsr-state.json")
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_seconds: default_connect_timeout(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            backup_dir: None,
            lock_timeout_seconds: default_lock_timeout(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_days: default_interval_days(),
            retry_minutes: default_retry_minutes(),
            state_file: default_state_file(),
        }
    }
}

/// Where WordPress keeps wp-config.php: an explicit path first, then the install
/// root, then one level above it
pub fn candidates_for_root(root: &Path, explicit: Option<PathBuf>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = explicit.into_iter().collect();
    candidates.push(root.join("wp-config.php"));
    candidates.push(root.join("..").join("wp-config.php"));
    candidates
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let root = PathBuf::from(get("WP_ROOT").unwrap_or_else(|| ".".to_string()));
        let explicit = get("WP_CONFIG_FILE").map(PathBuf::from);

        let source = SourceConfig {
            url: get("WP_SALTS_API").unwrap_or_else(default_url),
            connect_timeout_seconds: parse_or(&get, "WPSR_CONNECT_TIMEOUT", default_connect_timeout())?,
            timeout_seconds: parse_or(&get, "WPSR_TIMEOUT", default_timeout())?,
        };

        let target = TargetConfig {
            candidates: candidates_for_root(&root, explicit),
            backup_dir: get("WPSR_BACKUP_DIR").map(PathBuf::from),
            lock_timeout_seconds: parse_or(&get, "WPSR_LOCK_TIMEOUT", default_lock_timeout())?,
        };

        let schedule = ScheduleConfig {
            interval_days: parse_or(&get, "WPSR_INTERVAL_DAYS", default_interval_days())?,
            retry_minutes: parse_or(&get, "WPSR_RETRY_MINUTES", default_retry_minutes())?,
            state_file: get("WPSR_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(default_state_file),
        };

        Ok(Self {
            source,
            target,
            schedule,
        })
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let sample = Self {
            source: SourceConfig::default(),
            target: TargetConfig {
                candidates: candidates_for_root(Path::new("/var/www/html"), None),
                backup_dir: Some(PathBuf::from("/var/backups/wordpress")),
                lock_timeout_seconds: default_lock_timeout(),
            },
            schedule: ScheduleConfig {
                state_file: PathBuf::from("/var/lib/wpsr/state.json"),
                ..ScheduleConfig::default()
            },
        };

        let toml_string =
            toml::to_string_pretty(&sample).context("Failed to serialize sample config")?;
        fs::write(path.as_ref(), toml_string)
            .with_context(|| format!("Failed to write sample config to {:?}", path.as_ref()))?;

        Ok(())
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        None => Ok(default),
    }
}
