//! Persisted scheduling state
//!
//! The rotation engine is stateless. Whoever triggers it (`wpsr rotate`, `wpsr run`)
//! records each attempt here and uses it to decide when the next rotation is due.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::ScheduleConfig;
use crate::rotation::RotationResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    #[serde(default)]
    pub last_attempt: Option<RotationResult>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
}

impl ScheduleState {
    /// Load state; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at {}, starting fresh", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read state file {:?}", path))
            }
        };

        match serde_json::from_str(&contents) {
            Ok(state) => Ok(state),
            Err(e) => {
                // Rotate if we can't tell when the last one happened
                warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory {:?}", dir))?;

        let json = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary state file in {:?}", dir))?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write state file")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to save state file {:?}", path))?;
        Ok(())
    }

    pub fn record(&mut self, result: &RotationResult) {
        if result.is_success() {
            self.last_success = Some(result.timestamp);
        }
        self.last_attempt = Some(result.clone());
    }

    /// When the next rotation should happen; `None` means right away
    pub fn next_due(&self, config: &ScheduleConfig) -> Option<DateTime<Utc>> {
        let scheduled = self
            .last_success
            .map(|at| offset(at, Duration::try_days(i64::from(config.interval_days))));

        let retry = self
            .last_attempt
            .as_ref()
            .filter(|attempt| !attempt.is_success())
            .map(|attempt| {
                offset(
                    attempt.timestamp,
                    Duration::try_minutes(i64::from(config.retry_minutes)),
                )
            });

        match (scheduled, retry) {
            (Some(scheduled), Some(retry)) => Some(scheduled.max(retry)),
            (scheduled, retry) => scheduled.or(retry),
        }
    }

    pub fn is_due(&self, config: &ScheduleConfig, now: DateTime<Utc>) -> bool {
        self.next_due(config).map_or(true, |due| now >= due)
    }
}

/// `at + delta`, saturating at the end of representable time
fn offset(at: DateTime<Utc>, delta: Option<Duration>) -> DateTime<Utc> {
    delta
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
