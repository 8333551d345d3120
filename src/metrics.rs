//! Local usage statistics, persisted in `~/.ssage_metrics.json`.
//!
//! Recording is best-effort: a failed write never affects the command that
//! produced the sample.

use anyhow::Result;
use chrono::{DateTime, Utc};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandStats {
    pub runs: u64,
    pub failures: u64,
    pub total_time_ms: u64,
    pub avg_time_ms: u64,
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CommandStats {
    /// Percentage of runs that failed, rounded down.
    pub fn failure_rate(&self) -> u64 {
        if self.runs == 0 {
            0
        } else {
            self.failures * 100 / self.runs
        }
    }
}

/// Stats for every command, keyed (and therefore sorted) by command name.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsStore {
    pub commands: BTreeMap<String, CommandStats>,
}

impl MetricsStore {
    pub fn default_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".ssage_metrics.json"))
    }

    /// Loads the store, treating a missing or unreadable file as empty.
    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Folds one run into the stats for `command`.
    pub fn record(&mut self, command: &str, elapsed: Duration, error: Option<&str>, now: DateTime<Utc>) {
        let stats = self.commands.entry(command.to_string()).or_default();
        stats.runs += 1;
        stats.total_time_ms += elapsed.as_millis() as u64;
        stats.avg_time_ms = stats.total_time_ms / stats.runs;
        stats.last_run = Some(now);
        if let Some(error) = error {
            stats.failures += 1;
            stats.last_error = Some(error.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Records a run of `command` in the metrics file at `path`.
pub fn record(path: &Path, command: &str, elapsed: Duration, error: Option<&str>) {
    let mut store = MetricsStore::load_from(path);
    store.record(command, elapsed, error, Utc::now());
    if let Err(e) = store.save_to(path) {
        warn!("Could not save metrics: {}", e);
    }
}
