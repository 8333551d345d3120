//! Shell history discovery and parsing for `ssage fix`.

use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// No recognised history file exists for this user.
#[derive(Debug)]
pub struct NoHistoryFile {
    pub os: String,
    pub tips: Vec<&'static str>,
}

impl fmt::Display for NoHistoryFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "could not find a shell history file on {}.", self.os)?;
        writeln!(f, "  Possible causes and fixes:")?;
        for tip in &self.tips {
            writeln!(f, "    • {}", tip)?;
        }
        Ok(())
    }
}

impl std::error::Error for NoHistoryFile {}

/// Returns the last `limit` commands from the user's shell history.
pub fn recent_commands(limit: usize) -> Result<Vec<String>> {
    let home = home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    let shell = std::env::var("SHELL").unwrap_or_default();
    let app_data = std::env::var("APPDATA").ok();
    let path = locate_history_file(&home, &shell, app_data.as_deref(), std::env::consts::OS)?;
    debug!("Reading shell history from {}", path.display());
    read_history_file(&path, limit)
}

/// Reads and parses the history file at `path`.
pub fn read_history_file(path: &Path, limit: usize) -> Result<Vec<String>> {
    let bytes = fs::read(path).with_context(|| {
        format!(
            "found history file at '{}' but could not open it\n  Try: check file permissions with 'ls -la {}'",
            path.display(),
            path.display()
        )
    })?;
    // zsh history may contain metafied bytes that are not valid UTF-8.
    Ok(parse_history(&String::from_utf8_lossy(&bytes), limit))
}

/// Extracts commands from history file content, keeping the last `limit`.
///
/// zsh extended-history lines (`: <start>:<elapsed>;<command>`) are reduced
/// to the command and blank lines are dropped.
pub fn parse_history(content: &str, limit: usize) -> Vec<String> {
    let commands: Vec<&str> = content
        .lines()
        .map(|line| {
            if line.starts_with(':') {
                line.split_once(';').map(|(_, command)| command).unwrap_or(line)
            } else {
                line
            }
        })
        .filter(|line| !line.trim().is_empty())
        .collect();

    let start = commands.len().saturating_sub(limit);
    commands[start..].iter().map(|c| c.to_string()).collect()
}

/// Finds the history file for the current platform and shell.
pub fn locate_history_file(home: &Path, shell: &str, app_data: Option<&str>, os: &str) -> Result<PathBuf> {
    if os == "windows" {
        let mut candidates = Vec::new();
        if let Some(app_data) = app_data.filter(|a| !a.is_empty()) {
            candidates.push(
                PathBuf::from(app_data)
                    .join("Microsoft")
                    .join("Windows")
                    .join("PowerShell")
                    .join("PSReadLine")
                    .join("ConsoleHost_history.txt"),
            );
        }
        candidates.push(home.join(".bash_history"));
        candidates.push(home.join(".zsh_history"));

        return candidates.into_iter().find(|p| p.exists()).ok_or_else(|| {
            NoHistoryFile {
                os: "Windows".to_string(),
                tips: vec![
                    "Make sure PowerShell PSReadLine module is installed: Install-Module PSReadLine",
                    "Or install Git for Windows which includes bash history support",
                    "Run a few commands in PowerShell first, history is created after the first session",
                ],
            }
            .into()
        });
    }

    if shell.contains("zsh") {
        return Ok(home.join(".zsh_history"));
    }
    if shell.contains("bash") {
        return Ok(home.join(".bash_history"));
    }

    [".zsh_history", ".bash_history"]
        .iter()
        .map(|name| home.join(name))
        .find(|p| p.exists())
        .ok_or_else(|| {
            NoHistoryFile {
                os: os.to_string(),
                tips: vec![
                    "Set the SHELL environment variable (e.g. export SHELL=/bin/zsh)",
                    "Make sure you have run some commands so the history file is created",
                    "Check ~/.bash_history or ~/.zsh_history exist and are readable",
                ],
            }
            .into()
        })
}
