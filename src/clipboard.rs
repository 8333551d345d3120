//! Copying responses to the system clipboard through platform tools.

use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Clipboard programs in order of preference, with the arguments that make
/// them read text from stdin.
const CLIPBOARD_TOOLS: [(&str, &[&str]); 5] = [
    ("pbcopy", &[]),
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
    ("clip", &[]),
];

/// Where the response goes when no clipboard tool is installed.
pub const FALLBACK_FILE: &str = ".ssage_last_response.txt";

/// Outcome of a copy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Clipboard(&'static str),
    File(PathBuf),
}

/// Runs clipboard programs. Abstracted so tests never touch the real clipboard.
pub trait ClipboardRunner {
    fn program_exists(&self, program: &str) -> bool;

    /// Spawns `program` and writes `text` to its stdin.
    fn pipe(&self, program: &str, args: &[&str], text: &str) -> Result<()>;
}

pub struct SystemClipboardRunner;

impl ClipboardRunner for SystemClipboardRunner {
    fn program_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn pipe(&self, program: &str, args: &[&str], text: &str) -> Result<()> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(anyhow!("{} exited with {}", program, status));
        }
        Ok(())
    }
}

/// First available clipboard tool.
pub fn find_tool(runner: &impl ClipboardRunner) -> Option<(&'static str, &'static [&'static str])> {
    CLIPBOARD_TOOLS
        .iter()
        .copied()
        .find(|(program, _)| runner.program_exists(program))
}

pub fn copy(text: &str) -> Result<CopyOutcome> {
    let fallback = home_dir()
        .map(|home| home.join(FALLBACK_FILE))
        .ok_or_else(|| anyhow!("could not determine home directory"))?;
    copy_with_runner(text, &SystemClipboardRunner, fallback)
}

/// Copies `text` with the first available tool, or writes it to `fallback`.
pub fn copy_with_runner(text: &str, runner: &impl ClipboardRunner, fallback: PathBuf) -> Result<CopyOutcome> {
    if let Some((program, args)) = find_tool(runner) {
        runner.pipe(program, args, text)?;
        info!(tool = program, "Response copied to clipboard");
        return Ok(CopyOutcome::Clipboard(program));
    }

    warn!("No clipboard tool found, saving response to {}", fallback.display());
    fs::write(&fallback, text)
        .with_context(|| format!("failed to write {}", fallback.display()))?;
    Ok(CopyOutcome::File(fallback))
}
