//! The AI-backed subcommands: explain, tip, fix and analyze.
//!
//! Each command builds its prompt, streams the answer through the shared
//! [`Pipeline`] into a response box, and records a metrics sample. Terminal
//! I/O is passed in so every command can run against in-memory buffers.

use crate::clipboard::{self, CopyOutcome};
use crate::metrics::{self, MetricsStore};
use crate::pipeline::cache::DiskCache;
use crate::pipeline::enhancer::ContextEnhancer;
use crate::pipeline::retry::Retry;
use crate::pipeline::{Middleware, Pipeline};
use crate::provider::ProviderRegistry;
use crate::ui::{self, BoxStyle, ResponseBox, Spinner, CYAN, GOLD, GREEN, ORANGE};
use anyhow::{Context, Result};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Log files longer than this are truncated unless the user opts in.
pub const MAX_LOG_CHARS: usize = 2000;
pub const HISTORY_LIMIT: usize = 10;
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const TRUNCATION_MARKER: &str = "\n...[truncated]...";

pub fn language_directive(lang: &str) -> String {
    format!(
        "IMPORTANT: You MUST respond ONLY in {}. Do not use any other language.\n",
        lang
    )
}

pub fn explain_prompt(lang: &str, command_line: &str) -> String {
    format!(
        "{}Explain this shell command in max 3 bullet points. Be extremely concise, no intro, no extra text: '{}'",
        language_directive(lang),
        command_line
    )
}

pub fn tip_prompt(lang: &str) -> String {
    format!(
        "{}Give me ONE practical, specific terminal/shell tip that most developers don't know. Be concise, max 3 sentences. No intro text.",
        language_directive(lang)
    )
}

pub fn fix_prompt(lang: &str, commands: &[String]) -> String {
    format!(
        "{}You are a shell expert. Given these recent commands, identify if the last one likely failed and suggest a concise fix in max 3 bullet points. Commands: {}",
        language_directive(lang),
        commands.join(" | ")
    )
}

pub fn analyze_prompt(lang: &str, log: &str) -> String {
    format!(
        "{}You are a sysadmin. Analyze this log and summarize the critical errors in max 4 bullet points, no intro:\n\n{}",
        language_directive(lang),
        log
    )
}

/// Cuts `content` to its first `max_chars` characters plus a marker.
/// Returns `None` when it already fits.
pub fn truncate_log(content: &str, max_chars: usize) -> Option<String> {
    let (cut, _) = content.char_indices().nth(max_chars)?;
    Some(format!("{}{}", &content[..cut], TRUNCATION_MARKER))
}

/// Enhancer, then a 24 hour disk cache that never stores tips, then three
/// attempts at the provider.
pub fn standard_middlewares() -> Vec<Box<dyn Middleware>> {
    vec![
        Box::new(ContextEnhancer::new()),
        Box::new(DiskCache::new(CACHE_TTL, &["tip"])),
        Box::new(Retry::new(3)),
    ]
}

pub fn build_pipeline(registry: &ProviderRegistry, provider: Option<&str>, model: &str) -> Result<Pipeline> {
    let provider = registry.create(provider, model)?;
    info!(provider = provider.name(), "Pipeline ready");
    Ok(Pipeline::new(provider, standard_middlewares()))
}

/// Settings shared by every command in one invocation.
#[derive(Debug, Clone)]
pub struct Options {
    pub lang: String,
    /// Copy successful responses to the clipboard.
    pub copy: bool,
    /// Animate a spinner on stderr while waiting for the first token.
    pub spinner: bool,
    /// Metrics file; `None` disables recording.
    pub metrics_path: Option<PathBuf>,
}

impl Options {
    pub fn new(lang: &str, copy: bool) -> Self {
        Self {
            lang: lang.to_string(),
            copy,
            spinner: true,
            metrics_path: MetricsStore::default_path(),
        }
    }
}

/// What to stream and how to frame it.
struct Job {
    command: &'static str,
    prompt: String,
    waiting: String,
    style: BoxStyle,
}

pub struct Assistant {
    pipeline: Pipeline,
    options: Options,
}

impl Assistant {
    pub fn new(pipeline: Pipeline, options: Options) -> Self {
        Self { pipeline, options }
    }

    pub async fn explain<W: Write + Send>(&self, command_line: &str, out: &mut W) -> Result<()> {
        let start = Instant::now();
        info!(command = %command_line, "Starting 'explain' command");

        let job = Job {
            command: "explain",
            prompt: explain_prompt(&self.options.lang, command_line),
            waiting: "Consulting the AI sage...".to_string(),
            style: BoxStyle::new(&format!("⚡ EXPLAIN › {}", command_line), CYAN),
        };
        let result = self.stream(job, out).await;
        let response = self.conclude("explain", start, result, out)?;

        if self.options.copy {
            self.copy_response(&response, out)?;
        }
        Ok(())
    }

    pub async fn tip<W: Write + Send>(&self, out: &mut W) -> Result<()> {
        let start = Instant::now();
        info!("Starting 'tip' command");

        let job = Job {
            command: "tip",
            prompt: tip_prompt(&self.options.lang),
            waiting: "Fetching a tip from the sage...".to_string(),
            style: BoxStyle::new("💡 TERMINAL TIP", GOLD),
        };
        let result = self.stream(job, out).await;
        self.conclude("tip", start, result, out)?;
        Ok(())
    }

    /// Suggests a fix for the last command in `history`, then offers to copy
    /// it unless `--copy` already asked for that.
    pub async fn fix<R, W>(&self, history: Result<Vec<String>>, input: &mut R, out: &mut W) -> Result<()>
    where
        R: BufRead,
        W: Write + Send,
    {
        let start = Instant::now();
        info!("Starting 'fix' command");

        let commands = match history {
            Ok(commands) => commands,
            Err(e) => return self.conclude("fix", start, Err(e), out),
        };
        if commands.is_empty() {
            ui::show_warning_with_io("No recent commands found in history.", out)?;
            return Ok(());
        }
        info!(commands_found = commands.len(), "Shell history read");

        let job = Job {
            command: "fix",
            prompt: fix_prompt(&self.options.lang, &commands),
            waiting: "Scanning history for errors...".to_string(),
            style: BoxStyle::new("🔧 FIX SUGGESTION", ORANGE).heavy(),
        };
        let result = self.stream(job, out).await;
        let response = self.conclude("fix", start, result, out)?;

        writeln!(out)?;
        if self.options.copy || ui::confirm_with_io("📋 Copy suggestion to clipboard?", input, out)? {
            self.copy_response(&response, out)?;
        }
        Ok(())
    }

    /// Summarizes the log at `path`.
    ///
    /// Logs longer than [`MAX_LOG_CHARS`] are truncated unless `send_full`
    /// is set or the user agrees to send everything.
    pub async fn analyze<R, W>(&self, path: &Path, send_full: bool, input: &mut R, out: &mut W) -> Result<()>
    where
        R: BufRead,
        W: Write + Send,
    {
        let start = Instant::now();
        info!(file = %path.display(), "Starting 'analyze' command");

        let content = match fs::read_to_string(path).context("Error reading file") {
            Ok(content) => content,
            Err(e) => return self.conclude("analyze", start, Err(e), out),
        };
        info!(file_size_chars = content.chars().count(), "Log file read");

        let log = match truncate_log(&content, MAX_LOG_CHARS) {
            None => content,
            Some(_) if send_full => content,
            Some(truncated) => {
                let question = format!(
                    "⚠️  Log file is large ({} chars). Send full content to AI? This may be slow.",
                    content.chars().count()
                );
                if ui::confirm_with_io(&question, input, out)? {
                    info!("User chose to send full log");
                    writeln!(out, "📄 Sending full log to AI...")?;
                    content
                } else {
                    info!(truncated_at = MAX_LOG_CHARS, "Log truncated by user choice");
                    writeln!(out, "📄 Using first {} characters.", MAX_LOG_CHARS)?;
                    truncated
                }
            }
        };

        let job = Job {
            command: "analyze",
            prompt: analyze_prompt(&self.options.lang, &log),
            waiting: format!("Analyzing {}...", path.display()),
            style: BoxStyle::new(&format!("🧠 LOG ANALYSIS › {}", path.display()), GREEN),
        };
        let result = self.stream(job, out).await;
        let response = self.conclude("analyze", start, result, out)?;

        if self.options.copy {
            self.copy_response(&response, out)?;
        }
        Ok(())
    }

    /// Streams `job` into a response box, closing it on success.
    async fn stream<W: Write + Send>(&self, job: Job, out: &mut W) -> Result<String> {
        let mut spinner = self.options.spinner.then(|| Spinner::start(&job.waiting));
        let mut response_box = ResponseBox::new(&mut *out, job.style);

        let result = self
            .pipeline
            .run_stream(&job.prompt, job.command, |token| {
                if let Some(spinner) = spinner.as_mut() {
                    spinner.stop();
                }
                // A closed stdout must not abort the request.
                let _ = response_box.write_token(token);
            })
            .await;

        if let Some(spinner) = spinner.as_mut() {
            spinner.stop();
        }
        match result {
            Ok(response) => {
                response_box.finish()?;
                Ok(response)
            }
            Err(e) => {
                response_box.abort()?;
                Err(e)
            }
        }
    }

    /// Logs and records the outcome of `command`, and shows any error.
    ///
    /// A failure is reported to the user here, so it comes back as
    /// [`CommandFailed`] for the caller to turn into an exit status.
    fn conclude<T, W: Write>(&self, command: &str, start: Instant, result: Result<T>, out: &mut W) -> Result<T> {
        let elapsed = start.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        match result {
            Ok(value) => {
                info!(command, duration_ms, "Command completed");
                self.record(command, elapsed, None);
                Ok(value)
            }
            Err(e) => {
                error!(command, duration_ms, error = %format!("{:#}", e), "Command failed");
                self.record(command, elapsed, Some(&format!("{:#}", e)));
                ui::show_error_with_io(&e, out)?;
                Err(CommandFailed.into())
            }
        }
    }

    fn record(&self, command: &str, elapsed: Duration, error: Option<&str>) {
        if let Some(path) = &self.options.metrics_path {
            metrics::record(path, command, elapsed, error);
        }
    }

    fn copy_response<W: Write>(&self, response: &str, out: &mut W) -> Result<()> {
        match clipboard::copy(response) {
            Ok(CopyOutcome::Clipboard(_)) => writeln!(out, "\n✅ Copied to clipboard!")?,
            Ok(CopyOutcome::File(path)) => {
                writeln!(out, "\n✅ No clipboard tool found, saved to {}", path.display())?
            }
            Err(e) => {
                warn!("Failed to copy to clipboard: {:#}", e);
                ui::show_error_with_io(&e.context("Could not copy"), out)?;
            }
        }
        Ok(())
    }
}

/// A command failed and its error has already been shown.
#[derive(Debug)]
pub struct CommandFailed;

impl std::fmt::Display for CommandFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "command failed")
    }
}

impl std::error::Error for CommandFailed {}
