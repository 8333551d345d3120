//! Terminal output: spinner, response boxes, prompts and the stats table.
//!
//! Rendering functions take their output (and input, for prompts) as
//! parameters so they can be tested against in-memory buffers. The
//! `std`-stream conveniences wrap them.

use crate::metrics::MetricsStore;
use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const BOX_WIDTH: usize = 76;
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SPINNER_INTERVAL: Duration = Duration::from_millis(80);

pub const CYAN: &str = "36";
pub const GREEN: &str = "32";
pub const RED: &str = "31";
pub const ORANGE: &str = "38;5;208";
pub const GOLD: &str = "38;5;220";

fn paint(color: &str, text: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", color, text)
}

fn bold(color: &str, text: &str) -> String {
    format!("\x1b[1;{}m{}\x1b[0m", color, text)
}

/// Animated "working" indicator drawn on stderr by a background task.
///
/// Once [`Spinner::stop`] returns the task never writes again, so the first
/// response token can be printed without interleaving.
pub struct Spinner {
    stopped: Arc<Mutex<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    /// Starts the animation. Must be called from within a tokio runtime.
    pub fn start(label: &str) -> Self {
        let label = label.to_string();
        let stopped = Arc::new(Mutex::new(false));
        let flag = stopped.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SPINNER_INTERVAL);
            for frame in SPINNER_FRAMES.iter().cycle() {
                interval.tick().await;
                let Ok(stopped) = flag.lock() else { return };
                if *stopped {
                    return;
                }
                let mut err = io::stderr();
                let _ = write!(err, "\r{} {}", paint(CYAN, frame), label);
                let _ = err.flush();
            }
        });
        Self {
            stopped,
            handle: Some(handle),
        }
    }

    /// Stops the animation and clears its line. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else { return };
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
            let mut err = io::stderr();
            let _ = write!(err, "\r\x1b[K");
            let _ = err.flush();
        }
        handle.abort();
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Look of a response box.
#[derive(Debug, Clone)]
pub struct BoxStyle {
    pub title: String,
    pub color: &'static str,
    /// Double-line border instead of rounded single lines.
    pub heavy: bool,
}

impl BoxStyle {
    pub fn new(title: &str, color: &'static str) -> Self {
        Self {
            title: title.to_string(),
            color,
            heavy: false,
        }
    }

    pub fn heavy(mut self) -> Self {
        self.heavy = true;
        self
    }

    fn corners(&self) -> (&'static str, &'static str, &'static str, &'static str, &'static str, &'static str) {
        if self.heavy {
            ("╔", "╗", "╚", "╝", "═", "║")
        } else {
            ("╭", "╮", "╰", "╯", "─", "│")
        }
    }
}

/// Streams response tokens into a bordered box.
///
/// The header and top border are drawn lazily with the first token so that
/// nothing appears while the spinner is still running.
pub struct ResponseBox<W: Write> {
    out: W,
    style: BoxStyle,
    opened: bool,
}

impl<W: Write> ResponseBox<W> {
    pub fn new(out: W, style: BoxStyle) -> Self {
        Self {
            out,
            style,
            opened: false,
        }
    }

    /// Whether at least one token has been drawn.
    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.opened
    }

    fn open(&mut self) -> io::Result<()> {
        let (top_left, top_right, _, _, line, side) = self.style.corners();
        writeln!(self.out, "{}", bold(self.style.color, &self.style.title))?;
        writeln!(
            self.out,
            "{}",
            paint(self.style.color, &format!("{}{}{}", top_left, line.repeat(BOX_WIDTH), top_right))
        )?;
        write!(self.out, "{}  ", paint(self.style.color, side))?;
        self.opened = true;
        Ok(())
    }

    /// Draws one token, continuing the left border after every newline.
    pub fn write_token(&mut self, token: &str) -> io::Result<()> {
        if !self.opened {
            self.open()?;
        }
        let (_, _, _, _, _, side) = self.style.corners();
        let continued = format!("\n{}  ", paint(self.style.color, side));
        write!(self.out, "{}", token.replace('\n', &continued))?;
        self.out.flush()
    }

    /// Closes the box after a successful response.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.opened {
            self.open()?;
        }
        let (_, _, bottom_left, bottom_right, line, _) = self.style.corners();
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{}",
            paint(self.style.color, &format!("{}{}{}", bottom_left, line.repeat(BOX_WIDTH), bottom_right))
        )?;
        self.out.flush()
    }

    /// Ends partial output cleanly after a failure.
    pub fn abort(&mut self) -> io::Result<()> {
        if self.opened {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

/// Prints `❌ <error>` including the error's cause chain.
pub fn show_error_with_io<W: Write>(error: &anyhow::Error, output: &mut W) -> Result<()> {
    writeln!(output, "{}", paint(RED, &format!("❌ {:#}", error)))?;
    Ok(())
}

pub fn show_error(error: &anyhow::Error) {
    let _ = show_error_with_io(error, &mut io::stdout());
}

/// Prints a yellow warning line.
pub fn show_warning_with_io<W: Write>(message: &str, output: &mut W) -> Result<()> {
    writeln!(output, "{}", paint(GOLD, &format!("⚠️  {}", message)))?;
    Ok(())
}

/// Asks a yes/no question. Only `y` or `yes` (any case) count as yes; end of
/// input counts as no.
pub fn confirm_with_io<R: BufRead, W: Write>(question: &str, input: &mut R, output: &mut W) -> Result<bool> {
    write!(output, "{} [y/N]: ", question)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Shortens `text` to at most `max_chars` characters, ending with `…` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}

fn command_icon(command: &str) -> &'static str {
    match command {
        "explain" => "⚡",
        "fix" => "🔧",
        "analyze" => "🧠",
        "tip" => "💡",
        _ => "▸",
    }
}

/// Renders the `ssage stats` report.
pub fn show_stats_with_io<W: Write>(store: &MetricsStore, output: &mut W) -> Result<()> {
    if store.is_empty() {
        show_warning_with_io("No stats yet. Run some commands first!", output)?;
        return Ok(());
    }

    let divider = paint("90", &"─".repeat(40));
    writeln!(output, "{}", bold(CYAN, "📊  Shell Sage · Usage Statistics"))?;
    writeln!(output)?;
    writeln!(output, "{}", divider)?;

    for (name, stats) in &store.commands {
        let last_run = stats
            .last_run
            .map(|t| t.format("last run: %b %-d %H:%M").to_string())
            .unwrap_or_default();
        let failure_color = if stats.failures > 0 { RED } else { GREEN };

        writeln!(output)?;
        writeln!(output, "{} {}", bold("97", &format!("{} ssage {}", command_icon(name), name)), paint("90", &last_run))?;
        writeln!(output, "  {:<16}{}", "Runs:", stats.runs)?;
        writeln!(
            output,
            "  {:<16}{}  ({}% failure rate)",
            "Failures:",
            bold(failure_color, &stats.failures.to_string()),
            stats.failure_rate()
        )?;
        writeln!(output, "  {:<16}{}ms", "Avg Duration:", stats.avg_time_ms)?;
        if let Some(error) = &stats.last_error {
            writeln!(output, "  {:<16}{}", "Last Error:", paint(RED, &truncate(error, 60)))?;
        }
        writeln!(output, "{}", divider)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Cursor;

    fn plain(bytes: Vec<u8>) -> String {
        // Strip ANSI color sequences for readable assertions.
        let text = String::from_utf8(bytes).unwrap();
        let mut out = String::new();
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for c in chars.by_ref() {
                    if c == 'm' {
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn test_box_opens_on_first_token_only() {
        let mut response_box = ResponseBox::new(Vec::new(), BoxStyle::new("⚡ EXPLAIN › ls", CYAN));
        assert!(!response_box.is_open());

        response_box.write_token("Lists").unwrap();
        response_box.write_token(" files").unwrap();
        response_box.finish().unwrap();

        let output = plain(response_box.into_inner());
        assert_eq!(output.matches("⚡ EXPLAIN › ls").count(), 1);
        assert!(output.contains("╭"));
        assert!(output.contains("│  Lists files\n"));
        assert!(output.trim_end().ends_with("╯"));
    }

    #[test]
    fn test_box_indents_newlines_inside_tokens() {
        let mut response_box = ResponseBox::new(Vec::new(), BoxStyle::new("T", GREEN));
        response_box.write_token("• one\n• two").unwrap();
        response_box.finish().unwrap();

        let output = plain(response_box.into_inner());
        assert!(output.contains("│  • one\n│  • two"));
    }

    #[test]
    fn test_heavy_box_uses_double_lines() {
        let mut response_box = ResponseBox::new(Vec::new(), BoxStyle::new("🔧 FIX", ORANGE).heavy());
        response_box.write_token("x").unwrap();
        response_box.finish().unwrap();

        let output = plain(response_box.into_inner());
        assert!(output.contains("╔"));
        assert!(output.contains("║  x"));
        assert!(output.contains("╝"));
    }

    #[test]
    fn test_abort_without_tokens_prints_nothing() {
        let mut response_box = ResponseBox::new(Vec::new(), BoxStyle::new("T", GREEN));
        response_box.abort().unwrap();
        assert!(response_box.into_inner().is_empty());
    }

    #[test]
    fn test_confirm_accepts_y_and_yes() {
        for answer in ["y\n", "YES\n", "  Yes  \n"] {
            let mut input = Cursor::new(answer.as_bytes());
            let mut output = Vec::new();
            assert!(confirm_with_io("Continue?", &mut input, &mut output).unwrap());
            assert_eq!(String::from_utf8(output).unwrap(), "Continue? [y/N]: ");
        }
    }

    #[test]
    fn test_confirm_defaults_to_no() {
        for answer in ["\n", "n\n", "yep\n", ""] {
            let mut input = Cursor::new(answer.as_bytes());
            let mut output = Vec::new();
            assert!(!confirm_with_io("Continue?", &mut input, &mut output).unwrap());
        }
    }

    #[test]
    fn test_show_error_includes_cause_chain() {
        let error = anyhow::anyhow!("connection refused").context("failed to send request to Ollama");
        let mut output = Vec::new();

        show_error_with_io(&error, &mut output).unwrap();

        assert_eq!(
            plain(output),
            "❌ failed to send request to Ollama: connection refused\n"
        );
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 60), "short");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }

    #[test]
    fn test_stats_empty_store_warns() {
        let mut output = Vec::new();
        show_stats_with_io(&MetricsStore::default(), &mut output).unwrap();
        assert!(plain(output).contains("No stats yet"));
    }

    #[test]
    fn test_stats_lists_commands_sorted() {
        let mut store = MetricsStore::default();
        store.record("tip", Duration::from_millis(10), None, Utc::now());
        store.record("explain", Duration::from_millis(30), Some(&"x".repeat(100)), Utc::now());
        let mut output = Vec::new();

        show_stats_with_io(&store, &mut output).unwrap();

        let output = plain(output);
        let explain = output.find("⚡ ssage explain").unwrap();
        let tip = output.find("💡 ssage tip").unwrap();
        assert!(explain < tip);
        assert!(output.contains("(100% failure rate)"));
        assert!(output.contains(&format!("{}…", "x".repeat(59))));
    }

    #[tokio::test]
    async fn test_spinner_stop_is_idempotent() {
        let mut spinner = Spinner::start("working");
        tokio::time::sleep(Duration::from_millis(20)).await;
        spinner.stop();
        spinner.stop();
        assert!(*spinner.stopped.lock().unwrap());
    }
}
