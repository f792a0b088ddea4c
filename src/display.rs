//! Colored console output for relay runs.
//!
//! Response text goes to stdout as it arrives; everything else is a tagged
//! status line.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::supervisor::OutputSink;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_len` characters, adding an ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Format tool input for display, truncating long values.
#[must_use]
pub fn format_tool_input(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => truncate(s, 50),
                    other => truncate(&other.to_string(), 50),
                };
                format!("{k}={value}")
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => truncate(&other.to_string(), 80),
    }
}

/// Print the start of a run.
pub fn print_run_start(prompt: &str, resume: Option<&str>) {
    println!(
        "{} {} {}{}",
        timestamp().dimmed(),
        "[RELAY]".blue().bold(),
        truncate(prompt, 80),
        resume
            .map(|id| format!(" (resuming {})", truncate(id, 40)))
            .unwrap_or_default()
            .dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print the end of a successful run.
pub fn print_run_complete(session_id: Option<&str>, attempts: u32) {
    println!();
    println!(
        "{} {} Completed after {} attempt(s) {}",
        timestamp().dimmed(),
        "[DONE]".green().bold(),
        attempts,
        session_id
            .map(|id| format!("session_id={id}"))
            .unwrap_or_default()
            .dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print a fatal error.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}

/// Console sink: text to stdout, diagnostics to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn text(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn tool_use(&mut self, name: &str, input: &serde_json::Value) {
        println!(
            "\n{} {} ({})",
            "[TOOL]".cyan().bold(),
            name.bold(),
            format_tool_input(input).dimmed()
        );
        let _ = io::stdout().flush();
    }

    fn tool_result(&mut self, tool_use_id: &str, is_error: bool) {
        let id = truncate(tool_use_id, 12);
        if is_error {
            println!("{} {} failed", "[RESULT]".red().bold(), id.dimmed());
        } else {
            println!("{} {} ok", "[RESULT]".green().bold(), id.dimmed());
        }
        let _ = io::stdout().flush();
    }

    fn diagnostic(&mut self, chunk: &str) {
        let mut stderr = io::stderr();
        for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
            let _ = writeln!(stderr, "{} {}", "[stderr]".dimmed(), line);
        }
    }
}
