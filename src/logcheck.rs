//! Post-run scan of the captured agent log for error-level messages.
//!
//! The scan is advisory: findings are surfaced as warnings in the run summary
//! and never change the exit status, since pass/fail belongs to the verifier.

use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;

const TIMESTAMP: &str = r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d+Z";

/// One agent log message: the timestamped line plus any continuation lines
/// (multi-line messages, tracebacks) that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// The timestamped line itself
    pub line: String,
    /// Untimestamped lines attached to this message
    pub continuation: Vec<String>,
}

/// Group raw log content into messages. A line starting with the agent's
/// timestamp preamble opens a message; anything else continues the previous
/// one. An incomplete trailing line (no newline) is dropped, and anything
/// before the first timestamped line is ignored.
pub fn group_messages(content: &str) -> Vec<LogMessage> {
    let starts_message = Regex::new(&format!("^{} ", TIMESTAMP)).unwrap();

    let mut lines: Vec<&str> = content.split_inclusive('\n').collect();
    if let Some(last) = lines.last() {
        if !last.ends_with('\n') {
            lines.pop();
        }
    }

    let mut messages: Vec<LogMessage> = Vec::new();
    for raw in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if starts_message.is_match(line) {
            messages.push(LogMessage {
                line: line.to_string(),
                continuation: Vec::new(),
            });
        } else if let Some(current) = messages.last_mut() {
            current.continuation.push(line.to_string());
        }
    }
    messages
}

/// Scan agent log content for ERROR/CRITICAL messages, skipping known-benign
/// transient failures. Returns the offending messages with their tracebacks
/// flattened into one string each.
pub fn find_errors(content: &str) -> Vec<String> {
    let error_line = Regex::new(&format!("^{} (ERROR|CRITICAL) ", TIMESTAMP)).unwrap();

    group_messages(content)
        .into_iter()
        .filter(|message| error_line.is_match(&message.line))
        .filter(|message| !is_transient_resolution_failure(message))
        .map(|message| {
            let mut whole = message.line;
            for extra in message.continuation {
                whole.push('\n');
                whole.push_str(&extra);
            }
            whole
        })
        .collect()
}

// CI workers occasionally lose DNS for a beat; the agent retries and
// recovers, so these connect errors are noise.
fn is_transient_resolution_failure(message: &LogMessage) -> bool {
    if !(message.line.contains("Failed to connect to") && message.line.contains("errno=-3")) {
        return false;
    }
    message.continuation.iter().any(|line| {
        line.contains("Try again") || line.contains("Temporary failure in name resolution")
    })
}

/// Scan a captured agent log file for errors.
pub fn scan_file(path: &Path) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(find_errors(&content))
}
