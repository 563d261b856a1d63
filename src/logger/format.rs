//! Log formatting and output with ANSI colors and text wrapping
//!
//! Console lines are `HH:MM:SS [TAG] [LEVEL] message`, with long messages
//! wrapped under the message column. The file copy is uncolored and carries
//! the full date.

use super::file::write_to_file;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 10;
const LOG_TYPE_WIDTH: usize = 7;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, log_type: &str, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S").to_string();

    let base_line = format!(
        "{} [{}] [{}] ",
        time.dimmed(),
        format_tag(&tag),
        format_log_type(log_type)
    );
    let prefix_width = strip_ansi_codes(&base_line).chars().count();
    let available = MAX_LINE_LENGTH.saturating_sub(prefix_width).max(40);

    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let tag_clean = tag.to_plain_string();

    for (i, chunk) in wrap_text(message, available).iter().enumerate() {
        if i == 0 {
            print_stdout_safe(&format!("{}{}", base_line, chunk));
        } else {
            print_stdout_safe(&format!("{}{}", " ".repeat(prefix_width), chunk));
        }
        write_to_file(&format!(
            "{} [{}] [{}] {}",
            timestamp, tag_clean, log_type, chunk
        ));
    }
}

/// Format a tag with appropriate color
fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => label.bright_yellow().bold(),
        LogTag::Config => label.bright_white().bold(),
        LogTag::Webserver => label.bright_green().bold(),
        LogTag::Hub => label.bright_cyan().bold(),
        LogTag::Connection => label.bright_blue().bold(),
        LogTag::Store => label.bright_magenta().bold(),
        LogTag::Persist => label.bright_purple().bold(),
    }
}

/// Format log type with appropriate color
fn format_log_type(log_type: &str) -> ColoredString {
    let label = format!("{:<width$}", log_type, width = LOG_TYPE_WIDTH);
    match log_type.to_uppercase().as_str() {
        "ERROR" => label.bright_red().bold(),
        "WARNING" => label.bright_yellow().bold(),
        _ => label.white().bold(),
    }
}

/// Print to stdout but ignore broken pipe errors
fn print_stdout_safe(message: &str) {
    let mut out = stdout().lock();
    if let Err(e) = writeln!(out, "{}", message).and_then(|_| out.flush()) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
    }
}

/// Remove ANSI color codes from text
fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_escape = false;

    for ch in text.chars() {
        if ch == '\x1b' {
            in_escape = true;
        } else if in_escape && ch == 'm' {
            in_escape = false;
        } else if !in_escape {
            result.push(ch);
        }
    }
    result
}

/// Wrap text at word boundaries, respecting existing newlines.
/// Words longer than `max_width` are split on character boundaries.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();

    for line in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0;

        for word in line.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();

            while word.len() > max_width {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = word.split_off(max_width);
                result.push(word.into_iter().collect());
                word = rest;
            }

            if current_len > 0 && current_len + 1 + word.len() > max_width {
                result.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current_len += word.len();
            current.extend(word);
        }

        result.push(current);
    }

    result
}
