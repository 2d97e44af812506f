//! Formatted output helpers for CLI commands.
//!
//! Provides table layout, relative ages, port summaries, and the ANSI
//! styles used for status lines on stderr.

use chrono::{DateTime, Utc};
use nebulabox_common::types::{ContainerState, PortMapping};

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const RED: &str = "\x1b[31m";
pub const YELLOW: &str = "\x1b[33m";
pub const RESET: &str = "\x1b[0m";

/// Formats the time since `created` like `"3 minutes ago"`.
#[must_use]
pub fn format_age(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - created).num_seconds().max(0);
    let (value, unit) = match secs {
        0..=1 => return "just now".to_string(),
        2..=59 => (secs, "second"),
        60..=3599 => (secs / 60, "minute"),
        3600..=86_399 => (secs / 3600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{value} {unit}{plural} ago")
}

/// Formats published ports as `"8080->80, 443->443"`.
#[must_use]
pub fn format_ports(ports: &[PortMapping]) -> String {
    ports
        .iter()
        .map(|p| format!("{}->{}", p.host, p.container))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Returns the status color for a state.
#[must_use]
pub const fn state_color(state: ContainerState) -> &'static str {
    match state {
        ContainerState::Running => GREEN,
        ContainerState::Failed => RED,
        ContainerState::Starting | ContainerState::Stopping => YELLOW,
        ContainerState::Created | ContainerState::Stopped | ContainerState::Removed => DIM,
    }
}

/// Lays out rows under headers, each column padded to its widest cell.
#[must_use]
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = headers.iter().map(|h| (*h).to_string()).collect();
    for row in std::iter::once(&header).chain(rows) {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("   ").trim_end());
        out.push('\n');
    }
    out
}

/// Keeps the last `n` lines.
#[must_use]
pub fn tail(lines: Vec<String>, n: Option<usize>) -> Vec<String> {
    match n {
        Some(n) if n < lines.len() => lines[lines.len() - n..].to_vec(),
        _ => lines,
    }
}
