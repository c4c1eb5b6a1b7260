/// Utility helpers used across the collector.
///
/// IMPORTANT:
/// - No protocol-specific logic should live here.
/// - This module must remain lightweight and deterministic.
///

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use regex::Regex;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9a-zA-Z.\-]+").expect("static regex"));

/// Collapse every run of characters outside `[0-9a-zA-Z.-]` into a single `.`.
///
/// The result is safe to use as a file name and inside log lines.
///
/// Examples:
/// - "EE/GOV/70000310/ss1/host" -> "EE.GOV.70000310.ss1.host"
/// - "a b//c"                   -> "a.b.c"
pub fn normalize_name(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw, ".").into_owned()
}

/// Returns the current Unix timestamp in whole seconds.
///
/// PANIC:
/// - Panics if system time is before UNIX_EPOCH (should never happen).
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before UNIX_EPOCH")
        .as_secs() as i64
}

/// Formats an elapsed duration as `HH:MM:SS` for run summaries.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Escapes the five XML special characters.
pub fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
