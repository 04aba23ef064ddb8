//! Common helpers for formatter implementations.
//!
//! This module contains small helpers that are convenient when implementing
//! nestrun formatters. They are formatter focused and are not meant to be
//! general purpose building blocks for unrelated code.

use std::time::Duration;

pub mod color;

/// Durations below this are not worth annotating on a result line.
pub const SLOW_THRESHOLD: Duration = Duration::from_millis(50);

/// Render a duration the way humans read it.
///
/// `830ms`, `1.5s`, `2m 3.4s`. Sub second values are whole milliseconds,
/// seconds keep one truncated decimal.
pub fn pretty_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        return format!("{ms}ms");
    }

    let minutes = ms / 60_000;
    let tenths = (ms % 60_000) / 100;
    let seconds = match tenths % 10 {
        0 => format!("{}s", tenths / 10),
        rest => format!("{}.{rest}s", tenths / 10),
    };

    match (minutes, tenths) {
        (0, _) => seconds,
        (_, 0) => format!("{minutes}m"),
        _ => format!("{minutes}m {seconds}"),
    }
}

/// The ` (elapsed)` or ` (elapsed / timeout)` annotation, empty when fast.
pub fn duration_annotation(duration: Duration, timeout: Option<Duration>) -> Option<String> {
    if duration < SLOW_THRESHOLD {
        return None;
    }

    Some(match timeout {
        Some(timeout) => format!(
            "({} / {})",
            pretty_duration(duration),
            pretty_duration(timeout)
        ),
        None => format!("({})", pretty_duration(duration)),
    })
}
