//! Shared parsing utilities for Grid Engine command output.
//!
//! This crate holds the scheduler-agnostic pieces used by gridsub-sge:
//! subprocess execution, memory-size conversion and timestamp handling.

pub mod command;
pub mod memory;
pub mod time;

pub use command::{CommandError, CommandOutput, CommandRunner, TokioRunner};
pub use memory::{RamUnit, human_to_ram, human_to_ram_int, split_ram_by_slots};
pub use time::{
    from_epoch_millis, from_epoch_secs, hms_to_minutes, minutes_to_seconds, parse_sge_timestamp,
    parse_univa_timestamp,
};

/// Split a `key value` line at the first run of whitespace.
pub fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let idx = line.find(char::is_whitespace)?;
    Some((&line[..idx], line[idx..].trim()))
}

/// Is this string an affirmative answer ("1", "y", "yes", "true", "on")?
pub fn affirmative(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "true" | "on"
    )
}
