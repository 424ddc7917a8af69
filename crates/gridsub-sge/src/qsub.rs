//! Parse qsub's submission report.

use crate::error::{GridError, GridResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// "Your job 123 ("name") has been submitted" or, for arrays,
/// "Your job-array 123.1-10:1 ("name") has been submitted".
static SUBMITTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Your job(?:-array)? (\d+)(?:\.\S*)? .*has been submitted$")
        .expect("qsub submission regex is valid")
});

/// Extract the job id from qsub's stdout.
pub fn parse_qsub_output(stdout: &str) -> GridResult<u64> {
    stdout
        .lines()
        .map(str::trim)
        .find_map(|line| SUBMITTED.captures(line))
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| GridError::GridOutput(format!("Grid output was {}", stdout)))
}
