// SPDX-License-Identifier: MIT

//! Centralized environment variable access for the daemon crate.

use std::time::Duration;

/// Number of retries *after* the initial callback POST attempt.
pub fn callback_max_retry() -> u32 {
    std::env::var("ML_GRIDENGINE_CALLBACK_MAX_RETRY").ok().and_then(|s| s.parse().ok()).unwrap_or(3)
}

/// How long the killer waits after SIGINT before escalating to SIGTERM.
pub fn kill_first_wait() -> Duration {
    wait_seconds("ML_GRIDENGINE_KILL_PROGRAM_FIRST_WAIT_SECONDS")
}

/// How long the killer waits after SIGTERM before escalating to SIGKILL.
pub fn kill_second_wait() -> Duration {
    wait_seconds("ML_GRIDENGINE_KILL_PROGRAM_SECOND_WAIT_SECONDS")
}

/// How long the killer waits after SIGKILL before giving up (CANNOT_KILL).
pub fn kill_final_wait() -> Duration {
    wait_seconds("ML_GRIDENGINE_KILL_PROGRAM_FINAL_WAIT_SECONDS")
}

fn wait_seconds(var: &str) -> Duration {
    std::env::var(var).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs).unwrap_or(Duration::from_secs(10))
}
