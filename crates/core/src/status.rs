// SPDX-License-Identifier: MIT

//! Status types shared by the status store, HTTP surface, and callback
//! dispatcher.
//!
//! `StatusRecord` is the single source of truth for `status.json`'s shape
//! (spec §6) and for the `data` payload of `statusUpdated` callback events
//! (spec §6). The wire form is a flat JSON object tagged by `status`; the
//! Rust representation keeps per-variant fields out of reach of invalid
//! combinations (e.g. an `EXITED` record can never be missing `exitCode`).

use serde::{Deserialize, Serialize};

/// The full status record, always present, tracked from executor boot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRecord {
    #[serde(flatten)]
    pub state: StatusState,
    #[serde(rename = "workDir")]
    pub work_dir: String,
    #[serde(rename = "executor.port")]
    pub executor_port: u16,
}

impl StatusRecord {
    pub fn not_started(work_dir: impl Into<String>, executor_port: u16) -> Self {
        Self { state: StatusState::NotStarted, work_dir: work_dir.into(), executor_port }
    }

    /// The variant name as it appears on the wire (`NOT_STARTED`, `RUNNING`, …).
    pub fn status_name(&self) -> &'static str {
        self.state.status_name()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Tagged status states, matching spec §3's `status` enum plus its
/// per-variant fields. Internally tagged on `status` so the wire form is a
/// single flat object rather than a nested `{status, data}` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status")]
pub enum StatusState {
    #[serde(rename = "NOT_STARTED")]
    NotStarted,
    #[serde(rename = "RUNNING")]
    Running {
        #[serde(rename = "startTime")]
        start_time: f64,
    },
    #[serde(rename = "EXITED")]
    Exited {
        #[serde(rename = "startTime")]
        start_time: f64,
        #[serde(rename = "stopTime")]
        stop_time: f64,
        #[serde(rename = "exitCode")]
        exit_code: i32,
        #[serde(rename = "workDirSize")]
        work_dir_size: u64,
    },
    #[serde(rename = "SIGNALLED")]
    Signalled {
        #[serde(rename = "startTime")]
        start_time: f64,
        #[serde(rename = "stopTime")]
        stop_time: f64,
        #[serde(rename = "exitSignal")]
        exit_signal: i32,
        #[serde(rename = "workDirSize")]
        work_dir_size: u64,
    },
    #[serde(rename = "CANNOT_KILL")]
    CannotKill {
        #[serde(rename = "startTime")]
        start_time: f64,
        reason: String,
        #[serde(rename = "workDirSize")]
        work_dir_size: u64,
    },
}

impl StatusState {
    pub fn status_name(&self) -> &'static str {
        match self {
            StatusState::NotStarted => "NOT_STARTED",
            StatusState::Running { .. } => "RUNNING",
            StatusState::Exited { .. } => "EXITED",
            StatusState::Signalled { .. } => "SIGNALLED",
            StatusState::CannotKill { .. } => "CANNOT_KILL",
        }
    }

    /// Terminal states are EXITED, SIGNALLED, CANNOT_KILL — no further
    /// transitions occur from them (spec §3 invariant).
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusState::Exited { .. } | StatusState::Signalled { .. } | StatusState::CannotKill { .. })
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
