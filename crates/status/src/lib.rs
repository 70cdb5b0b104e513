// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! gridexec-status: the mutable status record and its atomic file persister
//! (C2). Every mutation is a monotonic transition out of `NOT_STARTED`,
//! persisted to `status.json` before the call returns.

use gridexec_core::{Clock, StatusRecord, StatusState};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status transition {from} -> {to} is not allowed")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("failed to persist status.json: {0}")]
    Io(#[from] io::Error),
}

/// Owns the single status record for this executor instance and its
/// `status.json` persistence.
pub struct StatusStore {
    path: PathBuf,
    record: Mutex<StatusRecord>,
    notify: Notify,
}

impl StatusStore {
    /// Creates a store in `NOT_STARTED` and writes the initial `status.json`.
    pub fn new(path: impl Into<PathBuf>, work_dir: impl Into<String>, executor_port: u16) -> Result<Self, StatusError> {
        let store = Self {
            path: path.into(),
            record: Mutex::new(StatusRecord::not_started(work_dir, executor_port)),
            notify: Notify::new(),
        };
        store.persist()?;
        Ok(store)
    }

    /// A clone of the current record.
    pub fn current(&self) -> StatusRecord {
        self.record.lock().clone()
    }

    /// Waits until the record reaches a terminal status and returns it.
    /// Returns immediately if it already has. Registers interest in the
    /// next transition before re-checking, so a transition landing between
    /// the check and the wait is never missed.
    pub async fn wait_for_terminal(&self) -> StatusRecord {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let current = self.current();
            if current.is_terminal() {
                return current;
            }
            notified.await;
        }
    }

    pub fn set_running(&self, clock: &impl Clock) -> Result<StatusRecord, StatusError> {
        self.transition(StatusState::Running { start_time: clock.epoch_secs() })
    }

    pub fn set_exited(
        &self,
        clock: &impl Clock,
        start_time: f64,
        exit_code: i32,
        work_dir_size: u64,
    ) -> Result<StatusRecord, StatusError> {
        self.transition(StatusState::Exited {
            start_time,
            stop_time: clock.epoch_secs(),
            exit_code,
            work_dir_size,
        })
    }

    pub fn set_signalled(
        &self,
        clock: &impl Clock,
        start_time: f64,
        exit_signal: i32,
        work_dir_size: u64,
    ) -> Result<StatusRecord, StatusError> {
        self.transition(StatusState::Signalled {
            start_time,
            stop_time: clock.epoch_secs(),
            exit_signal,
            work_dir_size,
        })
    }

    pub fn set_cannot_kill(
        &self,
        start_time: f64,
        reason: impl Into<String>,
        work_dir_size: u64,
    ) -> Result<StatusRecord, StatusError> {
        self.transition(StatusState::CannotKill { start_time, reason: reason.into(), work_dir_size })
    }

    fn transition(&self, next: StatusState) -> Result<StatusRecord, StatusError> {
        {
            let mut guard = self.record.lock();
            let allowed = match (&guard.state, &next) {
                (StatusState::NotStarted, StatusState::Running { .. }) => true,
                (StatusState::Running { .. }, next) if next.is_terminal() => true,
                _ => false,
            };
            if !allowed {
                return Err(StatusError::InvalidTransition {
                    from: guard.state.status_name(),
                    to: next.status_name(),
                });
            }
            guard.state = next;
        }
        self.persist()?;
        self.notify.notify_waiters();
        Ok(self.current())
    }

    /// Writes `status.json` atomically: serialize to a sibling `.tmp` file,
    /// then rename over the final path so readers never observe a partial
    /// write.
    fn persist(&self) -> Result<(), StatusError> {
        let record = self.current();
        let body = serde_json::to_vec_pretty(&record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        atomic_write(&self.path, &body)?;
        debug!(status = record.status_name(), "status.json persisted");
        Ok(())
    }
}

fn atomic_write(path: &Path, body: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        warn!(error = %e, path = %path.display(), "status.json rename failed");
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
