// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! gridexec-watch: the generated-file watcher (C6). Polls a fixed registry
//! of filenames inside the work dir and, for every file whose mtime/size
//! has changed since its last emission (a file's first appearance counts as
//! a change), enqueues a `fileGenerated:<name>` callback event with its
//! parsed JSON contents.

use gridexec_callback::{CallbackEvent, CallbackHandle};
use gridexec_core::GENERATED_FILES;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poll cadence (spec §4.6, "≈ 0.5 s").
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(PartialEq, Eq, Clone, Copy)]
struct Seen {
    mtime: Option<SystemTime>,
    size: u64,
}

/// Tracks per-file last-emitted (mtime, size) so repeated polls only fire on
/// an observed change.
pub struct Watcher {
    work_dir: PathBuf,
    last_emitted: HashMap<&'static str, Seen>,
}

impl Watcher {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir, last_emitted: HashMap::new() }
    }

    /// Scans every registered file once, returning the `(name, parsed_json)`
    /// pairs for files that changed since the last scan. Files absent from
    /// disk, or present but not valid JSON, are silently skipped.
    pub fn poll_once(&mut self) -> Vec<(&'static str, serde_json::Value)> {
        let mut events = Vec::new();
        for file in GENERATED_FILES {
            let path = self.work_dir.join(file.filename);
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let seen = Seen { mtime: meta.modified().ok(), size: meta.len() };
            if self.last_emitted.get(file.name) == Some(&seen) {
                continue;
            }
            match fs::read(&path).ok().and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok()) {
                Some(value) => {
                    self.last_emitted.insert(file.name, seen);
                    debug!(name = file.name, "generated file changed");
                    events.push((file.name, value));
                }
                None => {
                    warn!(name = file.name, "generated file present but not valid JSON, skipping");
                }
            }
        }
        events
    }
}

/// Runs the watcher until `cancel` fires, then performs one final poll so
/// files written just before child exit are still reported.
pub async fn run(work_dir: PathBuf, callback: CallbackHandle, cancel: CancellationToken) {
    let mut watcher = Watcher::new(work_dir);
    loop {
        emit(&mut watcher, &callback);
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = cancel.cancelled() => break,
        }
    }
    emit(&mut watcher, &callback);
}

fn emit(watcher: &mut Watcher, callback: &CallbackHandle) {
    for (name, data) in watcher.poll_once() {
        let _ = callback.enqueue(CallbackEvent::file_generated(name, data));
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
