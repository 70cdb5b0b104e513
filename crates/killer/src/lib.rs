// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! gridexec-killer: the three-phase signal escalation killer (C5).
//!
//! `Killer::kill` is idempotent and re-entrant: concurrent callers share the
//! single in-progress escalation and all observe its eventual outcome. The
//! killer signals the whole process group (`killpg`), never just the leader
//! pid, so a shell child's descendants are caught too.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

/// The three configurable escalation timeouts (spec §6, `ML_GRIDENGINE_KILL_PROGRAM_*`).
#[derive(Debug, Clone, Copy)]
pub struct KillTimeouts {
    pub first: Duration,
    pub second: Duration,
    pub final_wait: Duration,
}

impl Default for KillTimeouts {
    fn default() -> Self {
        Self { first: Duration::from_secs(10), second: Duration::from_secs(10), final_wait: Duration::from_secs(10) }
    }
}

/// Progress through the escalation, observable for diagnostics/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillPhase {
    Idle,
    SentInt,
    SentTerm,
    SentKill,
    Done,
}

/// The terminal outcome of an escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// The child was observed to exit (normally or by signal) during or
    /// before the escalation.
    Exited,
    /// The child is still alive after `SIGKILL` and the final wait elapsed.
    GaveUp { reason: String },
}

enum State {
    NotStarted,
    InProgress(Arc<Notify>),
    Done(KillOutcome),
}

/// Drives the signal escalation for one child's process group.
pub struct Killer {
    pgid: Pid,
    timeouts: KillTimeouts,
    state: Mutex<State>,
    phase: Mutex<KillPhase>,
}

impl Killer {
    pub fn new(pgid: Pid, timeouts: KillTimeouts) -> Self {
        Self { pgid, timeouts, state: Mutex::new(State::NotStarted), phase: Mutex::new(KillPhase::Idle) }
    }

    pub fn phase(&self) -> KillPhase {
        *self.phase.lock()
    }

    /// Runs (or joins) the escalation. `exited` is a watch channel the
    /// supervisor's reaper flips to `true` the instant it reaps the child —
    /// an observed exit at any state jumps immediately to [`KillOutcome::Exited`].
    pub async fn kill(&self, exited: watch::Receiver<bool>) -> KillOutcome {
        loop {
            let notify = {
                let mut state = self.state.lock();
                match &*state {
                    State::Done(outcome) => return outcome.clone(),
                    State::InProgress(notify) => Some(notify.clone()),
                    State::NotStarted => {
                        *state = State::InProgress(Arc::new(Notify::new()));
                        None
                    }
                }
            };
            match notify {
                Some(notify) => {
                    // Register interest before re-checking state, so a
                    // Done transition landing between our first lock and
                    // this await can never be missed (lost wakeup).
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if let State::Done(outcome) = &*self.state.lock() {
                        return outcome.clone();
                    }
                    notified.await;
                }
                None => {
                    let outcome = self.run_escalation(exited).await;
                    let mut state = self.state.lock();
                    let notify = match std::mem::replace(&mut *state, State::Done(outcome.clone())) {
                        State::InProgress(notify) => notify,
                        _ => Arc::new(Notify::new()),
                    };
                    drop(state);
                    notify.notify_waiters();
                    return outcome;
                }
            }
        }
    }

    async fn run_escalation(&self, mut exited: watch::Receiver<bool>) -> KillOutcome {
        if *exited.borrow() {
            *self.phase.lock() = KillPhase::Done;
            return KillOutcome::Exited;
        }

        for (phase, signal, wait) in [
            (KillPhase::SentInt, Signal::SIGINT, self.timeouts.first),
            (KillPhase::SentTerm, Signal::SIGTERM, self.timeouts.second),
            (KillPhase::SentKill, Signal::SIGKILL, self.timeouts.final_wait),
        ] {
            *self.phase.lock() = phase;
            self.send(signal);
            if self.wait_for_exit(&mut exited, wait).await {
                *self.phase.lock() = KillPhase::Done;
                return KillOutcome::Exited;
            }
        }

        *self.phase.lock() = KillPhase::Done;
        KillOutcome::GaveUp { reason: "child still alive after SIGKILL".to_string() }
    }

    fn send(&self, signal: Signal) {
        match killpg(self.pgid, signal) {
            Ok(()) => info!(pgid = self.pgid.as_raw(), ?signal, "signal sent to process group"),
            Err(nix::Error::ESRCH) => warn!(pgid = self.pgid.as_raw(), ?signal, "process group already gone"),
            Err(e) => warn!(pgid = self.pgid.as_raw(), ?signal, error = %e, "failed to signal process group"),
        }
    }

    async fn wait_for_exit(&self, exited: &mut watch::Receiver<bool>, timeout: Duration) -> bool {
        if *exited.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(timeout) => false,
            result = exited.changed() => result.is_ok() && *exited.borrow(),
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
