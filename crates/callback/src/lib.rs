// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! gridexec-callback: the callback dispatcher (C3). Queues `statusUpdated`
//! and `fileGenerated:<name>` events and POSTs them to the scheduler's
//! webhook one at a time, in enqueue order, retrying transient failures with
//! capped exponential backoff before dropping an event.

use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// An item queued for delivery. `attempts` starts at 0 and is incremented on
/// every POST attempt, including the first.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackEvent {
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub data: Value,
    #[serde(skip)]
    pub attempts: u32,
}

impl CallbackEvent {
    pub fn status_updated(data: Value) -> Self {
        Self { event_type: "statusUpdated".into(), data, attempts: 0 }
    }

    pub fn file_generated(name: &str, data: Value) -> Self {
        Self { event_type: format!("fileGenerated:{name}"), data, attempts: 0 }
    }
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback queue is closed")]
    Closed,
}

/// Base delay before the first retry; doubled (capped) on each subsequent
/// attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Handle used by producers (C2, C4, C6) to enqueue events. Cheap to clone.
#[derive(Clone)]
pub struct CallbackHandle {
    tx: mpsc::UnboundedSender<CallbackEvent>,
}

impl CallbackHandle {
    pub fn enqueue(&self, event: CallbackEvent) -> Result<(), CallbackError> {
        self.tx.send(event).map_err(|_| CallbackError::Closed)
    }
}

/// Spawns the single-worker dispatcher task and returns a handle producers
/// use to enqueue events. The worker drains the queue serially (one event
/// in flight at a time), preserving enqueue order even across retries.
///
/// `max_retry` is the number of retries *after* the initial attempt (total
/// attempts per event is `max_retry + 1`).
pub fn spawn(url: String, token: String, max_retry: u32, client: reqwest::Client) -> (CallbackHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<CallbackEvent>();
    let auth_header = format!("TOKEN {}", base64::engine::general_purpose::STANDARD.encode(token));

    let worker = tokio::spawn(async move {
        while let Some(mut event) = rx.recv().await {
            loop {
                event.attempts += 1;
                match client
                    .post(&url)
                    .header("Authentication", &auth_header)
                    .json(&event)
                    .send()
                    .await
                    .and_then(|resp| resp.error_for_status())
                {
                    Ok(_) => {
                        info!(event_type = %event.event_type, attempts = event.attempts, "callback delivered");
                        break;
                    }
                    Err(err) => {
                        if event.attempts > max_retry {
                            warn!(
                                event_type = %event.event_type,
                                attempts = event.attempts,
                                error = %err,
                                "callback permanently failed, dropping event"
                            );
                            break;
                        }
                        let delay =
                            RETRY_BASE_DELAY.mul_f64(2f64.powi(event.attempts as i32 - 1)).min(RETRY_MAX_DELAY);
                        warn!(
                            event_type = %event.event_type,
                            attempts = event.attempts,
                            error = %err,
                            delay_ms = delay.as_millis(),
                            "callback attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    });

    (CallbackHandle { tx }, worker)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
