// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! gridexec-http: the long-poll HTTP surface (C7).
//!
//! `GET /output/_poll?begin=&timeout=` streams a chunked response whose
//! first line is the hex-encoded `startOffset`, followed by the raw output
//! bytes — the client reassembles the absolute offset from the hex line
//! rather than from a header, so the response can be streamed without a
//! known `Content-Length`. `POST /_kill` engages the killer and is
//! idempotent. Any other path 404s via axum's router default.

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gridexec_buffer::{PollOutcome, RingBuffer};
use gridexec_core::StatusState;
use gridexec_killer::Killer;
use gridexec_status::StatusStore;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Long-poll reads never block longer than this, regardless of the caller's
/// requested `timeout`.
const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound on bytes returned by a single poll response.
const MAX_POLL_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub buffer: Arc<RingBuffer>,
    pub killer: Arc<Killer>,
    pub exited: watch::Receiver<bool>,
    pub status: Arc<StatusStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/output/_poll", get(poll_output))
        .route("/_kill", post(kill))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let record = state.status.current();
    Json(serde_json::json!({
        "status": "ok",
        "childStatus": record.status_name(),
        "executor.port": record.executor_port,
    }))
}

#[derive(Debug, Deserialize)]
struct PollParams {
    begin: u64,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 {
    MAX_POLL_TIMEOUT.as_secs()
}

async fn poll_output(State(state): State<AppState>, Query(params): Query<PollParams>) -> Response {
    let timeout = Duration::from_secs(params.timeout).min(MAX_POLL_TIMEOUT);
    match state.buffer.read_from(params.begin, MAX_POLL_BYTES, timeout).await {
        PollOutcome::Data { start_offset, bytes } => {
            info!(start_offset, len = bytes.len(), "poll returning data");
            let header_line = Bytes::from(format!("{start_offset:x}\n"));
            let payload = Bytes::from(bytes);
            let stream = futures_util::stream::iter(vec![
                Ok::<Bytes, Infallible>(header_line),
                Ok::<Bytes, Infallible>(payload),
            ]);
            (StatusCode::OK, Body::from_stream(stream)).into_response()
        }
        PollOutcome::TimedOut => StatusCode::NO_CONTENT.into_response(),
        PollOutcome::Closed => StatusCode::GONE.into_response(),
    }
}

/// Engages the killer and waits for the status store to reach whatever
/// terminal state the escalation (or a concurrent natural exit) produced,
/// so the response always carries the real outcome rather than the
/// killer's own binary exited/gave-up result.
async fn kill(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.killer.kill(state.exited.clone()).await;
    let record = state.status.wait_for_terminal().await;
    Json(match record.state {
        StatusState::Exited { exit_code, .. } => serde_json::json!({ "status": "exited", "exitCode": exit_code }),
        StatusState::Signalled { exit_signal, .. } => {
            serde_json::json!({ "status": "signalled", "exitSignal": exit_signal })
        }
        StatusState::CannotKill { .. } => serde_json::json!({ "status": "cannot_kill" }),
        StatusState::NotStarted | StatusState::Running { .. } => {
            unreachable!("wait_for_terminal only returns a terminal status")
        }
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
