use super::*;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

struct MockState {
    hits: AtomicU32,
    fail_until: u32,
    last_auth: tokio::sync::Mutex<Option<String>>,
}

async fn handler(State(state): State<Arc<MockState>>, headers: HeaderMap, body: String) -> axum::http::StatusCode {
    let n = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
    *state.last_auth.lock().await = headers.get("Authentication").map(|v| v.to_str().unwrap().to_string());
    let _ = body;
    if n <= state.fail_until {
        axum::http::StatusCode::INTERNAL_SERVER_ERROR
    } else {
        axum::http::StatusCode::OK
    }
}

async fn spawn_mock(fail_until: u32) -> (String, Arc<MockState>) {
    let state = Arc::new(MockState { hits: AtomicU32::new(0), fail_until, last_auth: tokio::sync::Mutex::new(None) });
    let app = Router::new().route("/callback", post(handler)).with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/callback"), state)
}

#[tokio::test]
async fn delivers_event_with_authentication_header() {
    let (url, state) = spawn_mock(0).await;
    let (handle, worker) = spawn(url, "s3cr3t".into(), 2, reqwest::Client::new());
    handle.enqueue(CallbackEvent::status_updated(serde_json::json!({"status": "RUNNING"}))).unwrap();
    drop(handle);
    worker.await.unwrap();

    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    let expected = format!("TOKEN {}", base64::engine::general_purpose::STANDARD.encode("s3cr3t"));
    assert_eq!(state.last_auth.lock().await.as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn retries_up_to_max_then_drops() {
    let (url, state) = spawn_mock(u32::MAX).await;
    let (handle, worker) = spawn(url, "tok".into(), 1, reqwest::Client::new());
    handle.enqueue(CallbackEvent::status_updated(serde_json::json!({"status": "RUNNING"}))).unwrap();
    drop(handle);
    worker.await.unwrap();

    assert_eq!(state.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn preserves_enqueue_order_across_events() {
    let (url, state) = spawn_mock(0).await;
    let (handle, worker) = spawn(url, "tok".into(), 0, reqwest::Client::new());
    handle.enqueue(CallbackEvent::status_updated(serde_json::json!({"status": "RUNNING"}))).unwrap();
    handle.enqueue(CallbackEvent::file_generated("result", serde_json::json!({"v": 1}))).unwrap();
    handle.enqueue(CallbackEvent::status_updated(serde_json::json!({"status": "EXITED"}))).unwrap();
    drop(handle);
    worker.await.unwrap();

    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
}
