use super::*;
use gridexec_core::{Clock, FakeClock};
use gridexec_killer::KillTimeouts;
use nix::unistd::Pid;
use tokio::net::TcpListener;

async fn spawn_server(buffer: Arc<RingBuffer>) -> (String, watch::Sender<bool>, Arc<StatusStore>, tempfile::TempDir) {
    let (exited_tx, exited_rx) = watch::channel(false);
    let killer = Arc::new(Killer::new(
        Pid::from_raw(999_999),
        KillTimeouts { first: Duration::from_millis(10), second: Duration::from_millis(10), final_wait: Duration::from_millis(10) },
    ));
    let dir = tempfile::tempdir().unwrap();
    let status = Arc::new(StatusStore::new(dir.path().join("status.json"), "work_dir", 0).unwrap());
    let state = AppState { buffer, killer, exited: exited_rx, status: status.clone() };
    let app = router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), exited_tx, status, dir)
}

#[tokio::test]
async fn health_endpoint_responds_ok() {
    let buffer = Arc::new(RingBuffer::new(1024));
    let (base, _exited_tx, _status, _dir) = spawn_server(buffer).await;
    let resp = reqwest::get(&base).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["childStatus"], "NOT_STARTED");
}

#[tokio::test]
async fn poll_returns_200_with_hex_offset_and_bytes() {
    let buffer = Arc::new(RingBuffer::new(1024));
    buffer.append(b"hello");
    let (base, _exited_tx, _status, _dir) = spawn_server(buffer).await;

    let resp = reqwest::get(format!("{base}/output/_poll?begin=0&timeout=1")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.bytes().await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let mut lines = text.splitn(2, '\n');
    let offset = u64::from_str_radix(lines.next().unwrap(), 16).unwrap();
    assert_eq!(offset, 0);
    assert_eq!(lines.next().unwrap(), "hello");
}

#[tokio::test]
async fn poll_times_out_with_204_when_no_new_data() {
    let buffer = Arc::new(RingBuffer::new(1024));
    buffer.append(b"hello");
    let (base, _exited_tx, _status, _dir) = spawn_server(buffer).await;

    let resp = reqwest::get(format!("{base}/output/_poll?begin=5&timeout=1")).await.unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn poll_returns_410_once_closed_with_no_pending_data() {
    let buffer = Arc::new(RingBuffer::new(1024));
    buffer.append(b"hello");
    buffer.close();
    let (base, _exited_tx, _status, _dir) = spawn_server(buffer).await;

    let resp = reqwest::get(format!("{base}/output/_poll?begin=5&timeout=1")).await.unwrap();
    assert_eq!(resp.status(), 410);
}

#[tokio::test]
async fn kill_is_idempotent_and_reports_the_resolved_terminal_status() {
    let buffer = Arc::new(RingBuffer::new(1024));
    let (base, exited_tx, status, _dir) = spawn_server(buffer).await;

    let clock = FakeClock::default();
    status.set_running(&clock).unwrap();

    let status_task = status.clone();
    let clock_task = clock.clone();
    tokio::spawn(async move {
        // The escalation's own signals target a pid that doesn't exist, so
        // it only resolves once this flips `exited`; the reaper in a real
        // process would set both together after reaping a SIGKILLed child.
        tokio::time::sleep(Duration::from_millis(15)).await;
        let _ = exited_tx.send(true);
        let _ = status_task.set_signalled(&clock_task, clock_task.epoch_secs(), 9, 0);
    });

    let client = reqwest::Client::new();
    let (r1, r2) = tokio::join!(client.post(format!("{base}/_kill")).send(), client.post(format!("{base}/_kill")).send());
    let v1: serde_json::Value = r1.unwrap().json().await.unwrap();
    let v2: serde_json::Value = r2.unwrap().json().await.unwrap();
    assert_eq!(v1["status"], "signalled");
    assert_eq!(v1["exitSignal"], 9);
    assert_eq!(v1, v2);
}
