//! End-to-end link tests: a real ConnectionManager against a scripted fake
//! engine on a local TCP listener.

use std::sync::Arc;
use std::time::Duration;

use engine_link::{ConnectionAction, ConnectionManager, StatusSink, status_sink};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame a JSON message the way the engine does: 2-byte LE length + payload.
fn frame(msg: &Value) -> Vec<u8> {
    let payload = msg.to_string().into_bytes();
    let mut bytes = (payload.len() as u16).to_le_bytes().to_vec();
    bytes.extend_from_slice(&payload);
    bytes
}

/// Bind a fake engine and a manager pointed at it.
async fn engine_and_manager(name: &str, sink: StatusSink) -> (TcpListener, Arc<ConnectionManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let manager = ConnectionManager::new(name, "127.0.0.1", port, sink);
    (listener, manager)
}

async fn accept(listener: &TcpListener) -> TcpStream {
    timeout(TEST_TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for engine connection")
        .expect("accept failed")
        .0
}

/// Read one bare-JSON command off the engine side of the socket.
async fn read_command(stream: &mut TcpStream) -> Value {
    let mut buf = vec![0u8; 4096];
    let n = timeout(TEST_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("timed out reading command")
        .expect("read failed");
    serde_json::from_slice(&buf[..n]).expect("command was not valid JSON")
}

/// Poll an async condition until it holds or the test times out.
async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(TEST_TIMEOUT, async {
        loop {
            if cond().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn connects_and_caches_status() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;

    assert!(manager.attempt_connection().await);
    let mut engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    engine
        .write_all(&frame(&json!({
            "query": { "query": "dynamicstatus" },
            "response": { "result": "ok", "status": { "cpu": 42.567, "neurons": 5 } },
        })))
        .await
        .unwrap();

    wait_until(|| async { manager.status_snapshot().await.get("neurons").is_some() }).await;

    let snapshot = manager.status_snapshot().await;
    assert_eq!(snapshot["connected"], json!(true));
    assert_eq!(snapshot["neurons"], json!(5));
    let history = snapshot["cpuhistory"].as_array().unwrap();
    assert_eq!(history.len(), 200);
    assert_eq!(history.last().unwrap().as_f64().unwrap(), 42.57);
}

#[tokio::test]
async fn double_attempt_is_rejected() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;

    assert!(manager.attempt_connection().await);
    // Second attempt while the first is connecting or connected: no-op.
    assert!(!manager.attempt_connection().await);

    let _engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;
    assert!(!manager.attempt_connection().await);
}

#[tokio::test]
async fn passthrough_round_trip() {
    let (listener, manager) = engine_and_manager("motor", status_sink(16)).await;

    manager.attempt_connection().await;
    let mut engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    let rx = manager
        .send_passthrough(json!({ "command": "step", "count": 10 }))
        .await
        .expect("passthrough should be accepted while connected");

    // The command crosses the wire verbatim, unframed.
    let command = read_command(&mut engine).await;
    assert_eq!(command, json!({ "command": "step", "count": 10 }));

    engine
        .write_all(&frame(&json!({
            "response": { "result": "ok", "stepped": 10 },
        })))
        .await
        .unwrap();

    let reply = timeout(TEST_TIMEOUT, rx)
        .await
        .expect("timed out waiting for reply")
        .expect("slot was dropped");
    assert_eq!(reply, json!({ "result": "ok", "stepped": 10 }));
}

#[tokio::test]
async fn passthrough_while_disconnected_fails_fast() {
    // Grab a port that nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let manager = ConnectionManager::new("ghost", "127.0.0.1", port, status_sink(16));
    let err = manager
        .send_passthrough(json!({ "command": "step" }))
        .await
        .expect_err("must fail while disconnected");

    assert_eq!(err["result"], json!("fail"));
    assert_eq!(err["error"], json!("passthrough fail"));
    assert!(err["errordetail"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn new_passthrough_supersedes_pending_one() {
    let (listener, manager) = engine_and_manager("motor", status_sink(16)).await;

    manager.attempt_connection().await;
    let mut engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    let first = manager
        .send_passthrough(json!({ "command": "first" }))
        .await
        .unwrap();
    let second = manager
        .send_passthrough(json!({ "command": "second" }))
        .await
        .unwrap();

    // Drain whatever command bytes arrived; the engine answers once.
    let mut buf = vec![0u8; 4096];
    let _ = timeout(TEST_TIMEOUT, engine.read(&mut buf)).await.unwrap();
    engine
        .write_all(&frame(&json!({ "response": { "result": "ok" } })))
        .await
        .unwrap();

    // The superseded caller never gets a reply; the latest one does.
    assert!(timeout(TEST_TIMEOUT, first).await.unwrap().is_err());
    let reply = timeout(TEST_TIMEOUT, second).await.unwrap().unwrap();
    assert_eq!(reply, json!({ "result": "ok" }));
}

#[tokio::test]
async fn full_status_poll_round_trip() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;

    manager.attempt_connection().await;
    let mut engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    let rx = manager.request_full_status().await;

    let command = read_command(&mut engine).await;
    assert_eq!(command, json!({ "query": "fullstatus" }));

    engine
        .write_all(&frame(&json!({
            "query": { "query": "fullstatus" },
            "response": { "result": "ok", "status": { "uptime": 12 } },
        })))
        .await
        .unwrap();

    let reply = timeout(TEST_TIMEOUT, rx).await.unwrap().unwrap();
    assert_eq!(reply["result"], json!("ok"));
    assert_eq!(reply["status"]["uptime"], json!(12));
}

#[tokio::test]
async fn transport_failure_keeps_connect_intent() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;

    manager.attempt_connection().await;
    let engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    // Peer drops the socket: the manager marks disconnected but stays
    // eligible for the reconnection driver.
    drop(engine);
    wait_until(|| async { !manager.is_connected().await }).await;
    assert!(manager.wants_reconnect().await);

    let snapshot = manager.status_snapshot().await;
    assert_eq!(snapshot["connected"], json!(false));
}

#[tokio::test]
async fn explicit_disconnect_clears_connect_intent() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;

    manager.attempt_connection().await;
    let _engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    assert_eq!(
        manager.toggle_connection(ConnectionAction::Disconnect).await,
        "Disconnecting"
    );
    assert!(!manager.is_connected().await);
    assert!(!manager.wants_reconnect().await);

    // A second disconnect finds nothing to tear down.
    assert_eq!(
        manager.toggle_connection(ConnectionAction::Disconnect).await,
        "Disconnected"
    );
}

#[tokio::test]
async fn toggle_connect_reports_transition() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;

    assert_eq!(
        manager.toggle_connection(ConnectionAction::Connect).await,
        "Connecting"
    );
    let _engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    assert_eq!(
        manager.toggle_connection(ConnectionAction::Connect).await,
        "Connected"
    );
}

#[tokio::test]
async fn driver_reconnects_after_peer_close() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;
    manager.start();

    let engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    drop(engine);
    wait_until(|| async { !manager.is_connected().await }).await;

    // The 1-second driver brings the link back on its own.
    let _engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    manager.shutdown().await;
}

#[tokio::test]
async fn wait_until_connected_resolves_exactly_once() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager.wait_until_connected().await;
        })
    };

    let _engine = accept(&listener).await;
    timeout(TEST_TIMEOUT, waiter)
        .await
        .expect("waiter timed out")
        .unwrap();

    // Already connected: resolves immediately.
    timeout(Duration::from_millis(200), manager.wait_until_connected())
        .await
        .expect("immediate resolution expected");
}

#[tokio::test]
async fn selected_engine_broadcasts_snapshots() {
    let sink = status_sink(16);
    let mut subscriber = sink.subscribe();
    let (listener, manager) = engine_and_manager("vision", sink).await;

    manager.attempt_connection().await;
    let mut engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    let status = json!({
        "query": { "query": "dynamicstatus" },
        "response": { "result": "ok", "status": { "neurons": 3 } },
    });

    // Not selected: the message lands in the cache but nothing is pushed.
    engine.write_all(&frame(&status)).await.unwrap();
    wait_until(|| async { manager.status_snapshot().await.get("neurons").is_some() }).await;
    assert!(subscriber.try_recv().is_err());

    manager.set_selected(true).await;
    engine.write_all(&frame(&status)).await.unwrap();

    let snapshot = timeout(TEST_TIMEOUT, subscriber.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("sink closed");
    assert_eq!(snapshot["neurons"], json!(3));
    assert_eq!(snapshot["connected"], json!(true));
}

#[tokio::test]
async fn split_frames_reassemble_across_reads() {
    let (listener, manager) = engine_and_manager("vision", status_sink(16)).await;

    manager.attempt_connection().await;
    let mut engine = accept(&listener).await;
    wait_until(|| manager.is_connected()).await;

    let bytes = frame(&json!({
        "query": { "query": "dynamicstatus" },
        "response": { "result": "ok", "status": { "neurons": 9 } },
    }));

    // Dribble the frame out in three writes, splitting inside the header.
    engine.write_all(&bytes[..1]).await.unwrap();
    engine.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.write_all(&bytes[1..7]).await.unwrap();
    engine.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.write_all(&bytes[7..]).await.unwrap();

    wait_until(|| async { manager.status_snapshot().await.get("neurons").is_some() }).await;
    assert_eq!(manager.status_snapshot().await["neurons"], json!(9));
}
