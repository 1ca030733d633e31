#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use sockchan_core::protocol::{to_payload, FrameReader, FrameWriter, Request, Response, DEFAULT_MAX_FRAME_BYTES};
use sockchan_server::app_state::AppState;
use sockchan_server::config::ServerConfig;
use sockchan_server::Server;

struct Running {
    addr: SocketAddr,
    state: AppState,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

async fn start(cfg: ServerConfig) -> Running {
    let server = Server::bind(cfg).await.unwrap();
    let addr = server.local_addr().unwrap();
    let state = server.state().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .run_until(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    Running { addr, state, stop, task }
}

async fn roundtrip(stream: &mut TcpStream, req: &Request) -> Response {
    let (r, w) = stream.split();
    FrameWriter::new(w, DEFAULT_MAX_FRAME_BYTES).write_frame(req).await.unwrap();
    FrameReader::new(r, DEFAULT_MAX_FRAME_BYTES)
        .read_frame::<Response>()
        .await
        .unwrap()
        .expect("response frame")
}

#[tokio::test]
async fn answers_every_request_kind() {
    let srv = start(ServerConfig::new("127.0.0.1:0")).await;
    let mut stream = TcpStream::connect(srv.addr).await.unwrap();

    let ping = roundtrip(&mut stream, &Request::new("PING", None, 1)).await;
    assert_eq!(ping.result_as::<String>().unwrap(), "PONG");
    assert_eq!(ping.sequence, 1);

    let echo_req = Request::new("echo", Some(to_payload(&serde_json::json!({"k": [1, 2]})).unwrap()), 2);
    let echo = roundtrip(&mut stream, &echo_req).await;
    assert_eq!(echo.id, echo_req.id);
    assert_eq!(echo.result_raw(), echo_req.data.as_ref().map(|d| d.get()));

    let time = roundtrip(&mut stream, &Request::new("TIME", None, 3)).await;
    let t: String = time.result_as().unwrap();
    assert!(t.ends_with(" UTC"), "{t}");
    assert_eq!(t.len(), "2024-01-01 00:00:00 UTC".len());

    let calc_req = Request::new(
        "CALCULATE",
        Some(to_payload(&serde_json::json!({"operation": "MULTIPLY", "a": 4, "b": 2.5})).unwrap()),
        4,
    );
    let calc = roundtrip(&mut stream, &calc_req).await;
    assert_eq!(calc.result_as::<f64>().unwrap(), 10.0);

    let failed = roundtrip(&mut stream, &Request::new("ERROR", None, 5)).await;
    assert!(!failed.success);
    assert_eq!(failed.error.as_deref(), Some("Simulated error for testing"));

    let unknown = roundtrip(&mut stream, &Request::new("UPLOAD", None, 6)).await;
    assert_eq!(unknown.error.as_deref(), Some("Unknown message type: UPLOAD"));

    let metrics = srv.state.metrics();
    assert_eq!(metrics.requests.get(&[("kind", "PING"), ("outcome", "ok")]), 1);
    assert_eq!(metrics.requests.get(&[("kind", "unknown"), ("outcome", "error")]), 1);

    let _ = srv.stop.send(());
    tokio::time::timeout(Duration::from_secs(5), srv.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn garbage_frame_closes_the_connection() {
    let srv = start(ServerConfig::new("127.0.0.1:0")).await;
    let mut stream = TcpStream::connect(srv.addr).await.unwrap();

    stream.write_all(&[5, 0, 0, 0, b'h', b'e', b'l', b'l', b'o']).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0, "server must close after a protocol error");
    assert_eq!(srv.state.metrics().decode_errors.get(&[]), 1);

    // Other clients are unaffected.
    let mut other = TcpStream::connect(srv.addr).await.unwrap();
    let pong = roundtrip(&mut other, &Request::new("PING", None, 1)).await;
    assert!(pong.success);

    let _ = srv.stop.send(());
    tokio::time::timeout(Duration::from_secs(5), srv.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_idle_clients() {
    let srv = start(ServerConfig::new("127.0.0.1:0")).await;
    let mut stream = TcpStream::connect(srv.addr).await.unwrap();
    let _ = roundtrip(&mut stream, &Request::new("PING", None, 1)).await;

    let _ = srv.stop.send(());
    tokio::time::timeout(Duration::from_secs(5), srv.task).await.unwrap().unwrap();

    let mut buf = [0u8; 4];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(srv.state.metrics().active_connections.get(&[]), 0);
}

#[tokio::test]
async fn processing_delay_is_applied() {
    let cfg = ServerConfig::new("127.0.0.1:0").with_processing_delay(Duration::from_millis(100));
    let srv = start(cfg).await;
    let mut stream = TcpStream::connect(srv.addr).await.unwrap();

    let started = std::time::Instant::now();
    let _ = roundtrip(&mut stream, &Request::new("PING", None, 1)).await;
    assert!(started.elapsed() >= Duration::from_millis(100));

    let _ = srv.stop.send(());
}

#[tokio::test]
async fn shutdown_does_not_wait_for_a_request_in_flight() {
    let cfg = ServerConfig::new("127.0.0.1:0").with_processing_delay(Duration::from_secs(60));
    let srv = start(cfg).await;
    let mut stream = TcpStream::connect(srv.addr).await.unwrap();

    let (_, w) = stream.split();
    FrameWriter::new(w, DEFAULT_MAX_FRAME_BYTES)
        .write_frame(&Request::new("PING", None, 1))
        .await
        .unwrap();
    // Let the server pick the request up and start its delay.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    let _ = srv.stop.send(());
    tokio::time::timeout(Duration::from_secs(5), srv.task).await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let mut buf = [0u8; 4];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "connection closed without a response");
    assert_eq!(srv.state.metrics().active_connections.get(&[]), 0);
    assert_eq!(srv.state.metrics().requests.get(&[("kind", "PING"), ("outcome", "ok")]), 0);
}
