use chatstorm::voice::{BrowserRecognizer, SpeechRecognizer};
use chatstorm::web::serve_listener;
use chatstorm::{ChatApp, SimConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::assert_ok;

async fn start_server(emote_dir: Option<std::path::PathBuf>) -> (Arc<ChatApp>, SocketAddr) {
    let config = SimConfig::builtin().unwrap();
    let app = Arc::new(ChatApp::new(&config, Some(3), |link| {
        Box::new(BrowserRecognizer::new(link)) as Box<dyn SpeechRecognizer>
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_listener(listener, app.clone(), emote_dir));
    (app, addr)
}

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

fn post(path: &str, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

/// Read from an open event stream until `needle` shows up.
async fn read_until(stream: &mut TcpStream, buf: &mut String, needle: &str) {
    let mut chunk = [0u8; 4096];
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !buf.contains(needle) {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "stream closed before {needle:?}");
            buf.push_str(&String::from_utf8_lossy(&chunk[..n]));
        }
    })
    .await;
    assert_ok!(waited, "timed out waiting for {needle:?}");
}

#[tokio::test]
async fn test_index_page_served() {
    let (_app, addr) = start_server(None).await;
    let resp = send(addr, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 200 OK"));
    assert!(resp.contains("Content-Type: text/html"));
    assert!(resp.contains("id=\"chattext\""));
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let (_app, addr) = start_server(None).await;
    let resp = send(addr, "GET /admin HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 404"));
}

#[tokio::test]
async fn test_chat_post_then_state() {
    let (_app, addr) = start_server(None).await;
    let resp = send(addr, &post("/chat", "text=hello+%5BKappa%5D")).await;
    assert!(resp.starts_with("HTTP/1.1 200"));
    assert!(resp.ends_with("{\"posted\":true}"));

    let state = send(addr, "GET /state HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    let body = state.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["entries"].as_array().unwrap().len(), 1);
    assert_eq!(json["entries"][0]["source"], "manual");
    assert_eq!(json["spam"]["category"], "laughing");
}

#[tokio::test]
async fn test_bad_speed_is_400() {
    let (app, addr) = start_server(None).await;
    let resp = send(addr, &post("/speed?value=-1", "")).await;
    assert!(resp.starts_with("HTTP/1.1 400"));
    assert_eq!(app.spam_config().speed, 50);
}

#[tokio::test]
async fn test_malformed_request_is_400() {
    let (_app, addr) = start_server(None).await;
    let resp = send(addr, "\x00\x01garbage\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn test_event_stream_snapshot_then_updates() {
    let (app, addr) = start_server(None).await;
    app.submit_text("already here");

    let mut events = TcpStream::connect(addr).await.unwrap();
    events
        .write_all(b"GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = String::new();
    read_until(&mut events, &mut buf, "\"type\":\"snapshot\"").await;
    assert!(buf.starts_with("HTTP/1.1 200 OK"));
    assert!(buf.contains("text/event-stream"));
    assert!(buf.contains("already here"));

    send(addr, &post("/chat", "text=live+message")).await;
    read_until(&mut events, &mut buf, "live message").await;
    assert!(buf.contains("\"type\":\"append\""));

    send(addr, &post("/category?name=jams", "")).await;
    read_until(&mut events, &mut buf, "\"category\":\"jams\"").await;

    send(addr, &post("/clear", "")).await;
    read_until(&mut events, &mut buf, "\"type\":\"clear\"").await;
}

#[tokio::test]
async fn test_recording_toggle_relays_to_page() {
    let (app, addr) = start_server(None).await;

    // nobody listening: the page-hosted recognizer cannot start
    let resp = send(addr, &post("/recording/toggle", "")).await;
    assert!(resp.starts_with("HTTP/1.1 503"));

    let mut events = TcpStream::connect(addr).await.unwrap();
    events
        .write_all(b"GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = String::new();
    read_until(&mut events, &mut buf, "\"type\":\"snapshot\"").await;

    let resp = send(addr, &post("/recording/toggle", "")).await;
    assert!(resp.ends_with("{\"recording\":true}"));
    read_until(&mut events, &mut buf, "\"command\":\"start\"").await;

    // the page reports back
    send(addr, &post("/voice/start", "")).await;
    send(addr, &post("/voice/result", "text=play+a+banger")).await;
    read_until(&mut events, &mut buf, "\"category\":\"jams\"").await;
    assert!(app.snapshot().voice.recording);
}

#[tokio::test]
async fn test_emote_files_served_from_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("catJAM.gif"), b"GIF89a").unwrap();
    let (_app, addr) = start_server(Some(dir.path().to_path_buf())).await;

    let resp = send(addr, "GET /emotes/catJAM.gif HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 200"));
    assert!(resp.contains("Content-Type: image/gif"));
    assert!(resp.ends_with("GIF89a"));

    let resp = send(addr, "GET /emotes/..%2Fsecret HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 400"));
}
