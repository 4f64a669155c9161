//! Integration tests for the HTTP surface.
//!
//! These tests start a real listener and speak raw HTTP over TCP.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use fota_server::http::auth::Credentials;
use fota_server::{AppState, IngestRequest, ServerConfig};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = TempDir::new().expect("Failed to create temporary firmware directory");
        let mut config = ServerConfig::default();
        config.storage.firmware_dir = dir.path().join("firmware");
        configure(&mut config);

        let state = Arc::new(AppState::new(&config).expect("Failed to initialize AppState"));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to get listener address");

        tokio::spawn(fota_server::http::serve(listener, state.clone()));

        Self {
            addr,
            state,
            _dir: dir,
        }
    }

    fn publish(&self, device_type: &str, version: &str, description: &str, data: &[u8]) {
        self.state
            .ingestor()
            .ingest(
                Cursor::new(data.to_vec()),
                &IngestRequest::new(version, device_type, description, "firmware.bin"),
            )
            .expect("Failed to publish test firmware");
    }

    fn auth_header(&self) -> String {
        format!(
            "Authorization: {}\r\n",
            Credentials::new("admin", "admin").header_value()
        )
    }

    async fn get(&self, path: &str) -> HttpResponse {
        send(self.addr, format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n").as_bytes()).await
    }

    async fn get_authed(&self, path: &str) -> HttpResponse {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: test\r\n{}\r\n", self.auth_header());
        send(self.addr, raw.as_bytes()).await
    }
}

struct HttpResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("Response body should be JSON")
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Send a raw request and read until the server closes the connection.
async fn send(addr: SocketAddr, raw: &[u8]) -> HttpResponse {
    let mut stream = TcpStream::connect(addr)
        .await
        .expect("Failed to connect to test server");
    stream
        .write_all(raw)
        .await
        .expect("Failed to write request to stream");
    stream.flush().await.expect("Failed to flush request");

    let mut out = Vec::new();
    stream
        .read_to_end(&mut out)
        .await
        .expect("Failed to read response");

    let split = out
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("Response should contain a header terminator");
    let head = String::from_utf8_lossy(&out[..split]).into_owned();
    let body = out[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .expect("Response should start with a status line");
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    HttpResponse {
        status,
        headers,
        body,
    }
}

#[tokio::test]
async fn test_device_update_flow() {
    let server = TestServer::start().await;
    let image_a = vec![0xA5u8; 3000];
    let image_b: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();
    server.publish("dev1", "1.0.0", "First", &image_a);
    server.publish("dev1", "1.2.0", "Second", &image_b);

    let latest = server.get_authed("/api/firmware/latest?device_type=dev1").await;
    assert_eq!(latest.status, 200);
    let entry = latest.json();
    assert_eq!(entry["version"], "1.2.0");
    assert_eq!(entry["filename"], "dev1-v1.2.0.bin");
    assert_eq!(entry["size"], 5000);
    assert_eq!(entry["description"], "Second");

    let download = server.get("/download/dev1-v1.2.0.bin").await;
    assert_eq!(download.status, 200);
    assert_eq!(download.header("content-length"), Some("5000"));
    assert_eq!(download.header("content-type"), Some("application/octet-stream"));
    assert_eq!(
        download.header("content-disposition"),
        Some("attachment; filename=\"dev1-v1.2.0.bin\"")
    );
    assert_eq!(download.body, image_b);

    let older = server.get("/download/dev1-v1.0.0.bin").await;
    assert_eq!(older.body, image_a);
}

#[tokio::test]
async fn test_catalog_routes_require_auth() {
    let server = TestServer::start().await;

    for path in ["/", "/api/firmware/list", "/api/firmware/latest?device_type=dev1"] {
        let response = server.get(path).await;
        assert_eq!(response.status, 401, "{path} should require auth");
        assert_eq!(
            response.header("www-authenticate"),
            Some("Basic realm=\"FOTA Server\"")
        );
    }

    let wrong = send(
        server.addr,
        b"GET /api/firmware/list HTTP/1.1\r\nAuthorization: Basic YWRtaW46d3Jvbmc=\r\n\r\n",
    )
    .await;
    assert_eq!(wrong.status, 401);
}

#[tokio::test]
async fn test_list_and_status_page() {
    let server = TestServer::start().await;
    server.publish("dev1", "1.0.0", "First", b"aaaa");
    server.publish("dev2", "0.9", "Other", b"bb");

    let list = server.get_authed("/api/firmware/list").await;
    assert_eq!(list.status, 200);
    let catalog = list.json();
    assert_eq!(catalog["latest_version"], "1.0.0");
    assert_eq!(catalog["firmware_entries"].as_array().unwrap().len(), 2);

    let page = server.get_authed("/").await;
    assert_eq!(page.status, 200);
    assert_eq!(page.header("content-type"), Some("text/html"));
    let html = page.text();
    assert!(html.contains("Latest version: 1.0.0"));
    assert!(html.contains("dev1 v1.0.0 - First (4 bytes)"));
    assert!(html.contains("dev2 v0.9 - Other (2 bytes)"));
}

#[tokio::test]
async fn test_latest_unknown_device() {
    let server = TestServer::start().await;
    server.publish("dev1", "1.0.0", "", b"x");

    let response = server.get_authed("/api/firmware/latest?device_type=dev9").await;
    assert_eq!(response.status, 404);
    assert_eq!(
        response.json()["error"],
        "No firmware found for specified device type"
    );
}

#[tokio::test]
async fn test_metadata_is_public_and_raw() {
    let server = TestServer::start().await;
    server.publish("dev1", "1.0.0", "", b"abcd");

    let response = server.get("/firmware/metadata.json").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/json"));
    let on_disk = std::fs::read(server.state.store().document_path()).unwrap();
    assert_eq!(response.body, on_disk);
    assert_eq!(response.json()["firmware_entries"][0]["checksum"], "a62f1c36");
}

#[tokio::test]
async fn test_corrupt_catalog() {
    let server = TestServer::start().await;
    std::fs::write(server.state.store().document_path(), b"{\"firmware_entries\": [").unwrap();

    let list = server.get_authed("/api/firmware/list").await;
    assert_eq!(list.status, 200);
    assert_eq!(
        list.json(),
        serde_json::json!({ "firmware_entries": [], "latest_version": "0.0.0" })
    );

    let raw = server.get("/firmware/metadata.json").await;
    assert_eq!(raw.body, b"{\"firmware_entries\": [");
}

#[tokio::test]
async fn test_download_failures() {
    let server = TestServer::start().await;
    server.publish("dev1", "1.0.0", "", b"payload");
    std::fs::remove_file(server.state.store().binary_path("dev1-v1.0.0.bin")).unwrap();

    assert_eq!(server.get("/download/dev1-v1.0.0.bin").await.status, 404);
    assert_eq!(server.get("/download/unknown.bin").await.status, 404);
    assert_eq!(server.get("/download/..%2Fmetadata.json").await.status, 404);
    assert_eq!(server.get("/download/").await.status, 404);
}

#[tokio::test]
async fn test_malformed_request_line() {
    let server = TestServer::start().await;
    let response = send(server.addr, b"HELLO\r\n\r\n").await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_configured_malformed_status_and_public_paths() {
    let server = TestServer::start_with(|config| {
        config.malformed_status = 400;
        config.public_paths = vec!["/firmware/metadata.json".to_string()];
    })
    .await;
    server.publish("dev1", "1.0.0", "", b"x");

    assert_eq!(send(server.addr, b"HELLO\r\n\r\n").await.status, 400);
    assert_eq!(server.get("/download/dev1-v1.0.0.bin").await.status, 401);
    assert_eq!(server.get_authed("/download/dev1-v1.0.0.bin").await.status, 200);
    assert_eq!(server.get("/firmware/metadata.json").await.status, 200);
}

#[tokio::test]
async fn test_upload_route() {
    let server = TestServer::start().await;
    let image = b"new firmware image".to_vec();

    let mut raw = format!(
        "POST /api/firmware/upload?device_type=dev1&version=2.0.1&filename=build.hex&description=Hotfix HTTP/1.1\r\n\
         {}Content-Length: {}\r\n\r\n",
        server.auth_header(),
        image.len()
    )
    .into_bytes();
    raw.extend_from_slice(&image);

    let response = send(server.addr, &raw).await;
    assert_eq!(response.status, 200, "{}", response.text());
    let committed = response.json();
    assert_eq!(committed["entry"]["filename"], "dev1-v2.0.1.hex");
    assert_eq!(committed["latest_version"], "2.0.1");

    let download = server.get("/download/dev1-v2.0.1.hex").await;
    assert_eq!(download.body, image);
}

#[tokio::test]
async fn test_upload_rejections() {
    let server = TestServer::start_with(|config| config.max_upload_bytes = 8).await;

    let unauthenticated = send(
        server.addr,
        b"POST /api/firmware/upload?device_type=d&version=1 HTTP/1.1\r\nContent-Length: 1\r\n\r\nx",
    )
    .await;
    assert_eq!(unauthenticated.status, 401);

    let too_large = format!(
        "POST /api/firmware/upload?device_type=d&version=1 HTTP/1.1\r\n{}Content-Length: 9\r\n\r\n",
        server.auth_header()
    );
    assert_eq!(send(server.addr, too_large.as_bytes()).await.status, 413);

    let bad_version = format!(
        "POST /api/firmware/upload?device_type=d&version=v1 HTTP/1.1\r\n{}Content-Length: 1\r\n\r\nx",
        server.auth_header()
    );
    let response = send(server.addr, bad_version.as_bytes()).await;
    assert_eq!(response.status, 400);
    assert!(response.json()["error"].as_str().unwrap().contains("Invalid version"));

    assert!(server.state.store().load().is_empty());
}

#[tokio::test]
async fn test_concurrent_downloads() {
    let server = TestServer::start().await;
    let image: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
    server.publish("dev1", "3.0", "", &image);

    let addr = server.addr;
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            tokio::spawn(async move {
                send(addr, b"GET /download/dev1-v3.0.bin HTTP/1.1\r\n\r\n").await
            })
        })
        .collect();

    for task in tasks {
        let response = task.await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.len(), image.len());
        assert!(response.body == image);
    }
}
