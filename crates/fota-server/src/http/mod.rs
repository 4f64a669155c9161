//! HTTP/1.x firmware server.
//!
//! One request per connection: the head is read under a timeout, the request
//! is authorized and routed, the response is written and the connection is
//! closed.

use crate::error::{ProtocolError, ServerError};
use crate::server::AppState;
use bytes::Bytes;
use handlers::AppError;
use request::{Request, head_end};
use response::{Response, Status};
use router::Route;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::{Duration, timeout};

pub mod auth;
pub mod handlers;
pub mod request;
pub mod response;
pub mod router;

/// Upper bound on the request head.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Interim response for `Expect: 100-continue`.
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Per-connection protocol settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOptions {
    /// Chunk size for streaming file bodies
    pub chunk_size: usize,
    /// Status sent when the request line cannot be parsed
    pub malformed_status: Status,
    /// Largest accepted upload body
    pub max_upload_bytes: u64,
    /// Time allowed for the client to send the request head
    pub header_timeout: Duration,
}

/// Bind `bind_addr` and serve until the task is cancelled.
///
/// # Errors
///
/// Returns `ServerError` if the listener cannot be bound.
pub async fn start_server(bind_addr: SocketAddr, state: Arc<AppState>) -> Result<(), ServerError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|source| ServerError::BindFailed {
            addr: bind_addr,
            source,
        })?;

    tracing::info!("HTTP server listening on {bind_addr}");
    serve(listener, state).await;
    Ok(())
}

/// Accept connections on `listener`, one task per connection.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    state.indicator().on();
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {e}");
                continue;
            }
        };

        tracing::debug!("Accepted connection from {addr}");
        state.indicator().toggle();

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, &state).await {
                tracing::warn!("Connection from {addr} failed: {e}");
            }
            state.indicator().on();
        });
    }
}

/// Serve a single request on `stream` and close it.
///
/// # Errors
///
/// Returns `ProtocolError` if the head times out, the socket fails, or a file
/// body ends before its advertised length.
pub async fn handle_connection<S>(mut stream: S, state: &AppState) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let options = *state.options();

    let Ok(head) = timeout(options.header_timeout, read_head(&mut stream)).await else {
        return Err(ProtocolError::Timeout {
            seconds: options.header_timeout.as_secs(),
        });
    };
    let (head, leftover) = match head {
        Ok(read) => read,
        Err(e @ ProtocolError::HeadTooLarge { .. }) => {
            let response = Response::text(Status::BAD_REQUEST, "Request head too large");
            let _ = response.write_to(&mut stream, options.chunk_size).await;
            let _ = stream.shutdown().await;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    if head.is_empty() {
        tracing::debug!("Connection closed before a request was sent");
        return Ok(());
    }

    let response = match Request::parse(&head) {
        Some(request) => {
            tracing::info!("Request: {} {}", request.method, request.path);
            respond(&mut stream, &request, leftover, state).await
        }
        None => {
            tracing::warn!("Malformed request line, answering {}", options.malformed_status.code());
            Response::text(options.malformed_status, "Malformed request")
        }
    };

    let status = response.status();
    let result = response.write_to(&mut stream, options.chunk_size).await;
    let _ = stream.shutdown().await;

    match result {
        Ok(sent) => {
            tracing::debug!("Answered {} with {sent} body bytes", status.code());
            Ok(())
        }
        Err(e) => {
            if matches!(e, ProtocolError::TruncatedTransfer { .. }) {
                tracing::warn!(integrity = true, "{e}");
            }
            Err(e)
        }
    }
}

async fn respond<S>(stream: &mut S, request: &Request, leftover: Vec<u8>, state: &AppState) -> Response
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let auth = state.auth();
    if !auth.permits(&request.path, request.header("authorization")) {
        tracing::info!("Rejected unauthenticated request for {}", request.path);
        return Response::text(Status::UNAUTHORIZED, "Authentication required")
            .with_header("WWW-Authenticate", auth.challenge());
    }

    let result = match router::route(&request.method, &request.path) {
        Route::StatusPage => handlers::status_page(state).await,
        Route::List => handlers::list(state).await,
        Route::Latest => handlers::latest(state, request).await,
        Route::Metadata => handlers::metadata(state).await,
        Route::Download(filename) => handlers::download(state, &filename).await,
        Route::Upload => {
            match read_body(stream, request, leftover, state.options().max_upload_bytes).await {
                Ok(body) => handlers::upload(state, request, body).await,
                Err(e) => Err(e),
            }
        }
        Route::NotFound => Err(AppError::NotFound("Endpoint not found".to_string())),
    };

    result.unwrap_or_else(AppError::into_response)
}

/// Read until the blank line ending the head, returning the head and any
/// bytes received past it.
async fn read_head<S>(stream: &mut S) -> Result<(Vec<u8>, Vec<u8>), ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = head_end(&buf) {
            let rest = buf.split_off(end);
            return Ok((buf, rest));
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(ProtocolError::HeadTooLarge {
                limit: MAX_HEAD_BYTES,
            });
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok((buf, Vec::new()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read a `Content-Length` delimited body.
///
/// A client that sent `Expect: 100-continue` is told to go ahead once the
/// request has passed auth and the length checks.
async fn read_body<S>(
    stream: &mut S,
    request: &Request,
    mut leftover: Vec<u8>,
    limit: u64,
) -> Result<Bytes, AppError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let len = request.content_length().ok_or(AppError::LengthRequired)?;
    if len > limit {
        return Err(AppError::PayloadTooLarge(limit));
    }
    let len = usize::try_from(len).map_err(|_| AppError::PayloadTooLarge(limit))?;

    let expects_continue = request
        .header("expect")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("100-continue"));
    if expects_continue && leftover.len() < len {
        stream.write_all(CONTINUE).await?;
        stream.flush().await?;
    }

    leftover.truncate(len);
    let mut body = leftover;
    body.reserve(len - body.len());
    let remaining = (len - body.len()) as u64;
    (&mut *stream).take(remaining).read_to_end(&mut body).await?;

    if body.len() < len {
        return Err(AppError::BadRequest(format!(
            "Body ended after {} of {len} bytes",
            body.len()
        )));
    }
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use tempfile::TempDir;
    use tokio::io::duplex;

    fn create_test_state() -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.storage.firmware_dir = dir.path().join("firmware");
        config.header_timeout_secs = 1;
        (dir, AppState::new(&config).unwrap())
    }

    async fn exchange(state: &AppState, raw: &[u8]) -> String {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(raw).await.unwrap();
        handle_connection(server, state).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn test_unknown_route_requires_auth_first() {
        let (_dir, state) = create_test_state();
        let response = exchange(&state, b"GET /nope HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(response.contains("WWW-Authenticate: Basic realm=\"FOTA Server\""));
    }

    #[tokio::test]
    async fn test_unknown_route_with_auth() {
        let (_dir, state) = create_test_state();
        let raw = format!(
            "GET /nope HTTP/1.1\r\nAuthorization: {}\r\n\r\n",
            state.auth().credentials().header_value()
        );
        let response = exchange(&state, raw.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.ends_with("Endpoint not found"));
    }

    #[tokio::test]
    async fn test_malformed_request_line() {
        let (_dir, state) = create_test_state();
        let response = exchange(&state, b"GARBAGE\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn test_public_metadata_without_auth() {
        let (_dir, state) = create_test_state();
        let response = exchange(&state, b"GET /firmware/metadata.json HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("\"latest_version\""));
    }

    #[tokio::test]
    async fn test_upload_without_length() {
        let (_dir, state) = create_test_state();
        let raw = format!(
            "POST /api/firmware/upload?device_type=d&version=1 HTTP/1.1\r\nAuthorization: {}\r\n\r\n",
            state.auth().credentials().header_value()
        );
        let response = exchange(&state, raw.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 411 Length Required\r\n"));
    }

    #[tokio::test]
    async fn test_upload_body_split_across_reads() {
        let (_dir, state) = create_test_state();
        let raw = format!(
            "POST /api/firmware/upload?device_type=d&version=1.0 HTTP/1.1\r\n\
             Authorization: {}\r\nContent-Length: 11\r\n\r\nhello world",
            state.auth().credentials().header_value()
        );
        let response = exchange(&state, raw.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        let entry = state.store().load().find_latest("d").cloned().unwrap();
        assert_eq!(entry.size, 11);
        assert_eq!(
            std::fs::read(state.store().binary_path(&entry.filename)).unwrap(),
            b"hello world"
        );
    }

    #[tokio::test]
    async fn test_upload_expect_continue() {
        let (_dir, state) = create_test_state();
        let (mut client, server) = duplex(64 * 1024);
        let head = format!(
            "POST /api/firmware/upload?device_type=d&version=2.0 HTTP/1.1\r\n\
             Authorization: {}\r\nContent-Length: 5\r\nExpect: 100-continue\r\n\r\n",
            state.auth().credentials().header_value()
        );

        let client_side = async {
            client.write_all(head.as_bytes()).await.unwrap();
            let mut interim = vec![0u8; CONTINUE.len()];
            client.read_exact(&mut interim).await.unwrap();
            assert_eq!(interim, CONTINUE);

            client.write_all(b"hello").await.unwrap();
            let mut out = Vec::new();
            client.read_to_end(&mut out).await.unwrap();
            String::from_utf8_lossy(&out).into_owned()
        };
        let (served, response) = tokio::join!(handle_connection(server, &state), client_side);

        served.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert_eq!(state.store().load().find_latest("d").unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_rejected_upload_skips_continue() {
        let (_dir, state) = create_test_state();
        let raw = format!(
            "POST /api/firmware/upload?device_type=d&version=2.0 HTTP/1.1\r\n\
             Authorization: {}\r\nContent-Length: 999999999999\r\nExpect: 100-continue\r\n\r\n",
            state.auth().credentials().header_value()
        );
        let response = exchange(&state, raw.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 413 "), "{response}");
    }

    #[tokio::test]
    async fn test_head_timeout() {
        let (_dir, state) = create_test_state();
        let (_client, server) = duplex(1024);
        let err = handle_connection(server, &state).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { seconds: 1 }));
    }

    #[tokio::test]
    async fn test_oversized_head_rejected() {
        let (_dir, state) = create_test_state();
        let (mut client, server) = duplex(64 * 1024);
        let mut raw = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
        raw.extend(std::iter::repeat_n(b'a', MAX_HEAD_BYTES));
        client.write_all(&raw).await.unwrap();

        let err = handle_connection(server, &state).await.unwrap_err();
        assert!(matches!(err, ProtocolError::HeadTooLarge { .. }));
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn test_closed_before_request() {
        let (_dir, state) = create_test_state();
        let (client, server) = duplex(1024);
        drop(client);
        handle_connection(server, &state).await.unwrap();
    }
}
