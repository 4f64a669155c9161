//! Response framing and body streaming.

use crate::error::ProtocolError;
use serde::Serialize;
use std::fmt::Write as _;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u16);

impl Status {
    /// 200 OK
    pub const OK: Self = Self(200);
    /// 400 Bad Request
    pub const BAD_REQUEST: Self = Self(400);
    /// 401 Unauthorized
    pub const UNAUTHORIZED: Self = Self(401);
    /// 404 Not Found
    pub const NOT_FOUND: Self = Self(404);
    /// 411 Length Required
    pub const LENGTH_REQUIRED: Self = Self(411);
    /// 413 Payload Too Large
    pub const PAYLOAD_TOO_LARGE: Self = Self(413);
    /// 500 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);

    /// Wrap an arbitrary code.
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        Self(code)
    }

    /// Numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }

    /// Reason phrase for the status line.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            411 => "Length Required",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            400..=499 => "Client Error",
            500..=599 => "Server Error",
            _ => "Unknown",
        }
    }
}

/// Response payload.
#[derive(Debug)]
pub enum Body {
    /// In-memory body
    Bytes(Vec<u8>),
    /// File streamed in chunks; `len` is fixed when the headers are built
    File {
        /// Open handle to stream from
        file: File,
        /// Advertised `Content-Length`
        len: u64,
        /// Name used in diagnostics
        name: String,
    },
}

impl Body {
    fn len(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }
}

/// A complete response: status line, headers and body.
#[derive(Debug)]
pub struct Response {
    status: Status,
    headers: Vec<(String, String)>,
    body: Body,
}

impl Response {
    /// Response with a body and content type.
    #[must_use]
    pub fn new(status: Status, content_type: &str, body: Body) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body,
        }
    }

    /// Plain-text response.
    #[must_use]
    pub fn text(status: Status, message: impl Into<String>) -> Self {
        Self::new(status, "text/plain", Body::Bytes(message.into().into_bytes()))
    }

    /// HTML response.
    #[must_use]
    pub fn html(status: Status, html: String) -> Self {
        Self::new(status, "text/html", Body::Bytes(html.into_bytes()))
    }

    /// JSON response from raw document bytes.
    #[must_use]
    pub fn json_bytes(status: Status, bytes: Vec<u8>) -> Self {
        Self::new(status, "application/json", Body::Bytes(bytes))
    }

    /// JSON response serialized from `value`.
    ///
    /// Falls back to a plain-text 500 if serialization fails.
    #[must_use]
    pub fn json<T: Serialize>(status: Status, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => Self::json_bytes(status, bytes),
            Err(e) => {
                tracing::error!("Failed to serialize response: {e}");
                Self::text(Status::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }

    /// `{"error": message}` JSON response.
    #[must_use]
    pub fn json_error(status: Status, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// Binary download sized by the open handle.
    #[must_use]
    pub fn attachment(file: File, len: u64, filename: &str) -> Self {
        Self::new(
            Status::OK,
            "application/octet-stream",
            Body::File {
                file,
                len,
                name: filename.to_string(),
            },
        )
        .with_header(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        )
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Response status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// In-memory body bytes, if this is not a file response.
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Bytes(bytes) => Some(bytes),
            Body::File { .. } => None,
        }
    }

    /// Status line and headers, terminated by the blank line.
    #[must_use]
    pub fn head(&self) -> String {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status.code(), self.status.reason());
        for (name, value) in &self.headers {
            let _ = write!(head, "{name}: {value}\r\n");
        }
        let _ = write!(head, "Content-Length: {}\r\n", self.body.len());
        head.push_str("Connection: close\r\n\r\n");
        head
    }

    /// Write the response, streaming file bodies in `chunk_size` pieces.
    ///
    /// Returns the number of body bytes written.
    pub async fn write_to<W>(self, writer: &mut W, chunk_size: usize) -> Result<u64, ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(self.head().as_bytes()).await?;

        let sent = match self.body {
            Body::Bytes(bytes) => {
                writer.write_all(&bytes).await?;
                bytes.len() as u64
            }
            Body::File {
                mut file,
                len,
                name,
            } => {
                let mut buf = vec![0u8; chunk_size.max(1)];
                let mut sent = 0u64;
                while sent < len {
                    let want = usize::try_from(len - sent).map_or(buf.len(), |r| r.min(buf.len()));
                    let n = file.read(&mut buf[..want]).await?;
                    if n == 0 {
                        writer.flush().await?;
                        return Err(ProtocolError::TruncatedTransfer {
                            filename: name,
                            sent,
                            expected: len,
                        });
                    }
                    writer.write_all(&buf[..n]).await?;
                    sent += n as u64;
                }
                sent
            }
        };

        writer.flush().await?;
        Ok(sent)
    }
}
