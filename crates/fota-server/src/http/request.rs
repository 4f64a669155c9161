//! Request head parsing.
//!
//! Parsing is tolerant: only a request line with fewer than three tokens is
//! rejected. Header lines without a colon are skipped.

use std::collections::HashMap;

/// A parsed request head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Request method, as sent (`GET`, `POST`, ...)
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Protocol token from the request line (`HTTP/1.1`)
    pub version: String,
    /// Headers keyed by lowercase name
    pub headers: HashMap<String, String>,
    /// Decoded query parameters; the last occurrence of a key wins
    pub query: HashMap<String, String>,
}

impl Request {
    /// Parse a request head (request line plus headers).
    ///
    /// Returns `None` if the request line is missing or malformed.
    #[must_use]
    pub fn parse(head: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

        let mut parts = lines.next()?.split_whitespace();
        let (method, target, version) = (parts.next()?, parts.next()?, parts.next()?);

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
                None => tracing::debug!("Skipping malformed header line: {line:?}"),
            }
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query_string)) => (path, parse_query(query_string)),
            None => (target, HashMap::new()),
        };

        Some(Self {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers,
            query,
        })
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Query parameter by exact name.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Parsed `Content-Length`, if present and numeric.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.parse().ok()
    }
}

fn parse_query(query_string: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query_string.as_bytes())
        .into_owned()
        .collect()
}

/// Offset just past the blank line ending the head, if present.
#[must_use]
pub fn head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_with_query() {
        let head = b"GET /api/firmware/latest?device_type=dev1&x=1 HTTP/1.1\r\n\
            Host: fota.local\r\n\
            Authorization: Basic YWRtaW46YWRtaW4=\r\n\r\n";
        let request = Request::parse(head).unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/api/firmware/latest");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(request.query_param("device_type"), Some("dev1"));
        assert_eq!(request.header("AUTHORIZATION"), Some("Basic YWRtaW46YWRtaW4="));
        assert_eq!(request.header("host"), Some("fota.local"));
    }

    #[test]
    fn test_query_values_are_decoded() {
        let request =
            Request::parse(b"GET /x?description=Second+release%20no%3A1&empty= HTTP/1.1\r\n\r\n")
                .unwrap();
        assert_eq!(request.query_param("description"), Some("Second release no:1"));
        assert_eq!(request.query_param("empty"), Some(""));
    }

    #[test]
    fn test_short_request_line_rejected() {
        assert!(Request::parse(b"GET /\r\n\r\n").is_none());
        assert!(Request::parse(b"\r\n\r\n").is_none());
        assert!(Request::parse(b"").is_none());
    }

    #[test]
    fn test_malformed_header_skipped() {
        let request =
            Request::parse(b"GET / HTTP/1.1\r\nnot a header\r\nAccept: */*\r\n\r\n").unwrap();
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("accept"), Some("*/*"));
    }

    #[test]
    fn test_headers_stop_at_blank_line() {
        let request = Request::parse(b"POST /u HTTP/1.1\r\nContent-Length: 3\r\n\r\nA: b").unwrap();
        assert_eq!(request.content_length(), Some(3));
        assert!(request.header("a").is_none());
    }

    #[test]
    fn test_bare_lf_line_endings() {
        let request = Request::parse(b"GET /firmware/metadata.json HTTP/1.0\nHost: x\n\n").unwrap();
        assert_eq!(request.path, "/firmware/metadata.json");
        assert_eq!(request.header("host"), Some("x"));
    }

    #[test]
    fn test_head_end() {
        assert_eq!(head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(head_end(b"GET / HTTP/1.1\n\nbody"), Some(16));
        assert_eq!(head_end(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
    }
}
