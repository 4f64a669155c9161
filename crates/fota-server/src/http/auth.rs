//! Basic authentication gate.
//!
//! Every route requires the static credential pair except the configured
//! public paths (by default the binary downloads and the raw metadata document
//! fetched by devices).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Auth-exempt routes used when none are configured.
pub const DEFAULT_PUBLIC_PATHS: [&str; 2] = ["/download/*", "/firmware/metadata.json"];

/// Static username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Create a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check an `Authorization` header value (`Basic <base64(user:pass)>`).
    #[must_use]
    pub fn verify(&self, authorization: Option<&str>) -> bool {
        let Some(value) = authorization else {
            return false;
        };
        let Some((scheme, encoded)) = value.trim().split_once(' ') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        decoded
            .split_once(':')
            .is_some_and(|(user, pass)| user == self.username && pass == self.password)
    }

    /// Header value a client would send for these credentials.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

/// A route pattern that bypasses authentication.
///
/// A trailing `*` matches any suffix; otherwise the path must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicPath(String);

impl PublicPath {
    /// Create a pattern.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Whether `path` matches this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self.0.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == self.0,
        }
    }
}

/// Per-route authentication policy.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    credentials: Credentials,
    realm: String,
    public_paths: Vec<PublicPath>,
}

impl AuthPolicy {
    /// Create a policy; an empty `public_paths` means every route is protected.
    #[must_use]
    pub fn new(credentials: Credentials, realm: impl Into<String>, public_paths: Vec<PublicPath>) -> Self {
        Self {
            credentials,
            realm: realm.into(),
            public_paths,
        }
    }

    /// Whether `path` is exempt from authentication.
    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| p.matches(path))
    }

    /// Whether a request for `path` with the given header may proceed.
    #[must_use]
    pub fn permits(&self, path: &str, authorization: Option<&str>) -> bool {
        self.is_public(path) || self.credentials.verify(authorization)
    }

    /// `WWW-Authenticate` challenge value.
    #[must_use]
    pub fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }

    /// Configured credentials.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}
