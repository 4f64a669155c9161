//! Route table.

/// Prefix of binary download paths.
pub const DOWNLOAD_PREFIX: &str = "/download/";

/// Path of the raw metadata document.
pub const METADATA_PATH: &str = "/firmware/metadata.json";

/// A dispatch target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /` HTML status page
    StatusPage,
    /// `GET /api/firmware/list` full catalog as JSON
    List,
    /// `GET /api/firmware/latest?device_type=X`
    Latest,
    /// `GET /firmware/metadata.json` raw persisted document
    Metadata,
    /// `GET /download/{filename}`
    Download(String),
    /// `POST /api/firmware/upload?...`
    Upload,
    /// Anything else
    NotFound,
}

/// Map a method and path to a route.
#[must_use]
pub fn route(method: &str, path: &str) -> Route {
    match (method, path) {
        ("GET", "/") => Route::StatusPage,
        ("GET", "/api/firmware/list") => Route::List,
        ("GET", "/api/firmware/latest") => Route::Latest,
        ("GET", METADATA_PATH) => Route::Metadata,
        ("POST", "/api/firmware/upload") => Route::Upload,
        ("GET", _) => path
            .strip_prefix(DOWNLOAD_PREFIX)
            .map_or(Route::NotFound, |name| Route::Download(name.to_string())),
        _ => Route::NotFound,
    }
}
