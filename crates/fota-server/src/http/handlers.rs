//! Route handlers.
//!
//! Catalog and filesystem work runs on the blocking pool so slow disks never
//! stall the accept loop.

use super::request::Request;
use super::response::{Response, Status};
use crate::catalog::Catalog;
use crate::error::IngestError;
use crate::ingest::IngestRequest;
use crate::server::AppState;
use bytes::Bytes;
use std::fmt::Write as _;
use std::io::{self, Cursor};

/// Source name assumed for uploads that do not name one.
const DEFAULT_UPLOAD_NAME: &str = "firmware.bin";

/// Handle `GET /`: HTML summary of the catalog.
///
/// # Errors
///
/// Returns `AppError` if the catalog could not be loaded.
pub async fn status_page(state: &AppState) -> Result<Response, AppError> {
    let catalog = load_catalog(state).await?;
    Ok(Response::html(Status::OK, render_status_page(&catalog)))
}

fn render_status_page(catalog: &Catalog) -> String {
    let mut html = String::from("<html><head><title>FOTA Server</title></head><body>");
    html.push_str("<h1>FOTA Server</h1>");
    let _ = write!(
        html,
        "<p>Latest version: {}</p><p>Available firmware: {}</p>",
        escape_html(&catalog.latest_version),
        catalog.len()
    );
    html.push_str("<h2>Available Firmware Files:</h2><ul>");
    for entry in &catalog.firmware_entries {
        let _ = write!(
            html,
            "<li>{} v{} - {} ({} bytes)</li>",
            escape_html(&entry.device_type),
            escape_html(&entry.version),
            escape_html(&entry.description),
            entry.size
        );
    }
    html.push_str("</ul></body></html>");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Handle `GET /api/firmware/list`: the full catalog as JSON.
///
/// # Errors
///
/// Returns `AppError` if the catalog could not be loaded.
pub async fn list(state: &AppState) -> Result<Response, AppError> {
    let catalog = load_catalog(state).await?;
    Ok(Response::json(Status::OK, &catalog))
}

/// Handle `GET /api/firmware/latest?device_type=X`.
///
/// # Errors
///
/// Returns `AppError` if the catalog could not be loaded.
pub async fn latest(state: &AppState, request: &Request) -> Result<Response, AppError> {
    let not_found = || {
        Response::json_error(
            Status::NOT_FOUND,
            "No firmware found for specified device type",
        )
    };

    let Some(device_type) = request.query_param("device_type") else {
        return Ok(not_found());
    };

    let catalog = load_catalog(state).await?;
    Ok(catalog
        .find_latest(device_type)
        .map_or_else(not_found, |entry| Response::json(Status::OK, entry)))
}

/// Handle `GET /firmware/metadata.json`: the persisted document, byte for byte.
///
/// # Errors
///
/// Returns `AppError` if the document exists but cannot be read.
pub async fn metadata(state: &AppState) -> Result<Response, AppError> {
    let store = state.store().clone();
    let bytes = blocking(move || store.load_raw())
        .await?
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Response::json_bytes(Status::OK, bytes))
}

/// Handle `GET /download/{filename}`.
///
/// Only files listed in the catalog are served. The response length comes
/// from the open handle; a disagreement with the catalog is refused.
///
/// # Errors
///
/// Returns `AppError::NotFound` for unknown or missing files and
/// `AppError::Integrity` when the stored size disagrees with the catalog.
pub async fn download(state: &AppState, filename: &str) -> Result<Response, AppError> {
    if !is_plain_filename(filename) {
        return Err(AppError::NotFound("File not found".to_string()));
    }

    let catalog = load_catalog(state).await?;
    let Some(entry) = catalog.find_by_filename(filename) else {
        tracing::debug!("Download of uncatalogued file {filename} refused");
        return Err(AppError::NotFound("File not found".to_string()));
    };

    let path = state.store().binary_path(filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(
                integrity = true,
                "Catalog lists {filename} but {} does not exist",
                path.display()
            );
            return Err(AppError::NotFound("File not found".to_string()));
        }
        Err(e) => return Err(AppError::Internal(format!("Failed to open {filename}: {e}"))),
    };

    let len = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stat {filename}: {e}")))?
        .len();
    if len != entry.size {
        tracing::warn!(
            integrity = true,
            "Size of {filename} is {len} bytes but the catalog records {}",
            entry.size
        );
        return Err(AppError::Integrity(format!(
            "Stored size of {filename} does not match the catalog"
        )));
    }

    tracing::debug!("Serving {filename} ({len} bytes)");
    Ok(Response::attachment(file, len, filename))
}

/// A single path component that cannot escape the firmware directory.
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

/// Handle `POST /api/firmware/upload?device_type=X&version=Y[&filename=Z][&description=D]`.
///
/// # Errors
///
/// Returns `AppError` if the ingestion worker could not be run.
pub async fn upload(state: &AppState, request: &Request, body: Bytes) -> Result<Response, AppError> {
    let (Some(device_type), Some(version)) = (
        request.query_param("device_type"),
        request.query_param("version"),
    ) else {
        return Ok(Response::json_error(
            Status::BAD_REQUEST,
            "device_type and version are required",
        ));
    };

    let ingest_request = IngestRequest::new(
        version,
        device_type,
        request.query_param("description").unwrap_or_default(),
        request
            .query_param("filename")
            .unwrap_or(DEFAULT_UPLOAD_NAME),
    );

    let ingestor = state.ingestor().clone();
    let result = blocking(move || ingestor.ingest(Cursor::new(body), &ingest_request)).await?;

    Ok(match result {
        Ok(committed) => Response::json(Status::OK, &committed),
        Err(
            e @ (IngestError::InvalidVersion(_)
            | IngestError::InvalidDeviceType(_)
            | IngestError::InvalidExtension(_)),
        ) => Response::json_error(Status::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            tracing::error!("Upload failed: {e}");
            Response::json_error(Status::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    })
}

async fn load_catalog(state: &AppState) -> Result<Catalog, AppError> {
    let store = state.store().clone();
    blocking(move || store.load()).await
}

async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Worker task failed: {e}")))
}

/// Request-level failures, answered with a plain-text status.
#[derive(Debug)]
pub enum AppError {
    /// Resource not found (404)
    NotFound(String),
    /// Malformed request (400)
    BadRequest(String),
    /// Body without `Content-Length` (411)
    LengthRequired,
    /// Body larger than the configured limit (413)
    PayloadTooLarge(u64),
    /// Stored binary disagrees with its catalog entry (500)
    Integrity(String),
    /// Anything else (500)
    Internal(String),
}

impl AppError {
    /// Convert into the response sent to the client.
    #[must_use]
    pub fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (Status::NOT_FOUND, msg),
            Self::BadRequest(msg) => (Status::BAD_REQUEST, msg),
            Self::LengthRequired => (
                Status::LENGTH_REQUIRED,
                "Content-Length is required".to_string(),
            ),
            Self::PayloadTooLarge(limit) => (
                Status::PAYLOAD_TOO_LARGE,
                format!("Upload exceeds the {limit} byte limit"),
            ),
            Self::Integrity(msg) | Self::Internal(msg) => (Status::INTERNAL_SERVER_ERROR, msg),
        };

        Response::text(status, message)
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
