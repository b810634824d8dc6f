//! Defines routes for the file gateway.
//!
//! ## Structure
//! - **Health endpoints** (mounted at root)
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **File endpoints** (mounted under the configured service path)
//!   - `POST   /upload`            — multipart or JSON upload
//!   - `POST   /upload/stream`     — raw streamed upload
//!   - `GET    /{id}`              — file details with antivirus status
//!   - `GET    /{id}/download`     — streamed body, `?bypassAv=true` skips the AV gate
//!   - `GET    /{id}/content`      — buffered body as base64 JSON
//!   - `PUT    /{id}/av-status`    — record a scan result
//!   - `DELETE /{id}`              — delete

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_file, get_file_details, load_file_content, record_av_status,
            upload_file, upload_stream,
        },
        health_handlers::{healthz, readyz},
    },
    services::strategy::StorageStrategy,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Build the router carrying `StorageStrategy` as shared state.
///
/// Request bodies above `max_upload_bytes` are rejected with 413 before any
/// handler runs when the length is declared, and cut off mid-stream otherwise.
pub fn routes(service_path: &str, max_upload_bytes: usize) -> Router<StorageStrategy> {
    let files = Router::new()
        .route("/upload", post(upload_file))
        .route("/upload/stream", post(upload_stream))
        .route("/{id}", get(get_file_details).delete(delete_file))
        .route("/{id}/download", get(download_file))
        .route("/{id}/content", get(load_file_content))
        .route("/{id}/av-status", put(record_av_status));

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));

    let mount = mount_path(service_path);
    let router = if mount.is_empty() {
        router.merge(files)
    } else {
        router.nest(&mount, files)
    };

    router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}

/// Path component of the service prefix, without a trailing `/`.
///
/// Accepts a bare path (`/files`, `files/`) or an absolute URL
/// (`https://host/files`). Empty for the root.
fn mount_path(service_path: &str) -> String {
    let path = match service_path.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => service_path,
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        String::new()
    } else {
        format!("/{}", segments.join("/"))
    }
}
