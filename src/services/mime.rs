//! Declared content-type validation against a fixed allow-list.

use std::collections::HashSet;
use std::sync::Arc;

use crate::services::strategy::GatewayError;

/// Content types accepted when no override is configured.
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "text/plain",
    "text/csv",
    "application/pdf",
    "application/json",
    "application/xml",
    "application/rtf",
    "application/octet-stream",
    "application/zip",
    "application/x-7z-compressed",
    "application/gzip",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
    "image/tiff",
];

/// Immutable allow-list of MIME type strings.
///
/// Matching is exact and case-sensitive. The set is built once and shared
/// between clones.
#[derive(Debug, Clone)]
pub struct MimeValidator {
    allowed: Arc<HashSet<String>>,
}

impl MimeValidator {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Arc::new(allowed.into_iter().map(Into::into).collect()),
        }
    }

    /// Accepts `mime_type` or returns `InvalidMimeType` carrying it.
    pub fn validate(&self, mime_type: &str) -> Result<(), GatewayError> {
        if self.allowed.contains(mime_type) {
            Ok(())
        } else {
            Err(GatewayError::InvalidMimeType(mime_type.to_string()))
        }
    }
}

impl Default for MimeValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_MIME_TYPES.iter().copied())
    }
}
