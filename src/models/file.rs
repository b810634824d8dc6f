//! Gateway-facing file records: uploads, reconstructed details, downloads.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::services::object_store::BodyStream;

/// Antivirus scan outcome recorded against a stored object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvStatus {
    Clean,
    Infected,
    NotScanned,
}

impl AvStatus {
    /// Value written to the status tag.
    pub fn as_tag_value(&self) -> &'static str {
        match self {
            AvStatus::Clean => "clean",
            AvStatus::Infected => "infected",
            AvStatus::NotScanned => "not_scanned",
        }
    }
}

impl fmt::Display for AvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AvStatus::Clean => "CLEAN",
            AvStatus::Infected => "INFECTED",
            AvStatus::NotScanned => "NOT_SCANNED",
        };
        f.write_str(label)
    }
}

/// Error returned for status strings outside the known set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAvStatus(pub String);

impl FromStr for AvStatus {
    type Err = UnknownAvStatus;

    /// Case-insensitive; no fallback for unrecognized values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clean" => Ok(AvStatus::Clean),
            "infected" => Ok(AvStatus::Infected),
            "not_scanned" => Ok(AvStatus::NotScanned),
            _ => Err(UnknownAvStatus(s.to_string())),
        }
    }
}

/// A file as received from a client, before it has an id.
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    /// Declared size, when the transport knows it up front.
    pub size_bytes: Option<u64>,
    pub body: BodyStream,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, body: BodyStream) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size_bytes: None,
            body,
        }
    }

    /// Wraps an in-memory payload as a single-chunk body.
    pub fn from_bytes(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data: Bytes = data.into();
        let size = data.len() as u64;
        let body: BodyStream = Box::pin(futures::stream::once(async move { Ok(data) }));
        Self {
            size_bytes: Some(size),
            ..Self::new(file_name, mime_type, body)
        }
    }

    pub fn extension(&self) -> &str {
        extension_of(&self.file_name)
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// Links advertised alongside file details.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub download: String,
}

/// Read-only view rebuilt from object headers and tags on every request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileDetails {
    pub id: String,
    /// Scan timestamp; empty when the object has not been scanned.
    pub av_timestamp: String,
    pub av_status: AvStatus,
    pub content_type: String,
    pub size_bytes: i64,
    pub name: String,
    pub created_on: DateTime<Utc>,
    pub links: FileLinks,
}

impl FileDetails {
    pub fn extension(&self) -> &str {
        extension_of(&self.name)
    }
}

/// Streaming download handed to the caller; the body is released on drop.
pub struct FileDownload {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub extension: String,
    pub size_bytes: i64,
    pub body: BodyStream,
}

/// Fully buffered download for small-file paths.
#[derive(Clone, Debug)]
pub struct LoadedFile {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub extension: String,
    pub data: Bytes,
}

/// Text after the last `.` of the final path segment, or empty.
pub fn extension_of(file_name: &str) -> &str {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(pos) if pos > 0 => &base[pos + 1..],
        _ => "",
    }
}
