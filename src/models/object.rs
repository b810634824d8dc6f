//! Represents an object (file payload) stored in the bucket, plus its tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Object row as stored in SQLite, with the number of attached tags.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: Option<String>,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,

    /// Count of tags attached to the object.
    pub tag_count: i64,
}

/// Header view of an object: what a HEAD request returns.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectHead {
    pub content_type: Option<String>,
    pub content_length: i64,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
    /// Tag count hint; lets callers skip a tag listing when it is zero.
    pub tag_count: usize,
    /// User metadata with values already decoded.
    pub user_metadata: HashMap<String, String>,
}

/// A key-value tag attached to an object, distinct from its metadata.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectTag {
    pub key: String,
    pub value: String,
}

impl ObjectTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
