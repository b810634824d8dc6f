//! Represents the bucket that holds every uploaded file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket in the embedded object store.
///
/// The gateway works against exactly one bucket, named in configuration and
/// created on first start.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name (must conform to DNS naming rules).
    pub name: String,

    /// Region the bucket was created in (e.g. "eu-west-1").
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
