//! Capability interface over the object store that holds file payloads.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use std::{collections::HashMap, io};

use crate::{
    models::object::{ObjectHead, ObjectTag},
    services::sqlite_store::StoreResult,
};

/// Chunked payload body used for both uploads and downloads.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// Outcome of a single readiness probe.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReadinessCheck {
    pub name: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

/// Key-addressed blob operations against a single bucket.
///
/// Absence is reported as `None` (or `false`) rather than an error wherever
/// the operation has a natural "not there" answer; errors mean the store
/// could not answer at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `body` under `key` with the given user metadata, replacing any
    /// previous object (and its tags) at that key.
    async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        metadata: HashMap<String, String>,
        body: BodyStream,
    ) -> StoreResult<()>;

    /// Headers, user metadata and tag count for `key`.
    async fn head_object(&self, key: &str) -> StoreResult<Option<ObjectHead>>;

    /// Tags attached to `key`. A missing object is an error here.
    async fn list_tags(&self, key: &str) -> StoreResult<Vec<ObjectTag>>;

    /// Replaces the tag set of `key`. Returns `false` if there is no such object.
    async fn put_tags(&self, key: &str, tags: Vec<ObjectTag>) -> StoreResult<bool>;

    /// Upserts `tags` on `key` in one step, leaving tags with other keys
    /// untouched. Returns `false` if there is no such object.
    async fn merge_tags(&self, key: &str, tags: Vec<ObjectTag>) -> StoreResult<bool>;

    /// Opens the payload of `key` for streaming.
    async fn get_object_stream(&self, key: &str) -> StoreResult<Option<BodyStream>>;

    /// Removes `key`. Deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// Connectivity probes for the readiness endpoint.
    async fn ready_checks(&self) -> Vec<ReadinessCheck>;
}
