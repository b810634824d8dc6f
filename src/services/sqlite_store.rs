//! src/services/sqlite_store.rs
//!
//! SqliteObjectStore — the embedded object store behind the gateway. Object
//! metadata, user metadata and tags live in SQLite; payloads live on disk
//! sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`. It behaves like
//! a single S3 bucket: overwrite on put, hard delete, tags kept apart from
//! metadata.

use crate::{
    models::{
        bucket::Bucket,
        object::{ObjectHead, ObjectRecord, ObjectTag},
    },
    services::{
        codec,
        object_store::{BodyStream, ObjectStore, ReadinessCheck},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Object store bound to one bucket, safe to clone and share across requests.
#[derive(Clone)]
pub struct SqliteObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: Bucket,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-central-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-south-1",
    "ca-central-1",
    "sa-east-1",
    "me-south-1",
];

/// Apply the embedded schema. Every statement is idempotent.
pub async fn apply_schema(db: &SqlitePool) -> StoreResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("Applying {} schema statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

impl SqliteObjectStore {
    /// Bind to `bucket`, creating its row and directory on first use.
    ///
    /// Validates the bucket name and region before touching the database.
    pub async fn open(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: &str,
        region: &str,
    ) -> StoreResult<Self> {
        Self::ensure_bucket_name_safe(bucket)?;
        let region = region.to_lowercase();
        Self::ensure_region_valid(&region)?;

        sqlx::query(
            "INSERT INTO buckets (id, name, region, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(&region)
        .bind(Utc::now())
        .execute(&*db)
        .await?;

        let bucket_rec = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*db)
        .await?;

        if bucket_rec.region != region {
            warn!(
                "bucket {} already exists in region {}, ignoring configured region {}",
                bucket_rec.name, bucket_rec.region, region
            );
        }

        let store = Self {
            db,
            base_path: base_path.into(),
            bucket: bucket_rec,
        };
        fs::create_dir_all(store.bucket_root()).await?;
        info!(
            "Object store bound to bucket {} ({})",
            store.bucket.name, store.bucket.region
        );
        Ok(store)
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    /// Region must be one of SUPPORTED_REGIONS (case-insensitive).
    fn ensure_region_valid(region: &str) -> StoreResult<()> {
        if SUPPORTED_REGIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(region))
        {
            Ok(())
        } else {
            Err(StoreError::UnsupportedRegion(region.to_string()))
        }
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket.name)
    }

    /// Two-level shard directories from MD5(bucket/key), 00–ff each.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket.name, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn not_found(&self, key: &str) -> StoreError {
        StoreError::ObjectNotFound {
            bucket: self.bucket.name.clone(),
            key: key.to_string(),
        }
    }

    /// Object row plus tag count, or `None` when the key is unknown.
    async fn fetch_object(&self, key: &str) -> StoreResult<Option<ObjectRecord>> {
        Self::ensure_key_safe(key)?;
        let record = sqlx::query_as::<_, ObjectRecord>(
            "SELECT o.id, o.content_type, o.size_bytes, o.etag, o.last_modified,
                    (SELECT COUNT(*) FROM object_tags t WHERE t.object_id = o.id) AS tag_count
             FROM objects o
             WHERE o.bucket_id = ? AND o.key = ?",
        )
        .bind(self.bucket.id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Stream `body` into a temp file next to `file_path`, then rename it in.
    ///
    /// Returns (size, md5 hex). The temp file is removed on every error path.
    async fn write_payload(
        &self,
        file_path: &Path,
        mut body: BodyStream,
    ) -> StoreResult<(i64, String)> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Upsert the object row and replace its metadata and tags in one transaction.
    async fn write_rows(
        &self,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
        size_bytes: i64,
        etag: &str,
    ) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;

        let object_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.bucket.id)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object_id)
            .execute(&mut *tx)
            .await?;

        for (name, value) in metadata {
            sqlx::query("INSERT INTO object_metadata (object_id, key, value) VALUES (?, ?, ?)")
                .bind(object_id)
                .bind(name.to_ascii_lowercase())
                .bind(codec::encode(value))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn check_sqlite(&self) -> ReadinessCheck {
        let error = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => None,
            Ok(v) => Some(format!("unexpected result: {}", v)),
            Err(e) => Some(format!("error: {}", e)),
        };
        ReadinessCheck {
            name: "sqlite",
            ok: error.is_none(),
            error,
        }
    }

    /// Write/read/delete a probe file under the bucket root.
    async fn check_disk(&self) -> ReadinessCheck {
        let tmp_path = self.bucket_root().join(format!(".readyz-{}", Uuid::new_v4()));
        let (ok, error) = match fs::write(&tmp_path, b"readyz").await {
            Ok(_) => match fs::read(&tmp_path).await {
                Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                    Ok(_) => (true, None),
                    Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
                },
                Ok(_) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some("file content mismatch".to_string()))
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some(format!("could not read tmp file: {}", e)))
                }
            },
            Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
        };
        ReadinessCheck {
            name: "disk",
            ok,
            error,
        }
    }
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        metadata: HashMap<String, String>,
        body: BodyStream,
    ) -> StoreResult<()> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let (size_bytes, etag) = self.write_payload(&file_path, body).await?;

        if let Err(err) = self
            .write_rows(key, content_type, &metadata, size_bytes, &etag)
            .await
        {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }

        debug!("stored object {} ({} bytes, etag {})", key, size_bytes, etag);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StoreResult<Option<ObjectHead>> {
        let Some(record) = self.fetch_object(key).await? else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM object_metadata WHERE object_id = ?",
        )
        .bind(record.id)
        .fetch_all(&*self.db)
        .await?;
        let user_metadata = rows
            .into_iter()
            .map(|(name, value)| (name, codec::decode(&value)))
            .collect();

        Ok(Some(ObjectHead {
            content_type: record.content_type,
            content_length: record.size_bytes,
            etag: record.etag,
            last_modified: record.last_modified,
            tag_count: usize::try_from(record.tag_count).unwrap_or(0),
            user_metadata,
        }))
    }

    async fn list_tags(&self, key: &str) -> StoreResult<Vec<ObjectTag>> {
        let record = self
            .fetch_object(key)
            .await?
            .ok_or_else(|| self.not_found(key))?;

        let tags = sqlx::query_as::<_, ObjectTag>(
            "SELECT key, value FROM object_tags WHERE object_id = ? ORDER BY key",
        )
        .bind(record.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(tags)
    }

    async fn put_tags(&self, key: &str, tags: Vec<ObjectTag>) -> StoreResult<bool> {
        let Some(record) = self.fetch_object(key).await? else {
            return Ok(false);
        };

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(record.id)
            .execute(&mut *tx)
            .await?;
        for tag in &tags {
            sqlx::query(
                "INSERT INTO object_tags (object_id, key, value) VALUES (?, ?, ?)
                 ON CONFLICT(object_id, key) DO UPDATE SET value = excluded.value",
            )
            .bind(record.id)
            .bind(&tag.key)
            .bind(&tag.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("tagged object {} with {} tags", key, tags.len());
        Ok(true)
    }

    async fn merge_tags(&self, key: &str, tags: Vec<ObjectTag>) -> StoreResult<bool> {
        Self::ensure_key_safe(key)?;
        let mut tx = self.db.begin().await?;
        let object_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(self.bucket.id)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(object_id) = object_id else {
            return Ok(false);
        };

        for tag in &tags {
            sqlx::query(
                "INSERT INTO object_tags (object_id, key, value) VALUES (?, ?, ?)
                 ON CONFLICT(object_id, key) DO UPDATE SET value = excluded.value",
            )
            .bind(object_id)
            .bind(&tag.key)
            .bind(&tag.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("merged {} tags into object {}", tags.len(), key);
        Ok(true)
    }

    async fn get_object_stream(&self, key: &str) -> StoreResult<Option<BodyStream>> {
        if self.fetch_object(key).await?.is_none() {
            return Ok(None);
        }

        let file_path = self.object_path(key);
        match File::open(&file_path).await {
            Ok(file) => Ok(Some(ReaderStream::new(file).boxed())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("object {} has a metadata row but no payload", key);
                Ok(None)
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        let Some(record) = self.fetch_object(key).await? else {
            debug!("delete of missing object {} is a no-op", key);
            return Ok(());
        };

        let mut tx = self.db.begin().await?;
        for stmt in [
            "DELETE FROM object_tags WHERE object_id = ?",
            "DELETE FROM object_metadata WHERE object_id = ?",
            "DELETE FROM objects WHERE id = ?",
        ] {
            sqlx::query(stmt).bind(record.id).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root()).await;
        }
        Ok(())
    }

    async fn ready_checks(&self) -> Vec<ReadinessCheck> {
        vec![self.check_sqlite().await, self.check_disk().await]
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

/// In-memory SQLite + temp directory store shared by the crate's tests.
#[cfg(test)]
pub(crate) async fn memory_store() -> (SqliteObjectStore, tempfile::TempDir) {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteObjectStore::open(Arc::new(pool), dir.path(), "test-bucket", "local")
        .await
        .unwrap();
    (store, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::{TryStreamExt, stream};

    fn body(data: &'static [u8]) -> BodyStream {
        stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
    }

    async fn read_all(stream: BodyStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    fn meta(name: &str) -> HashMap<String, String> {
        HashMap::from([("filename".to_string(), name.to_string())])
    }

    #[tokio::test]
    async fn put_then_head_reports_headers_and_metadata() {
        let (store, _dir) = memory_store().await;
        store
            .put_object("k1", "text/plain", meta("my notes.txt"), body(b"hello"))
            .await
            .unwrap();

        let head = store.head_object("k1").await.unwrap().unwrap();
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.content_length, 5);
        assert_eq!(head.tag_count, 0);
        assert_eq!(head.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        assert_eq!(head.user_metadata["filename"], "my notes.txt");
    }

    #[tokio::test]
    async fn metadata_values_are_stored_encoded() {
        let (store, _dir) = memory_store().await;
        store
            .put_object("k1", "text/plain", meta("résumé v2.pdf"), body(b"x"))
            .await
            .unwrap();

        let raw: String = sqlx::query_scalar("SELECT value FROM object_metadata WHERE key = 'filename'")
            .fetch_one(&*store.db)
            .await
            .unwrap();
        assert_eq!(raw, "r%C3%A9sum%C3%A9%20v2.pdf");
    }

    #[tokio::test]
    async fn missing_object_is_absent_not_error() {
        let (store, _dir) = memory_store().await;
        assert!(store.head_object("nope").await.unwrap().is_none());
        assert!(store.get_object_stream("nope").await.unwrap().is_none());
        assert!(!store.put_tags("nope", vec![]).await.unwrap());
        assert!(matches!(
            store.list_tags("nope").await,
            Err(StoreError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn merge_tags_keeps_other_keys() {
        let (store, _dir) = memory_store().await;
        store
            .put_object("k1", "text/plain", meta("a.txt"), body(b"a"))
            .await
            .unwrap();
        store
            .put_tags(
                "k1",
                vec![
                    ObjectTag::new("owner", "ops"),
                    ObjectTag::new("av-status", "not_scanned"),
                ],
            )
            .await
            .unwrap();

        assert!(store
            .merge_tags("k1", vec![ObjectTag::new("av-status", "clean")])
            .await
            .unwrap());
        let mut tags = store.list_tags("k1").await.unwrap();
        tags.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            tags,
            vec![
                ObjectTag::new("av-status", "clean"),
                ObjectTag::new("owner", "ops"),
            ]
        );
        assert!(!store.merge_tags("missing", vec![]).await.unwrap());
    }

    #[tokio::test]
    async fn tags_round_trip_and_update_count() {
        let (store, _dir) = memory_store().await;
        store
            .put_object("k1", "text/plain", meta("a.txt"), body(b"a"))
            .await
            .unwrap();
        let tags = vec![
            ObjectTag::new("av-status", "clean"),
            ObjectTag::new("av-timestamp", "2024-01-01T00:00:00Z"),
        ];
        assert!(store.put_tags("k1", tags.clone()).await.unwrap());

        assert_eq!(store.list_tags("k1").await.unwrap(), tags);
        assert_eq!(store.head_object("k1").await.unwrap().unwrap().tag_count, 2);
    }

    #[tokio::test]
    async fn overwrite_replaces_payload_and_clears_tags() {
        let (store, _dir) = memory_store().await;
        store
            .put_object("k1", "text/plain", meta("a.txt"), body(b"first"))
            .await
            .unwrap();
        store
            .put_tags("k1", vec![ObjectTag::new("av-status", "clean")])
            .await
            .unwrap();
        store
            .put_object("k1", "text/csv", meta("b.csv"), body(b"second!"))
            .await
            .unwrap();

        let head = store.head_object("k1").await.unwrap().unwrap();
        assert_eq!(head.tag_count, 0);
        assert_eq!(head.content_type.as_deref(), Some("text/csv"));
        assert_eq!(head.user_metadata["filename"], "b.csv");
        let stream = store.get_object_stream("k1").await.unwrap().unwrap();
        assert_eq!(read_all(stream).await, b"second!");
    }

    #[tokio::test]
    async fn delete_removes_payload_and_is_idempotent() {
        let (store, _dir) = memory_store().await;
        store
            .put_object("k1", "text/plain", meta("a.txt"), body(b"bye"))
            .await
            .unwrap();
        let path = store.object_path("k1");
        assert!(path.exists());

        store.delete_object("k1").await.unwrap();
        assert!(!path.exists());
        assert!(store.head_object("k1").await.unwrap().is_none());
        store.delete_object("k1").await.unwrap();
    }

    #[tokio::test]
    async fn failed_body_stream_leaves_nothing_behind() {
        let (store, _dir) = memory_store().await;
        let failing: BodyStream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::UnexpectedEof, "client went away")),
        ])
        .boxed();

        let result = store
            .put_object("k1", "text/plain", meta("a.txt"), failing)
            .await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(store.head_object("k1").await.unwrap().is_none());
        assert!(!store.object_path("k1").exists());
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let (store, _dir) = memory_store().await;
        for key in ["", "/abs", "../escape", "a\\b"] {
            assert!(matches!(
                store.head_object(key).await,
                Err(StoreError::InvalidObjectKey)
            ));
        }
    }

    #[tokio::test]
    async fn open_rejects_bad_bucket_and_region() {
        let (store, dir) = memory_store().await;
        let bad_name =
            SqliteObjectStore::open(store.db.clone(), dir.path(), "Bad_Bucket", "local").await;
        assert!(matches!(bad_name, Err(StoreError::InvalidBucketName { .. })));

        let bad_region =
            SqliteObjectStore::open(store.db.clone(), dir.path(), "other-bucket", "mars-1").await;
        assert!(matches!(bad_region, Err(StoreError::UnsupportedRegion(_))));
    }

    #[tokio::test]
    async fn reopening_reuses_existing_bucket() {
        let (store, dir) = memory_store().await;
        let again = SqliteObjectStore::open(store.db.clone(), dir.path(), "test-bucket", "local")
            .await
            .unwrap();
        assert_eq!(again.bucket().id, store.bucket().id);
    }

    #[tokio::test]
    async fn ready_checks_pass_on_healthy_store() {
        let (store, _dir) = memory_store().await;
        let checks = store.ready_checks().await;
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|c| c.ok), "{:?}", checks);
    }

    #[test]
    fn ipv4_like_names() {
        assert!(is_ipv4_like("192.168.1.1"));
        assert!(!is_ipv4_like("my.bucket.name.here"));
        assert!(!is_ipv4_like("300.1.1.1"));
    }
}
