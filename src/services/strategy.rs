//! src/services/strategy.rs
//!
//! StorageStrategy maps uploaded files onto objects in the store and rebuilds
//! file details from object headers and tags. Antivirus status lives in two
//! tags on the object (`av-status`, `av-timestamp`); anything short of exactly
//! that pair is reported as "not found" rather than guessed at.
//!
//! The strategy holds no mutable state. Clones share the same store handle and
//! can be used from any number of concurrent requests.

use crate::{
    models::{
        file::{
            AvStatus, FileDetails, FileDownload, FileLinks, LoadedFile, UnknownAvStatus,
            UploadedFile,
        },
        object::{ObjectHead, ObjectTag},
    },
    services::{
        mime::MimeValidator,
        object_store::{BodyStream, ObjectStore},
        sqlite_store::StoreError,
    },
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::{collections::HashMap, io, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const AV_STATUS_TAG: &str = "av-status";
pub const AV_TIMESTAMP_TAG: &str = "av-timestamp";

pub const CONTENT_TYPE_METADATA: &str = "content-type";
pub const FILENAME_METADATA: &str = "filename";
pub const EXTENSION_METADATA: &str = "extension";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("file `{id}` not found")]
    NotFound { id: String },
    #[error("file `{id}` has antivirus status {status}")]
    NotClean { id: String, status: AvStatus },
    #[error("mime type `{0}` is not allowed")]
    InvalidMimeType(String),
    #[error("unrecognized antivirus status `{0}`")]
    UnknownAvStatus(String),
    #[error("payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error("storage fault: {0}")]
    StorageFault(#[from] StoreError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Clone)]
pub struct StorageStrategy {
    store: Arc<dyn ObjectStore>,
    validator: MimeValidator,
    service_path: String,
    max_upload_bytes: usize,
}

impl StorageStrategy {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        validator: MimeValidator,
        service_path: impl Into<String>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            validator,
            service_path: normalize_service_path(&service_path.into()),
            max_upload_bytes,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Persist `file` under a freshly generated id and return that id.
    ///
    /// Every call produces a new id, even for identical content. Store
    /// failures are returned as `StorageFault` without retrying.
    pub async fn save(&self, file: UploadedFile) -> GatewayResult<Uuid> {
        self.validator.validate(&file.mime_type)?;
        if let Some(size) = file.size_bytes {
            if size > self.max_upload_bytes as u64 {
                return Err(GatewayError::PayloadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }
        }

        let id = Uuid::new_v4();
        let key = id.to_string();
        let metadata = HashMap::from([
            (CONTENT_TYPE_METADATA.to_string(), file.mime_type.clone()),
            (FILENAME_METADATA.to_string(), file.file_name.clone()),
            (EXTENSION_METADATA.to_string(), file.extension().to_string()),
        ]);

        let limit = self.max_upload_bytes;
        let mut received = 0usize;
        let body: BodyStream = file
            .body
            .map(move |chunk| {
                let chunk = chunk?;
                received += chunk.len();
                if received > limit {
                    return Err(io::Error::new(
                        io::ErrorKind::FileTooLarge,
                        format!("upload exceeds {} bytes", limit),
                    ));
                }
                Ok(chunk)
            })
            .boxed();

        match self
            .store
            .put_object(&key, &file.mime_type, metadata, body)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::FileTooLarge => {
                info!(id = %key, "upload of {} exceeded {} bytes", file.file_name, limit);
                return Err(GatewayError::PayloadTooLarge { limit });
            }
            Err(err) => {
                error!(id = %key, "failed to store upload {}: {}", file.file_name, err);
                return Err(err.into());
            }
        }

        info!(id = %key, mime_type = %file.mime_type, "stored {}", file.file_name);
        Ok(id)
    }

    /// Rebuild the details of `id` from the store, or `None` when it does
    /// not resolve.
    ///
    /// A zero tag count on the headers skips the tag listing and reports
    /// `NOT_SCANNED`. Otherwise the tag set must hold exactly the status and
    /// timestamp pair; a failed listing or any other shape resolves as `None`.
    pub async fn get_file_details(&self, id: &str) -> GatewayResult<Option<FileDetails>> {
        if Uuid::parse_str(id).is_err() {
            debug!(id, "not a file id");
            return Ok(None);
        }

        let head = match self.store.head_object(id).await {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(None),
            Err(err) => {
                error!(id, "head_object failed: {}", err);
                return Err(err.into());
            }
        };

        let (status, timestamp) = if head.tag_count == 0 {
            (AvStatus::NotScanned, String::new())
        } else {
            match self.resolve_av_tags(id).await? {
                Some(pair) => pair,
                None => return Ok(None),
            }
        };

        Ok(Some(self.build_details(id, head, status, timestamp)))
    }

    /// Same as [`get_file_details`](Self::get_file_details) with absence as `NotFound`.
    pub async fn require_details(&self, id: &str) -> GatewayResult<FileDetails> {
        self.get_file_details(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound { id: id.to_string() })
    }

    async fn resolve_av_tags(&self, id: &str) -> GatewayResult<Option<(AvStatus, String)>> {
        let tags = match self.store.list_tags(id).await {
            Ok(tags) if !tags.is_empty() => tags,
            Ok(_) => {
                warn!(id, "headers reported tags but listing returned none");
                return Ok(None);
            }
            Err(err) => {
                warn!(id, "tag listing failed: {}", err);
                return Ok(None);
            }
        };

        let av_tags: Vec<&ObjectTag> = tags
            .iter()
            .filter(|t| t.key == AV_STATUS_TAG || t.key == AV_TIMESTAMP_TAG)
            .collect();
        if av_tags.len() != 2 {
            info!(id, found = av_tags.len(), "incomplete antivirus tags");
            return Ok(None);
        }

        let status_tag = av_tags.iter().find(|t| t.key == AV_STATUS_TAG);
        let timestamp_tag = av_tags.iter().find(|t| t.key == AV_TIMESTAMP_TAG);
        let (Some(status_tag), Some(timestamp_tag)) = (status_tag, timestamp_tag) else {
            info!(id, "duplicate antivirus tag keys");
            return Ok(None);
        };

        let status = status_tag
            .value
            .parse::<AvStatus>()
            .map_err(|UnknownAvStatus(value)| {
                error!(id, "unrecognized antivirus status tag `{}`", value);
                GatewayError::UnknownAvStatus(value)
            })?;

        Ok(Some((status, timestamp_tag.value.clone())))
    }

    fn build_details(
        &self,
        id: &str,
        head: ObjectHead,
        av_status: AvStatus,
        av_timestamp: String,
    ) -> FileDetails {
        let mut metadata = head.user_metadata;
        let content_type = head
            .content_type
            .or_else(|| metadata.remove(CONTENT_TYPE_METADATA))
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

        FileDetails {
            id: id.to_string(),
            av_timestamp,
            av_status,
            content_type,
            size_bytes: head.content_length,
            name: metadata.remove(FILENAME_METADATA).unwrap_or_default(),
            created_on: head.last_modified,
            links: self.links_for(id),
        }
    }

    pub fn links_for(&self, id: &str) -> FileLinks {
        FileLinks {
            self_link: join_path(&[&self.service_path, id]),
            download: join_path(&[&self.service_path, id, "download"]),
        }
    }

    /// Refuse access unless the file is clean or the caller bypasses the gate.
    pub fn authorize_download(&self, details: &FileDetails, bypass_av: bool) -> GatewayResult<()> {
        if bypass_av || details.av_status == AvStatus::Clean {
            return Ok(());
        }
        Err(GatewayError::NotClean {
            id: details.id.clone(),
            status: details.av_status,
        })
    }

    /// Open the body of the file described by `details` as a stream.
    ///
    /// Name, MIME type and extension come from `details`. The stream is not
    /// buffered here; dropping it releases the underlying handle.
    pub async fn fetch(&self, details: &FileDetails) -> GatewayResult<Option<FileDownload>> {
        let body = match self.store.get_object_stream(&details.id).await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(err) => {
                error!(id = %details.id, "get_object_stream failed: {}", err);
                return Err(err.into());
            }
        };

        Ok(Some(FileDownload {
            id: details.id.clone(),
            file_name: details.name.clone(),
            mime_type: details.content_type.clone(),
            extension: details.extension().to_string(),
            size_bytes: details.size_bytes,
            body,
        }))
    }

    /// Buffered variant of [`fetch`](Self::fetch), capped at the upload limit.
    pub async fn load(&self, details: &FileDetails) -> GatewayResult<Option<LoadedFile>> {
        let limit = self.max_upload_bytes;
        if details.size_bytes > limit as i64 {
            return Err(GatewayError::PayloadTooLarge { limit });
        }
        let Some(download) = self.fetch(details).await? else {
            return Ok(None);
        };

        let mut body = download.body;
        let mut buf = BytesMut::with_capacity(details.size_bytes.max(0) as usize);
        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk.map_err(|err| {
                error!(id = %details.id, "reading object body failed: {}", err);
                GatewayError::StorageFault(StoreError::Io(err))
            })?;
            if buf.len() + chunk.len() > limit {
                return Err(GatewayError::PayloadTooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(Some(LoadedFile {
            id: download.id,
            file_name: download.file_name,
            mime_type: download.mime_type,
            extension: download.extension,
            data: buf.freeze(),
        }))
    }

    /// Delete `id` unconditionally. Unknown ids are a no-op.
    pub async fn delete(&self, id: &str) -> GatewayResult<()> {
        if Uuid::parse_str(id).is_err() {
            debug!(id, "delete of non-file id ignored");
            return Ok(());
        }
        self.store
            .delete_object(id)
            .await
            .inspect_err(|err| error!(id, "delete_object failed: {}", err))?;
        info!(id, "deleted file");
        Ok(())
    }

    /// Record a scan outcome as the antivirus tag pair, keeping unrelated tags.
    ///
    /// The pair is merged in a single store write, so concurrent results for
    /// the same file never drop each other's non-AV tags; the last pair wins.
    /// Returns `false` when `id` does not resolve to an object.
    pub async fn record_scan(
        &self,
        id: &str,
        status: AvStatus,
        timestamp: &str,
    ) -> GatewayResult<bool> {
        if Uuid::parse_str(id).is_err() {
            return Ok(false);
        }

        let tags = vec![
            ObjectTag::new(AV_STATUS_TAG, status.as_tag_value()),
            ObjectTag::new(AV_TIMESTAMP_TAG, timestamp),
        ];
        let updated = self
            .store
            .merge_tags(id, tags)
            .await
            .inspect_err(|err| error!(id, "merge_tags failed: {}", err))?;
        if updated {
            info!(id, %status, "recorded antivirus result");
        }
        Ok(updated)
    }
}

/// Prefix paths get a leading `/`; absolute URLs are kept as given.
fn normalize_service_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Join segments with `/`, collapsing repeated separators outside a URL scheme.
pub fn join_path(segments: &[&str]) -> String {
    let joined = segments.join("/");
    let (scheme, rest) = match joined.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, joined.as_str()),
    };

    let mut collapsed = String::with_capacity(rest.len());
    for ch in rest.chars() {
        if ch == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(ch);
    }

    match scheme {
        Some(scheme) => format!("{}://{}", scheme, collapsed),
        None => collapsed,
    }
}
