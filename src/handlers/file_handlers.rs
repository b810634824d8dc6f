//! HTTP handlers for file upload, details, download and deletion.
//! Thin adapters: request parsing and response shaping only, every decision
//! is delegated to `StorageStrategy`.

use crate::{
    errors::AppError,
    models::file::{AvStatus, FileDownload, UnknownAvStatus, UploadedFile},
    services::{
        codec,
        strategy::{GatewayError, StorageStrategy},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Multipart, Path, Query, Request, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use http_body_util::LengthLimitError;
use serde::{Deserialize, Serialize};
use std::io;
use uuid::Uuid;

const OCTET_STREAM: &str = "application/octet-stream";
const FILE_NAME_HEADER: &str = "x-file-name";

/// JSON upload body; `content` is base64.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonUpload {
    pub file_name: String,
    pub mime_type: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: Uuid,
}

/// Query params accepted by the download endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    #[serde(default)]
    pub bypass_av: bool,
}

/// Scan result posted by the antivirus scanner.
#[derive(Debug, Deserialize)]
pub struct AvStatusUpdate {
    pub status: String,
    /// Defaults to the time the result is recorded.
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentResponse {
    id: String,
    file_name: String,
    mime_type: String,
    extension: String,
    content: String,
}

/// POST `/upload` — multipart (`file` field) or JSON body.
pub async fn upload_file(
    State(strategy): State<StorageStrategy>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(essence)
        .unwrap_or_default();

    let file = match content_type.as_str() {
        "multipart/form-data" => {
            let multipart = Multipart::from_request(request, &strategy)
                .await
                .map_err(|rej| AppError::new(rej.status(), rej.body_text()))?;
            read_multipart(multipart).await?
        }
        "application/json" => {
            let Json(payload) = Json::<JsonUpload>::from_request(request, &strategy)
                .await
                .map_err(|rej| AppError::new(rej.status(), rej.body_text()))?;
            decode_json_upload(payload)?
        }
        other => {
            return Err(AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!(
                    "expected multipart/form-data or application/json, got `{}`",
                    other
                ),
            ));
        }
    };

    let id = strategy.save(file).await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { id })))
}

/// POST `/upload/stream` — raw body streamed straight into the store.
///
/// `Content-Type` is the file's MIME type; `X-File-Name` carries the name,
/// percent-encoded or not.
pub async fn upload_stream(
    State(strategy): State<StorageStrategy>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(essence)
        .unwrap_or_else(|| OCTET_STREAM.to_string());
    let file_name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(codec::decode_header)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| GatewayError::InvalidUpload("missing X-File-Name header".into()))?;
    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(body_error))
        .boxed();
    let mut file = UploadedFile::new(file_name, mime_type, stream);
    file.size_bytes = declared_size;

    let id = strategy.save(file).await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { id })))
}

/// GET `/{id}` — file details with antivirus status.
pub async fn get_file_details(
    State(strategy): State<StorageStrategy>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let details = strategy.require_details(&id).await?;
    Ok(Json(details))
}

/// GET `/{id}/download?bypassAv=` — streamed file body.
pub async fn download_file(
    State(strategy): State<StorageStrategy>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let details = strategy.require_details(&id).await?;
    strategy.authorize_download(&details, query.bypass_av)?;
    let download = strategy
        .fetch(&details)
        .await?
        .ok_or_else(|| GatewayError::NotFound { id: id.clone() })?;

    let headers = download_headers(&download);
    let mut response = Response::new(Body::from_stream(download.body));
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    Ok(response)
}

/// GET `/{id}/content?bypassAv=` — buffered body as base64 JSON.
pub async fn load_file_content(
    State(strategy): State<StorageStrategy>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, AppError> {
    let details = strategy.require_details(&id).await?;
    strategy.authorize_download(&details, query.bypass_av)?;
    let loaded = strategy
        .load(&details)
        .await?
        .ok_or_else(|| GatewayError::NotFound { id: id.clone() })?;

    Ok(Json(ContentResponse {
        id: loaded.id,
        file_name: loaded.file_name,
        mime_type: loaded.mime_type,
        extension: loaded.extension,
        content: general_purpose::STANDARD.encode(&loaded.data),
    }))
}

/// PUT `/{id}/av-status` — record a scan result as object tags.
pub async fn record_av_status(
    State(strategy): State<StorageStrategy>,
    Path(id): Path<String>,
    Json(update): Json<AvStatusUpdate>,
) -> Result<StatusCode, AppError> {
    let status = update
        .status
        .parse::<AvStatus>()
        .map_err(|UnknownAvStatus(value)| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                format!("unknown antivirus status `{}`", value),
            )
        })?;
    let timestamp = update
        .timestamp
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    if strategy.record_scan(&id, status, &timestamp).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound { id }.into())
    }
}

/// DELETE `/{id}` — unconditional delete.
pub async fn delete_file(
    State(strategy): State<StorageStrategy>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    strategy.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_multipart(mut multipart: Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") && field.file_name().is_none() {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload".to_string());
        let mime_type = field
            .content_type()
            .map(essence)
            .unwrap_or_else(|| OCTET_STREAM.to_string());
        // Bounded by the router's request body limit.
        let data = field.bytes().await.map_err(multipart_error)?;
        return Ok(UploadedFile::from_bytes(file_name, mime_type, data));
    }
    Err(GatewayError::InvalidUpload("multipart body has no file field".into()).into())
}

fn decode_json_upload(payload: JsonUpload) -> Result<UploadedFile, AppError> {
    let data = general_purpose::STANDARD
        .decode(payload.content.as_bytes())
        .map_err(|err| GatewayError::InvalidUpload(format!("content is not base64: {}", err)))?;
    Ok(UploadedFile::from_bytes(
        payload.file_name,
        payload.mime_type,
        data,
    ))
}

/// Request body errors; the router's size limit surfaces as `FileTooLarge`.
fn body_error(err: axum::Error) -> io::Error {
    let inner = err.into_inner();
    if inner.is::<LengthLimitError>() {
        io::Error::new(io::ErrorKind::FileTooLarge, inner)
    } else {
        io::Error::other(inner)
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

/// Media type without parameters, e.g. `text/plain; charset=utf-8` -> `text/plain`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_string()
}

fn download_headers(download: &FileDownload) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&download.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(download.size_bytes.max(0) as u64),
    );

    let file_name = if download.file_name.is_empty() {
        match download.extension.as_str() {
            "" => download.id.clone(),
            ext => format!("{}.{}", download.id, ext),
        }
    } else {
        download.file_name.clone()
    };
    let disposition = format!("attachment; filename*=UTF-8''{}", codec::encode(&file_name));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        routes::routes::routes,
        services::{mime::MimeValidator, sqlite_store::memory_store},
    };
    use axum::http::HeaderName;
    use axum_test::{
        TestServer,
        multipart::{MultipartForm, Part},
    };
    use bytes::Bytes;
    use serde_json::{Value, json};
    use std::sync::Arc;

    async fn server(limit: usize) -> (TestServer, tempfile::TempDir) {
        let (store, dir) = memory_store().await;
        let strategy =
            StorageStrategy::new(Arc::new(store), MimeValidator::default(), "/files", limit);
        let app = routes("/files", limit).with_state(strategy);
        (TestServer::new(app).unwrap(), dir)
    }

    async fn upload_pdf(server: &TestServer) -> String {
        let response = server
            .post("/files/upload")
            .json(&json!({
                "fileName": "test.pdf",
                "mimeType": "application/pdf",
                "content": general_purpose::STANDARD.encode(b"%PDF"),
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<UploadResponse>().id.to_string()
    }

    #[tokio::test]
    async fn json_upload_then_details() {
        let (server, _dir) = server(1024).await;
        let id = upload_pdf(&server).await;

        let response = server.get(&format!("/files/{id}")).await;
        response.assert_status_ok();
        let details = response.json::<Value>();
        assert_eq!(details["name"], "test.pdf");
        assert_eq!(details["contentType"], "application/pdf");
        assert_eq!(details["avStatus"], "NOT_SCANNED");
        assert_eq!(details["avTimestamp"], "");
        assert_eq!(details["links"]["self"], format!("/files/{id}"));
        assert_eq!(details["links"]["download"], format!("/files/{id}/download"));
    }

    #[tokio::test]
    async fn download_is_gated_on_av_status() {
        let (server, _dir) = server(1024).await;
        let id = upload_pdf(&server).await;

        let refused = server.get(&format!("/files/{id}/download")).await;
        refused.assert_status(StatusCode::FORBIDDEN);
        let body = refused.json::<Value>();
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["avStatus"], "NOT_SCANNED");

        let bypassed = server
            .get(&format!("/files/{id}/download"))
            .add_query_param("bypassAv", true)
            .await;
        bypassed.assert_status_ok();
        assert_eq!(bypassed.as_bytes().as_ref(), b"%PDF");
        assert_eq!(bypassed.header(header::CONTENT_TYPE), "application/pdf");
        assert_eq!(
            bypassed.header(header::CONTENT_DISPOSITION),
            "attachment; filename*=UTF-8''test.pdf"
        );
    }

    #[tokio::test]
    async fn clean_scan_allows_download() {
        let (server, _dir) = server(1024).await;
        let id = upload_pdf(&server).await;

        server
            .put(&format!("/files/{id}/av-status"))
            .json(&json!({ "status": "clean", "timestamp": "2024-05-01T10:00:00Z" }))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let details = server.get(&format!("/files/{id}")).await.json::<Value>();
        assert_eq!(details["avStatus"], "CLEAN");
        assert_eq!(details["avTimestamp"], "2024-05-01T10:00:00Z");

        let response = server.get(&format!("/files/{id}/download")).await;
        response.assert_status_ok();
        assert_eq!(response.as_bytes().as_ref(), b"%PDF");

        let content = server.get(&format!("/files/{id}/content")).await.json::<Value>();
        assert_eq!(content["fileName"], "test.pdf");
        assert_eq!(content["extension"], "pdf");
        assert_eq!(content["content"], general_purpose::STANDARD.encode(b"%PDF"));
    }

    #[tokio::test]
    async fn infected_file_stays_refused() {
        let (server, _dir) = server(1024).await;
        let id = upload_pdf(&server).await;
        server
            .put(&format!("/files/{id}/av-status"))
            .json(&json!({ "status": "INFECTED" }))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let response = server.get(&format!("/files/{id}/content")).await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.json::<Value>()["avStatus"], "INFECTED");
    }

    #[tokio::test]
    async fn delete_then_not_found() {
        let (server, _dir) = server(1024).await;
        let id = upload_pdf(&server).await;

        server
            .delete(&format!("/files/{id}"))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/files/{id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get(&format!("/files/{id}/download"))
            .add_query_param("bypassAv", true)
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete(&format!("/files/{id}"))
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn multipart_upload() {
        let (server, _dir) = server(1024).await;
        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(b"hello world".to_vec())
                .file_name("my notes.txt")
                .mime_type("text/plain"),
        );

        let response = server.post("/files/upload").multipart(form).await;
        response.assert_status(StatusCode::CREATED);
        let id = response.json::<UploadResponse>().id;

        let details = server.get(&format!("/files/{id}")).await.json::<Value>();
        assert_eq!(details["name"], "my notes.txt");
        assert_eq!(details["sizeBytes"], 11);
    }

    #[tokio::test]
    async fn streamed_upload_decodes_file_name() {
        let (server, _dir) = server(1024).await;
        let response = server
            .post("/files/upload/stream")
            .add_header(
                HeaderName::from_static(FILE_NAME_HEADER),
                HeaderValue::from_static("r%C3%A9sum%C3%A9%20final.pdf"),
            )
            .bytes(Bytes::from_static(b"%PDF-1.7"))
            .content_type("application/pdf")
            .await;
        response.assert_status(StatusCode::CREATED);
        let id = response.json::<UploadResponse>().id;

        let details = server.get(&format!("/files/{id}")).await.json::<Value>();
        assert_eq!(details["name"], "résumé final.pdf");
        assert_eq!(details["sizeBytes"], 8);
    }

    #[tokio::test]
    async fn plus_in_file_names_is_kept() {
        let (server, _dir) = server(1024).await;
        for name in ["C++ notes.txt", "a+b.txt"] {
            let form = MultipartForm::new().add_part(
                "file",
                Part::bytes(b"notes".to_vec())
                    .file_name(name)
                    .mime_type("text/plain"),
            );
            let response = server.post("/files/upload").multipart(form).await;
            response.assert_status(StatusCode::CREATED);
            let id = response.json::<UploadResponse>().id;
            let details = server.get(&format!("/files/{id}")).await.json::<Value>();
            assert_eq!(details["name"], name, "multipart upload of {name}");

            let response = server
                .post("/files/upload")
                .json(&json!({
                    "fileName": name,
                    "mimeType": "text/plain",
                    "content": general_purpose::STANDARD.encode(b"notes"),
                }))
                .await;
            response.assert_status(StatusCode::CREATED);
            let id = response.json::<UploadResponse>().id;
            let details = server.get(&format!("/files/{id}")).await.json::<Value>();
            assert_eq!(details["name"], name, "json upload of {name}");

            let download = server
                .get(&format!("/files/{id}/download"))
                .add_query_param("bypassAv", true)
                .await;
            download.assert_status_ok();
            assert_eq!(
                download.header(header::CONTENT_DISPOSITION),
                format!("attachment; filename*=UTF-8''{}", codec::encode(name)).as_str()
            );
        }
    }

    #[tokio::test]
    async fn streamed_upload_keeps_literal_plus() {
        let (server, _dir) = server(1024).await;
        let response = server
            .post("/files/upload/stream")
            .add_header(
                HeaderName::from_static(FILE_NAME_HEADER),
                HeaderValue::from_static("C++%20notes.txt"),
            )
            .bytes(Bytes::from_static(b"notes"))
            .content_type("text/plain")
            .await;
        response.assert_status(StatusCode::CREATED);
        let id = response.json::<UploadResponse>().id;

        let details = server.get(&format!("/files/{id}")).await.json::<Value>();
        assert_eq!(details["name"], "C++ notes.txt");
    }

    #[tokio::test]
    async fn disallowed_mime_is_rejected() {
        let (server, _dir) = server(1024).await;
        let response = server
            .post("/files/upload")
            .json(&json!({
                "fileName": "x.bin",
                "mimeType": "application/x-unknown",
                "content": general_purpose::STANDARD.encode(b"abc"),
            }))
            .await;
        response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let (server, _dir) = server(16).await;
        let response = server
            .post("/files/upload/stream")
            .add_header(
                HeaderName::from_static(FILE_NAME_HEADER),
                HeaderValue::from_static("big.txt"),
            )
            .bytes(Bytes::from(vec![b'a'; 64]))
            .content_type("text/plain")
            .await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (server, _dir) = server(1024).await;
        let id = Uuid::new_v4();
        server
            .get(&format!("/files/{id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get("/files/not-a-uuid")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .put(&format!("/files/{id}/av-status"))
            .json(&json!({ "status": "clean" }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_av_status_value_is_bad_request() {
        let (server, _dir) = server(1024).await;
        let id = upload_pdf(&server).await;
        server
            .put(&format!("/files/{id}/av-status"))
            .json(&json!({ "status": "maybe" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[test]
    fn essence_strips_parameters() {
        assert_eq!(essence("text/plain; charset=utf-8"), "text/plain");
        assert_eq!(essence("application/pdf"), "application/pdf");
    }
}
