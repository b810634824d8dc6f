//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that probes the object store (SQLite + disk)

use crate::services::{object_store::ReadinessCheck, strategy::StorageStrategy};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs the object store's readiness probes. HTTP 200 when all pass,
/// HTTP 503 when any fails.
pub async fn readyz(State(strategy): State<StorageStrategy>) -> impl IntoResponse {
    let checks = strategy.store().ready_checks().await;
    let overall_ok = checks.iter().all(|c| c.ok);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: Vec<ReadinessCheck>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{mime::MimeValidator, object_store::MockObjectStore};
    use std::sync::Arc;

    fn strategy_with(checks: Vec<ReadinessCheck>) -> StorageStrategy {
        let mut store = MockObjectStore::new();
        store
            .expect_ready_checks()
            .returning(move || checks.clone());
        StorageStrategy::new(Arc::new(store), MimeValidator::default(), "/files", 1024)
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reports_failed_probe() {
        let strategy = strategy_with(vec![
            ReadinessCheck {
                name: "sqlite",
                ok: true,
                error: None,
            },
            ReadinessCheck {
                name: "disk",
                ok: false,
                error: Some("could not write tmp file".into()),
            },
        ]);
        let response = readyz(State(strategy)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readyz_ok_when_all_pass() {
        let strategy = strategy_with(vec![ReadinessCheck {
            name: "sqlite",
            ok: true,
            error: None,
        }]);
        let response = readyz(State(strategy)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
