//! Robot-facing HTTP surface (spec §5): pull a batch, upload its result,
//! refresh a batch's presigned URLs. Handler shape — `State<Arc<AppState>>`,
//! a typed `Json` body or raw `Bytes`, `impl IntoResponse` returning a
//! `(StatusCode, Json(...))` tuple on error — follows the teacher's REST
//! handlers; the one addition is verifying each request's HMAC signature
//! before any handler body runs.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use destiny_engine::EventPersister;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::hmac_auth::{self, ROBOT_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::{batch, OrchestratorEngine};

pub struct AppState<P: EventPersister> {
    pub engine: OrchestratorEngine<P>,
}

pub fn router<P: EventPersister + Send + Sync + 'static>(state: Arc<AppState<P>>) -> Router {
    Router::new()
        .route("/robot-enhancement-batches/", post(pull_batch::<P>))
        .route("/robot-enhancement-batches/{batch_id}/results/", post(submit_result::<P>))
        .route("/robot-enhancement-batches/{batch_id}/", get(refresh_batch::<P>))
        .with_state(state)
}

fn error_response(status: StatusCode, message: String) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn authenticate<P: EventPersister>(
    engine: &OrchestratorEngine<P>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Uuid, axum::response::Response> {
    let robot_id = headers
        .get(ROBOT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing or invalid robot id header".to_string()))?;
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing timestamp header".to_string()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing signature header".to_string()))?;

    hmac_auth::verify_robot_request(engine.deps(), robot_id, timestamp, signature, body)
        .await
        .map(|robot| robot.id)
        .map_err(|e| error_response(StatusCode::UNAUTHORIZED, e.to_string()))
}

#[derive(Deserialize, Default)]
struct PullBatchRequest {
    #[serde(default = "default_max_size")]
    max_size: usize,
}

fn default_max_size() -> usize {
    50
}

#[derive(Serialize)]
struct PulledBatchView {
    batch_id: Uuid,
    reference_storage_url: String,
    result_storage_url: String,
    deadline: chrono::DateTime<chrono::Utc>,
}

async fn pull_batch<P: EventPersister>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let robot_id = match authenticate(&state.engine, &headers, &body).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let request: PullBatchRequest = if body.is_empty() {
        PullBatchRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid body: {e}")),
        }
    };

    match batch::pull_batch(&state.engine, robot_id, request.max_size).await {
        Ok(Some(pulled)) => Json(PulledBatchView {
            batch_id: pulled.batch_id,
            reference_storage_url: pulled.reference_storage_url,
            result_storage_url: pulled.result_storage_url,
            deadline: pulled.deadline,
        })
        .into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(error = %e, %robot_id, "pull_batch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Deserialize, Default)]
struct SubmitResultRequest {
    error: Option<String>,
}

async fn submit_result<P: EventPersister>(
    State(state): State<Arc<AppState<P>>>,
    Path(batch_id): Path<Uuid>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    if let Err(resp) = authenticate(&state.engine, &headers, &body).await {
        return resp;
    }

    let request: SubmitResultRequest = if body.is_empty() {
        SubmitResultRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid body: {e}")),
        }
    };

    match batch::record_result(&state.engine, batch_id, request.error).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(error = %e, %batch_id, "record_result failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Serialize)]
struct BatchView {
    batch_id: Uuid,
    reference_storage_url: String,
    result_storage_url: String,
    deadline: chrono::DateTime<chrono::Utc>,
}

async fn refresh_batch<P: EventPersister>(
    State(state): State<Arc<AppState<P>>>,
    Path(batch_id): Path<Uuid>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(resp) = authenticate(&state.engine, &headers, b"").await {
        return resp;
    }

    match state.engine.deps().store.get_batch(batch_id).await {
        Ok(Some(existing)) => Json(BatchView {
            batch_id: existing.id,
            reference_storage_url: existing.reference_storage_url,
            result_storage_url: existing.result_storage_url,
            deadline: existing.deadline,
        })
        .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, %batch_id, "refresh_batch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
