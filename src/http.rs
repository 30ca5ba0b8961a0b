//! HTTP transport: JSON routes over the record service.

use crate::core::error::BackroomError;
use crate::core::store::payload_from_value;
use crate::service::Backroom;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;

type AppState = Arc<Backroom>;

#[derive(Debug, Deserialize)]
struct RecordBody {
    #[serde(default)]
    cage: String,
    data: Value,
}

impl RecordBody {
    fn parse(body: &[u8]) -> Result<Self, BackroomError> {
        serde_json::from_slice(body).map_err(|e| {
            BackroomError::ValidationError(format!("request body must be {{\"cage\", \"data\"}}: {}", e))
        })
    }
}

/// Error response carrying the status mapping for `BackroomError`.
pub struct ApiError(BackroomError);

impl From<BackroomError> for ApiError {
    fn from(err: BackroomError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &BackroomError) -> StatusCode {
    match err {
        BackroomError::InvalidId { .. }
        | BackroomError::ValidationError(_)
        | BackroomError::JsonError(_) => StatusCode::BAD_REQUEST,
        BackroomError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let mut body = json!({ "error": self.0.to_string() });
        if let BackroomError::HookFailed {
            action,
            record_id,
            source,
        } = &self.0
        {
            body["record_id"] = json!(record_id);
            body["action"] = json!(action);
            body["hook_error"] = json!(source.to_string());
        }
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

/// Runs a service call on the blocking pool; the store and adapters are sync.
async fn blocking<T, F>(app: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Backroom) -> Result<T, BackroomError> + Send + 'static,
    T: Send + 'static,
{
    let app = Arc::clone(app);
    tokio::task::spawn_blocking(move || f(&app))
        .await
        .map_err(|e| {
            BackroomError::IoError(std::io::Error::other(format!("worker task failed: {}", e)))
        })?
        .map_err(ApiError)
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/record/create", post(create_record))
        .route(
            "/record/:id",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/cage/:key", get(list_cage).delete(delete_cage))
        .route("/cages", get(list_cages))
        .with_state(app)
}

/// Serves until Ctrl-C.
pub async fn serve(listener: TcpListener, app: AppState) -> Result<(), BackroomError> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "backroom listening");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn create_record(State(app): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = RecordBody::parse(&body)?;
    let data = payload_from_value(body.data)?;
    let record = blocking(&app, move |svc| svc.create_record(&body.cage, data)).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn get_record(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = blocking(&app, move |svc| svc.get_record(&id)).await?;
    Ok(Json(record).into_response())
}

async fn update_record(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = RecordBody::parse(&body)?;
    let data = payload_from_value(body.data)?;
    let record =
        blocking(&app, move |svc| svc.update_record(&id, Some(body.cage.as_str()), data)).await?;
    Ok(Json(record).into_response())
}

async fn delete_record(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    blocking(&app, move |svc| svc.delete_record(&id)).await?;
    Ok(Json(json!({ "success": true, "deleted": 1 })).into_response())
}

async fn list_cage(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let records = blocking(&app, move |svc| svc.list_records(&key)).await?;
    Ok(Json(records).into_response())
}

async fn delete_cage(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let deleted = blocking(&app, move |svc| svc.delete_cage(&key)).await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })).into_response())
}

async fn list_cages(State(app): State<AppState>) -> Result<Response, ApiError> {
    let cages = blocking(&app, |svc| svc.list_cages()).await?;
    Ok(Json(cages).into_response())
}
