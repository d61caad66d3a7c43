use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pdf_troubleshoot_core::{
    validate_file_name, IngestPipeline, PipelineError, TroubleshootingAnswer, ValidationError,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const INGEST_ROUTE: &str = "/api/documents/ingest";
const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(INGEST_ROUTE, post(ingest_document))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
}

#[derive(Debug)]
enum ApiError {
    Validation(ValidationError),
    Upload(MultipartError),
    Pipeline(PipelineError),
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error)
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        Self::Pipeline(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Validation(error) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: error.to_string(),
                    kind: None,
                    retryable: None,
                },
            ),
            Self::Upload(error) => (
                error.status(),
                ErrorBody {
                    error: error.body_text(),
                    kind: None,
                    retryable: None,
                },
            ),
            Self::Pipeline(error) => {
                error!(kind = error.kind(), error = %error, "ingest failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: error.to_string(),
                        kind: Some(error.kind()),
                        retryable: Some(error.is_retryable()),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

async fn ingest_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TroubleshootingAnswer>, ApiError> {
    // Requests that are not multipart at all carry no file part either.
    let mut multipart = multipart.map_err(|_| ValidationError::MissingFilePart)?;

    while let Some(field) = multipart.next_field().await.map_err(ApiError::Upload)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        // A part without a filename is a plain form value, not an uploaded file.
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        validate_file_name(&file_name)?;

        let document = field.bytes().await.map_err(ApiError::Upload)?;
        info!(file_name = %file_name, bytes = document.len(), "upload accepted");

        let answer = state.pipeline.ingest(&document).await?;
        return Ok(Json(answer));
    }

    Err(ValidationError::MissingFilePart.into())
}
