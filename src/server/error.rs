use crate::error::CropOpsError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// A `CropOpsError` on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub CropOpsError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CropOpsError::NotFound(_) => StatusCode::NOT_FOUND,
            CropOpsError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CropOpsError::AlreadyRunning(_)
            | CropOpsError::RepositionNotAllowed(_)
            | CropOpsError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CropOpsError> for ApiError {
    fn from(err: CropOpsError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
