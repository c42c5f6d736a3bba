use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::types::ErrorResponse;

pub const INVALID_INPUT_MESSAGE: &str = "Invalid input. Expecting an array of features.";

/// Everything that can stop a predict request from producing a label.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    /// `features` was missing or not an array.
    #[error("{}", INVALID_INPUT_MESSAGE)]
    InvalidInput,

    /// Body decoding, feature conversion or the classifier itself failed.
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

impl PredictError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PredictError::InvalidInput => StatusCode::BAD_REQUEST,
            PredictError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::InvalidInput => "invalid_input",
            PredictError::Execution(_) => "execution",
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (self.status_code(), body).into_response()
    }
}
