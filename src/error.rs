use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
}

/// Every failure a handler can surface. Each variant maps to one status code
/// and one stable `code` string in the JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    CaptchaRejected(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    TranscriptMissing(String),

    /// The extraction tool reported that the video needs a signed-in session.
    #[error("{0}")]
    AuthRequired(String),

    #[error("{0}")]
    Extraction(String),

    #[error("{0}")]
    Transcode(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::CaptchaRejected(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::TranscriptMissing(_) => StatusCode::NOT_FOUND,
            Self::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            Self::Extraction(_) => StatusCode::BAD_GATEWAY,
            Self::Transcode(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::CaptchaRejected(_) => "CAPTCHA_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::TranscriptMissing(_) => "TRANSCRIPT_NOT_FOUND",
            Self::AuthRequired(_) => "AUTH_REQUIRED",
            Self::Extraction(_) => "EXTRACTION_FAILED",
            Self::Transcode(_) => "TRANSCODE_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether another quality tier could plausibly succeed after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Extraction(_))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "{self}");
        }

        let body = Json(ErrorBody {
            success: false,
            error: self.to_string(),
            code: self.code(),
        });

        (status, body).into_response()
    }
}
