use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_auth::AuthError;
use thiserror::Error;

use crate::envelope::Envelope;
use crate::validation::FieldErrors;

pub const INVALID_CREDENTIALS_MESSAGE: &str = "username or password incorrect";

/// Every failure the HTTP boundary can produce. Each renders as a failure
/// envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Wrong username or password. Rendered with status 200.
    #[error("username or password incorrect")]
    InvalidCredentials,
    #[error("invalid request: {0}")]
    Validation(FieldErrors),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials => StatusCode::OK,
            ApiError::Validation(_) | ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Only the first field error is surfaced.
        let message = match self {
            ApiError::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE.to_string(),
            ApiError::Validation(errors) => errors.into_first().message,
            ApiError::MalformedBody(message) => message,
        };

        let mut response = Json(Envelope::<()>::failure(message)).into_response();
        *response.status_mut() = status;
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let reason = rejection.body_text();
        tracing::debug!(
            event = "body_rejected",
            status = rejection.status().as_u16(),
            reason = %reason
        );
        ApiError::MalformedBody(reason)
    }
}
