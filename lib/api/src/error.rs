use actix_web::http::StatusCode;
use actix_web::{error, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use storefront_core::{Error, ErrorKind};

/// An [`Error`] rendered as `{"error": {"kind", "id", "message"}}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: ErrorKind,
    id: Option<&'a str>,
    message: String,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Constraint
            | ErrorKind::InvalidTransition
            | ErrorKind::ConcurrentModification => StatusCode::CONFLICT,
            ErrorKind::Dimension => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal failures keep their detail in the log, not the response.
        let message = match self.0.kind() {
            ErrorKind::Internal => {
                tracing::error!(error = %self.0, "request failed");
                "internal error".to_string()
            }
            _ => self.0.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: ErrorDetail {
                kind: self.0.kind(),
                id: self.0.identifier(),
                message,
            },
        })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Malformed JSON bodies become validation errors.
pub fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError(Error::validation("body", err.to_string())).into()
}

pub fn path_error_handler(err: error::PathError, req: &HttpRequest) -> actix_web::Error {
    ApiError(Error::validation(req.path(), err.to_string())).into()
}

pub fn query_error_handler(err: error::QueryPayloadError, req: &HttpRequest) -> actix_web::Error {
    ApiError(Error::validation(req.path(), err.to_string())).into()
}
