use http::StatusCode;
use thiserror::Error;

use crate::http::Response;

/// Body returned when a chirp identifier is unknown or invalid.
pub const CHIRP_NOT_FOUND: &str = "Chirp not found";

/// Body returned for unknown routes and missing static files.
pub const ROUTE_NOT_FOUND: &str = "404 Not Found";

/// Failures a handler reports to its client instead of dropping the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    MalformedBody(String),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response {
        let status = self.status();
        match self {
            // Internal details stay in the log.
            ApiError::Internal(_) => Response::text(status, "Internal Server Error"),
            other => Response::text(status, other.to_string()),
        }
    }
}
