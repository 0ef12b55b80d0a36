use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use snafu::{Location, ResultExt, Snafu};

use crate::database::DatabaseError;
use crate::model::InvalidSlug;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("{what} not found"))]
    NotFound { what: &'static str },

    #[snafu(display("{message}"))]
    Conflict { message: String },

    #[snafu(display("{message}"))]
    Validation { message: String },

    #[snafu(display("authentication required"))]
    Unauthorized,

    #[snafu(display("invalid email or password"))]
    InvalidCredentials,

    #[snafu(display("internal server error"))]
    Database {
        source: DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Validation {
            message: errors.to_string(),
        }
    }
}

impl From<InvalidSlug> for ApiError {
    fn from(error: InvalidSlug) -> Self {
        ApiError::Validation {
            message: error.to_string(),
        }
    }
}

pub(crate) trait OrConflict<T> {
    /// Answer 409 with `message` when a unique index rejected the write.
    fn or_conflict(self, message: &str) -> Result<T, ApiError>;
}

impl<T> OrConflict<T> for Result<T, DatabaseError> {
    #[track_caller]
    fn or_conflict(self, message: &str) -> Result<T, ApiError> {
        match self {
            Err(error) if error.is_unique_violation() => ConflictSnafu { message }.fail(),
            other => other.context(DatabaseSnafu),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Database { source, location } = &self {
            tracing::error!(error = %source, %location, "database failure while serving a request");
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
