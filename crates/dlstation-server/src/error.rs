use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::catalog::MIN_PASSWORD_LEN;

/// Every failure the catalog reports to a caller.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{0} required")]
    MissingField(&'static str),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("new password must be at least {} characters", MIN_PASSWORD_LEN)]
    WeakPassword,

    #[error("unauthorized")]
    Unauthenticated,

    #[error("file not found")]
    NotFound,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl CatalogError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingField(_) | Self::WeakPassword | Self::MalformedRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidCredentials | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidCredentials => "invalid_credentials",
            Self::WeakPassword => "weak_password",
            Self::Unauthenticated => "unauthenticated",
            Self::NotFound => "not_found",
            Self::MalformedRequest(_) => "malformed_request",
            Self::Storage(_) => "storage_failure",
        }
    }
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Storage(e) => {
                tracing::error!(error = %format!("{e:#}"), "storage failure");
                "internal server error".to_owned()
            }
            other => other.to_string(),
        };

        (
            self.status(),
            Json(json!({
                "success": false,
                "message": message,
                "error": self.code(),
            })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for CatalogError {
    fn from(rejection: JsonRejection) -> Self {
        Self::MalformedRequest(rejection.body_text())
    }
}

impl From<PathRejection> for CatalogError {
    fn from(rejection: PathRejection) -> Self {
        Self::MalformedRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for CatalogError {
    fn from(rejection: QueryRejection) -> Self {
        Self::MalformedRequest(rejection.body_text())
    }
}
