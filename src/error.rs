//! Handler errors.
//!
//! Every failure is logged (warn for 4xx, error for 5xx) and its message is
//! written verbatim as a plain-text body.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad or missing input.
    #[error("{0}")]
    Validation(String),

    /// Carries the value for the `Allow` header.
    #[error("Method Not Allowed")]
    MethodNotAllowed { allow: &'static str },

    /// The store, the device hub or the push channel failed.
    #[error("{0}")]
    Upstream(String),
}

impl AppError {
    /// Wrap an upstream failure as `"{what}: {err}"`.
    pub fn upstream(what: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Upstream(format!("{what}: {err}"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            error!(%status, "{message}");
        } else {
            warn!(%status, "{message}");
        }

        match self {
            AppError::MethodNotAllowed { allow } => {
                (status, [(header::ALLOW, allow)], format!("{message}\n")).into_response()
            }
            _ => (status, format!("{message}\n")).into_response(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
