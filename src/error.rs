//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::response::Envelope;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("ambiguous reference: {kind} '{id}' matches more than one entity type")]
    AmbiguousReference { kind: &'static str, id: String },
    #[error("duplicate entity type: {0}")]
    DuplicateType(String),
    #[error("duplicate field: {entity}.{field}")]
    DuplicateField { entity: String, field: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown entity type: {0}")]
    UnknownType(String),
    #[error("unknown field: {entity}.{field}")]
    UnknownField { entity: String, field: String },
    #[error("{entity} object ({pk}) does not exist")]
    Missing { entity: String, pk: i64 },
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

/// Request-level errors. Every variant carries a human-readable sentence that ends up
/// as an `error` message in the response envelope.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Ambiguous(String),
    #[error("render: {0}")]
    Render(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidRequest(_) | AppError::Ambiguous(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Render(_) | AppError::Internal(_) | AppError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Store(StoreError::Missing { .. }) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Ambiguous(_) => "ambiguous",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Render(_) => "render_error",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Store(_) => "store_error",
        }
    }

    /// Unanticipated failures; only these may expose a traceback to privileged callers.
    pub fn is_internal(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Sentence shown to the caller.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Forbidden(m)
            | AppError::InvalidRequest(m)
            | AppError::NotFound(m)
            | AppError::Conflict(m)
            | AppError::Ambiguous(m) => crate::text::capitalize(m),
            AppError::Render(m) => format!("Error rendering attribute: {}", m),
            AppError::Store(StoreError::Missing { .. }) => crate::text::capitalize(&self.to_string()),
            AppError::Internal(_) | AppError::Config(_) | AppError::Store(_) => {
                format!("An unexpected error occurred: {}", self)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::debug!(code = self.code(), error = %self, "request failed outside a request context");
        Envelope::from_error(&self).into_response()
    }
}
