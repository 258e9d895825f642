//! Response envelope shared by every endpoint, success or failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::AppError;
use crate::messages::{Level, Message, MessageLog};

#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    pub status: u16,
    pub messages: Vec<Message>,
    pub payload: Vec<Value>,
    #[serde(rename = "__meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Diagnostics returned to staff callers only.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Meta {
    pub model: Option<String>,
    pub object: Option<String>,
    pub attribute: Option<String>,
    pub debug: bool,
    pub request_user: RequestUser,
    pub request: RequestMeta,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RequestUser {
    pub id: Option<i64>,
    pub username: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RequestMeta {
    pub path: String,
    pub method: String,
    pub handler: String,
    pub resolver: String,
    /// Route params as `url_<name>`.
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
}

impl Envelope {
    pub fn new(status: StatusCode, messages: Vec<Message>, payload: Vec<Value>) -> Self {
        Envelope {
            status: status.as_u16(),
            messages,
            payload,
            meta: None,
            traceback: None,
        }
    }

    /// Bare error envelope for failures outside a request context (extractor rejections).
    pub fn from_error(err: &AppError) -> Self {
        let mut log = MessageLog::new();
        log.add(err.user_message(), Level::Error);
        Envelope::new(err.status(), log.get(false), Vec::new())
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}
