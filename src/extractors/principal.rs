//! The actor issuing a request, and how it is obtained.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use serde::Serialize;

use crate::state::AppState;

pub const USER_ID_HEADER: &str = "X-Remote-User-Id";
pub const USERNAME_HEADER: &str = "X-Remote-User";
pub const STAFF_HEADER: &str = "X-Remote-User-Staff";
pub const SUPERUSER_HEADER: &str = "X-Remote-User-Superuser";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: Option<i64>,
    pub username: String,
    pub is_authenticated: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: i64, username: impl Into<String>) -> Self {
        Principal {
            id: Some(id),
            username: username.into(),
            is_authenticated: true,
            is_staff: false,
            is_superuser: false,
        }
    }

    pub fn staff(id: i64, username: impl Into<String>) -> Self {
        Principal {
            is_staff: true,
            ..Self::user(id, username)
        }
    }
}

/// Supplies the principal bound to the current request (session, token, proxy headers…).
#[async_trait]
pub trait PrincipalProvider: Send + Sync {
    async fn principal(&self, parts: &Parts) -> Principal;
}

/// Trusts identity headers set by an authenticating reverse proxy. Only mount behind a
/// proxy that strips these headers from client requests.
#[derive(Clone, Debug, Default)]
pub struct HeaderPrincipalProvider;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name)
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[async_trait]
impl PrincipalProvider for HeaderPrincipalProvider {
    async fn principal(&self, parts: &Parts) -> Principal {
        let id = header_str(&parts.headers, USER_ID_HEADER).and_then(|s| s.parse::<i64>().ok());
        let Some(id) = id else {
            return Principal::anonymous();
        };
        Principal {
            id: Some(id),
            username: header_str(&parts.headers, USERNAME_HEADER)
                .unwrap_or_default()
                .to_string(),
            is_authenticated: true,
            is_staff: header_flag(&parts.headers, STAFF_HEADER),
            is_superuser: header_flag(&parts.headers, SUPERUSER_HEADER),
        }
    }
}

/// Extractor resolving the principal through the state's provider.
#[derive(Clone, Debug)]
pub struct CurrentPrincipal(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for CurrentPrincipal {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(CurrentPrincipal(state.principals.principal(parts).await))
    }
}
