//! Anti-forgery tokens bound to the session: `hex(HMAC-SHA256(secret, session id))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::GatewaySettings;
use crate::error::AppError;
use crate::extractors::RequestValues;
use crate::messages::MessageLog;

type HmacSha256 = Hmac<Sha256>;

/// Form field carrying the token.
pub const TOKEN_FIELD: &str = "csrfmiddlewaretoken";
/// Header carrying the token (looked up by its CGI name).
pub const TOKEN_HEADER: &str = "x-csrftoken";

/// Token for a session, for the side that renders forms. None when the secret is empty.
pub fn issue_token(secret: &str, session_id: &str) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(session_id.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify(secret: &str, session_id: &str, token: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(token.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(session_id.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Reject mutating requests without a valid token. Skipped in debug mode.
pub fn check(settings: &GatewaySettings, values: &RequestValues, messages: &mut MessageLog) -> Result<(), AppError> {
    if settings.debug {
        messages.debug("Csrf check skipped in debug mode");
        return Ok(());
    }
    let token = values
        .get(TOKEN_FIELD)
        .or_else(|| values.get(TOKEN_HEADER))
        .ok_or_else(|| AppError::Forbidden("csrf token is missing or invalid".into()))?;
    let Some(session) = values.cookie(&settings.session_cookie) else {
        tracing::warn!(path = %values.path(), "csrf token sent without a session cookie");
        return Err(AppError::Forbidden("csrf token is missing or invalid".into()));
    };
    if !verify(&settings.csrf_secret, &session, &token) {
        tracing::warn!(path = %values.path(), "csrf token rejected");
        return Err(AppError::Forbidden("invalid csrf token".into()));
    }
    Ok(())
}
