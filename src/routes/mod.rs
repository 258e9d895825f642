//! Route tables.

pub mod attribute;
pub mod common;

pub use attribute::attribute_routes;
pub use common::common_routes;

use crate::state::AppState;
use axum::Router;

/// Attribute routes nested under the configured prefix, plus the common routes at the root.
pub fn gateway_router(state: AppState) -> Router {
    let prefix = state.settings.prefix.trim_end_matches('/').to_string();
    let attributes = attribute_routes(state.clone());
    let router = if prefix.is_empty() {
        attributes
    } else {
        Router::new().nest(&prefix, attributes)
    };
    router.merge(common_routes(state))
}
