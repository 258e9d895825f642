//! Attribute routes. Each path is registered with and without a trailing slash, and each
//! route carries its `RouteInfo` so handlers and diagnostics know how they were reached.

use crate::handlers::attribute::{add_form, get_attributes, get_suggestions, set_attribute};
use crate::service::RouteInfo;
use crate::state::AppState;
use axum::{
    routing::{get, MethodRouter},
    Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

pub const GET_ATTRIBUTES: &str = "json-get-attributes";
pub const GET_ATTRIBUTES_FOR_SELF: &str = "json-get-attributes-for-self";
pub const GET_SUGGESTIONS: &str = "json-get-suggestions";
pub const GET_SUGGESTIONS_FOR_SELF: &str = "json-get-suggestions-for-self";
pub const SET_ATTRIBUTE: &str = "json-set-attribute";
pub const SET_ATTRIBUTE_FOR_SELF: &str = "json-set-attribute-for-self";
pub const SUGGESTION_FORM: &str = "json-suggestion-form";

fn info(name: &'static str, handler: &'static str, self_scoped: bool) -> Extension<RouteInfo> {
    Extension(RouteInfo {
        name,
        handler,
        self_scoped,
    })
}

fn both(router: Router<AppState>, path: &str, method: MethodRouter<AppState>) -> Router<AppState> {
    router
        .route(path, method.clone())
        .route(&format!("{}/", path), method)
}

/// Attribute routes, relative to the mount prefix (see `GatewaySettings::prefix`).
pub fn attribute_routes(state: AppState) -> Router {
    let body_limit = state.settings.body_limit;
    let mut router = Router::new();
    router = both(
        router,
        "/:model/:ident/attribute/:field",
        get(get_attributes).layer(info(GET_ATTRIBUTES, "get_attributes", false)),
    );
    router = both(
        router,
        "/:model/attribute/:field",
        get(get_attributes).layer(info(GET_ATTRIBUTES_FOR_SELF, "get_attributes", true)),
    );
    router = both(
        router,
        "/:model/:ident/suggest/:field",
        get(get_suggestions).layer(info(GET_SUGGESTIONS, "get_suggestions", false)),
    );
    router = both(
        router,
        "/:model/suggest/:field",
        get(get_suggestions).layer(info(GET_SUGGESTIONS_FOR_SELF, "get_suggestions", true)),
    );
    router = both(
        router,
        "/:model/:ident/set/:field",
        get(set_attribute)
            .post(set_attribute)
            .layer(info(SET_ATTRIBUTE, "set_attribute", false)),
    );
    router = both(
        router,
        "/:model/set/:field",
        get(set_attribute)
            .post(set_attribute)
            .layer(info(SET_ATTRIBUTE_FOR_SELF, "set_attribute", true)),
    );
    router = both(
        router,
        "/:model/:ident/add/:field",
        get(add_form).layer(info(SUGGESTION_FORM, "add_form", false)),
    );
    router
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(body_limit)))
        .with_state(state)
}
