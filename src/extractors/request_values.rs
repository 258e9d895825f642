//! Named request values looked up across route params, query string, form body, JSON
//! body and headers, in that order.

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts, RawPathParams, Request},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::state::AppState;
use crate::text::value_to_string;

/// Route param carrying `<pk>:<slug>` or `<slug>`; expanded into `pk` and `slug`.
pub const IDENT_PARAM: &str = "ident";

#[derive(Clone, Debug, Default)]
pub struct RequestValues {
    method: Method,
    path: String,
    route: Vec<(String, String)>,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    json: Map<String, Value>,
    headers: HeaderMap,
}

fn non_empty(v: &str) -> Option<&str> {
    Some(v).filter(|s| !s.is_empty())
}

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .filter(|(k, _)| k == key)
        .find_map(|(_, v)| non_empty(v))
}

/// `HTTP_<NAME>` the way CGI environments expose request headers.
fn cgi_name(key: &str) -> String {
    format!("HTTP_{}", key.replace('-', "_").to_ascii_uppercase())
}

fn parse_urlencoded(raw: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw).into_owned().collect()
}

/// Split an `ident` route param into `pk` and `slug` params.
fn expand_ident(route: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(route.len() + 1);
    for (k, v) in route {
        if k != IDENT_PARAM {
            out.push((k, v));
            continue;
        }
        match v.split_once(':') {
            Some((pk, slug)) if pk.parse::<i64>().is_ok() => {
                out.push(("pk".into(), pk.to_string()));
                out.push(("slug".into(), slug.to_string()));
            }
            _ => out.push(("slug".into(), v)),
        }
    }
    out
}

impl RequestValues {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RequestValues {
            method,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, key: &str, value: &str) -> Self {
        let expanded = expand_ident(vec![(key.to_string(), value.to_string())]);
        self.route.extend(expanded);
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_form(mut self, key: &str, value: &str) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    /// Merge a JSON object body; non-objects are ignored.
    pub fn with_json(mut self, body: Value) -> Self {
        if let Value::Object(map) = body {
            self.json.extend(map);
        }
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(n), Ok(v)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            self.headers.append(n, v);
        }
        self
    }

    /// First non-empty value for `key`. JSON scalars are stringified; JSON objects and
    /// arrays are only reachable through [`RequestValues::json_value`].
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.get_before_json(key) {
            return Some(v.to_string());
        }
        match self.json.get(key) {
            Some(Value::Null) | Some(Value::Array(_)) | Some(Value::Object(_)) | None => {}
            Some(v) => {
                let s = value_to_string(v);
                if !s.is_empty() {
                    return Some(s);
                }
            }
        }
        let wanted = cgi_name(key);
        self.headers
            .iter()
            .find(|(name, _)| cgi_name(name.as_str()) == wanted)
            .and_then(|(_, v)| v.to_str().ok())
            .and_then(non_empty)
            .map(str::to_string)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// First non-empty value for `key` from the route, the query string or a form body.
    pub fn get_before_json(&self, key: &str) -> Option<&str> {
        lookup(&self.route, key)
            .or_else(|| lookup(&self.query, key))
            .or_else(|| lookup(&self.form, key))
    }

    /// Structured value from the JSON body.
    pub fn json_value(&self, key: &str) -> Option<&Value> {
        self.json.get(key).filter(|v| !v.is_null())
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Route params after `ident` expansion, in declaration order.
    pub fn route_params(&self) -> &[(String, String)] {
        &self.route
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl FromRequest<AppState> for RequestValues {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let route = match RawPathParams::from_request_parts(&mut parts, state).await {
            Ok(params) => params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };
        let query = parts
            .uri
            .query()
            .map(|q| parse_urlencoded(q.as_bytes()))
            .unwrap_or_default();

        let bytes = axum::body::to_bytes(body, state.settings.body_limit)
            .await
            .map_err(|e| AppError::InvalidRequest(format!("the request body could not be read: {}", e)))?;
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let mut form = Vec::new();
        let mut json = Map::new();
        if content_type.starts_with("application/x-www-form-urlencoded") {
            form = parse_urlencoded(&bytes);
        } else if !bytes.is_empty() {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => json = map,
                Ok(_) => tracing::debug!("ignoring non-object JSON body"),
                Err(e) => tracing::debug!(error = %e, "ignoring body that is not JSON"),
            }
        }

        Ok(RequestValues {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            route: expand_ident(route),
            query,
            form,
            json,
            headers: parts.headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_beats_query_beats_form_beats_json() {
        let v = RequestValues::new(Method::POST, "/")
            .with_route("field", "tags")
            .with_query("field", "genre")
            .with_query("q", "dune")
            .with_form("q", "hobbit")
            .with_form("format", "json")
            .with_json(serde_json::json!({"format": "html", "limit": 3}));
        assert_eq!(v.get("field").as_deref(), Some("tags"));
        assert_eq!(v.get("q").as_deref(), Some("dune"));
        assert_eq!(v.get("format").as_deref(), Some("json"));
        assert_eq!(v.get("limit").as_deref(), Some("3"));
        assert_eq!(v.get("missing"), None);
    }

    #[test]
    fn empty_values_count_as_absent() {
        let v = RequestValues::new(Method::GET, "/")
            .with_query("q", "")
            .with_json(serde_json::json!({"q": "fallback"}));
        assert_eq!(v.get("q").as_deref(), Some("fallback"));
        assert_eq!(v.get_or("format", "html"), "html");
    }

    #[test]
    fn headers_match_by_cgi_name() {
        let v = RequestValues::new(Method::POST, "/").with_header("x-csrftoken", "abc");
        assert_eq!(v.get("x-csrftoken").as_deref(), Some("abc"));
        assert_eq!(v.get("X_CSRFTOKEN").as_deref(), Some("abc"));
    }

    #[test]
    fn ident_is_split_into_pk_and_slug() {
        let v = RequestValues::new(Method::GET, "/").with_route("ident", "12:dune");
        assert_eq!(v.get("pk").as_deref(), Some("12"));
        assert_eq!(v.get("slug").as_deref(), Some("dune"));

        let v = RequestValues::new(Method::GET, "/").with_route("ident", "dune");
        assert_eq!(v.get("pk"), None);
        assert_eq!(v.get("slug").as_deref(), Some("dune"));

        let v = RequestValues::new(Method::GET, "/").with_route("ident", "12:");
        assert_eq!(v.get("pk").as_deref(), Some("12"));
        assert_eq!(v.get("slug"), None);
    }

    #[test]
    fn structured_json_is_separate() {
        let v = RequestValues::new(Method::POST, "/")
            .with_json(serde_json::json!({"new_value": {"key": "slug", "value": "x"}}));
        assert_eq!(v.get("new_value"), None);
        assert_eq!(v.json_value("new_value").unwrap()["key"], "slug");
    }

    #[test]
    fn reads_cookies() {
        let v = RequestValues::new(Method::GET, "/").with_header("cookie", "sessionid=s1; csrftoken=t1");
        assert_eq!(v.cookie("sessionid").as_deref(), Some("s1"));
        assert_eq!(v.cookie("csrftoken").as_deref(), Some("t1"));
        assert_eq!(v.cookie("other"), None);
    }
}
