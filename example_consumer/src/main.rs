//! Example consumer: a separate project that embeds attribute-gateway with a custom
//! computed field and a session-cookie identity source.
//!
//! Run from repo root: `cargo run -p example-consumer`

use async_trait::async_trait;
use attribute_gateway::config::{Computed, TypeDescriptor};
use attribute_gateway::store::Record;
use attribute_gateway::{
    gateway_router, resolve_with_computed, AppState, ComputedRegistry, DataStore, GatewaySettings, JinjaRenderer,
    MemoryStore, Principal, PrincipalProvider, RegistryConfig,
};
use axum::http::{header, request::Parts};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Number of words in the record's `summary`.
#[derive(Debug)]
struct WordCount;

#[async_trait]
impl Computed for WordCount {
    async fn compute(&self, _store: &dyn DataStore, _entity: &TypeDescriptor, record: &Record) -> Result<Value, String> {
        let words = record
            .get("summary")
            .and_then(Value::as_str)
            .map(|s| s.split_whitespace().count())
            .unwrap_or(0);
        Ok(Value::from(words as u64))
    }
}

/// Maps a fixed set of session cookies to users. Stands in for a real session store.
struct SessionPrincipals {
    sessions: HashMap<String, Principal>,
}

#[async_trait]
impl PrincipalProvider for SessionPrincipals {
    async fn principal(&self, parts: &Parts) -> Principal {
        parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().strip_prefix("sessionid="))
            .find_map(|id| self.sessions.get(id).cloned())
            .unwrap_or_else(Principal::anonymous)
    }
}

fn registry_config() -> Result<RegistryConfig, serde_json::Error> {
    serde_json::from_value(json!({
        "entities": [
            {"app": "notes", "name": "note", "owner_field": "author", "display_field": "title",
             "access": {"read": "self", "set": "self"}, "fields": [
                {"name": "title", "type": "string"},
                {"name": "summary", "type": "text"},
                {"name": "author", "type": "integer", "editable": false},
                {"name": "pinned", "type": "boolean"},
                {"name": "words", "type": "callable", "compute": {"kind": "custom", "name": "word_count"}}
            ]}
        ]
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("attribute_gateway=info")),
        )
        .init();

    let settings = GatewaySettings::from_env()?;
    let mut computed: ComputedRegistry = HashMap::new();
    computed.insert("word_count".into(), Arc::new(WordCount));
    let registry = Arc::new(resolve_with_computed(&registry_config()?, settings.default_policy, &computed)?);

    let store = MemoryStore::new(Arc::clone(&registry));
    store.seed(&json!({
        "notes.note": [
            {"id": 1, "title": "Groceries", "summary": "milk eggs bread", "author": 1, "pinned": false},
            {"id": 2, "title": "Ideas", "summary": "a gateway for attributes", "author": 2, "pinned": true}
        ]
    }))?;

    let mut sessions = HashMap::new();
    sessions.insert("alice-session".to_string(), Principal::user(1, "alice"));
    sessions.insert("bob-session".to_string(), Principal::user(2, "bob"));

    let state = AppState {
        registry,
        store: Arc::new(store),
        renderer: Arc::new(JinjaRenderer::from_dir(&settings.template_dir)),
        principals: Arc::new(SessionPrincipals { sessions }),
        settings: Arc::new(settings),
    };

    let app = gateway_router(state);
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
