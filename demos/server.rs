//! Example server: loads the registry file, builds a memory or PostgreSQL store, and mounts
//! the attribute routes under the configured prefix plus the common routes.
//!
//! `GATEWAY_REGISTRY=demos/registry.json GATEWAY_FIXTURES=demos/fixtures.json \
//!  GATEWAY_TEMPLATES=demos/templates GATEWAY_DEBUG=1 cargo run --example server`

use attribute_gateway::{
    ensure_database_exists, ensure_schema, gateway_router, load_from_path, resolve, AppState, DataStore,
    GatewaySettings, HeaderPrincipalProvider, JinjaRenderer, MemoryStore, PgStore,
};
use attribute_gateway::config::env_opt;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("attribute_gateway=info".parse()?))
        .init();

    let settings = GatewaySettings::from_env()?;
    let registry_path = env_opt("GATEWAY_REGISTRY").unwrap_or_else(|| "registry.json".into());
    let config = load_from_path(&registry_path).await?;
    let registry = Arc::new(resolve(&config, settings.default_policy)?);
    tracing::info!(path = %registry_path, types = registry.list_types().len(), "registry loaded");

    let store: Arc<dyn DataStore> = match env_opt("GATEWAY_STORE").as_deref() {
        Some("postgres") => {
            let database_url =
                std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/gateway".into());
            let schema = env_opt("GATEWAY_SCHEMA").unwrap_or_else(|| "gateway".into());
            ensure_database_exists(&database_url).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await?;
            ensure_schema(&pool, &registry, &schema).await?;
            Arc::new(PgStore::new(pool, Arc::clone(&registry), schema))
        }
        _ => {
            let store = MemoryStore::new(Arc::clone(&registry));
            if let Some(path) = env_opt("GATEWAY_FIXTURES") {
                let fixtures: serde_json::Value = serde_json::from_str(&tokio::fs::read_to_string(&path).await?)?;
                store.seed(&fixtures)?;
                tracing::info!(%path, "fixtures loaded");
            }
            Arc::new(store)
        }
    };

    let state = AppState {
        registry,
        store,
        renderer: Arc::new(JinjaRenderer::from_dir(&settings.template_dir)),
        principals: Arc::new(HeaderPrincipalProvider),
        settings: Arc::new(settings),
    };
    let app = gateway_router(state);

    let bind = env_opt("GATEWAY_BIND").unwrap_or_else(|| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
