//! Attribute Gateway: registry-driven JSON endpoints for reading, searching and mutating
//! single attributes of stored records.

pub mod config;
pub mod csrf;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod messages;
pub mod migration;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;
pub mod template;
pub mod text;

pub use config::{
    load_from_path, resolve, resolve_with_computed, AccessPolicy, Action, ComputedRegistry, EntityRegistry,
    GatewaySettings, RegistryConfig,
};
pub use error::{AppError, ConfigError, StoreError};
pub use extractors::{HeaderPrincipalProvider, Principal, PrincipalProvider};
pub use messages::{Level, Message, MessageLog};
pub use migration::ensure_schema;
pub use response::Envelope;
pub use routes::{attribute_routes, common_routes, gateway_router};
pub use state::AppState;
pub use store::{ensure_database_exists, DataStore, MemoryStore, PgStore};
pub use template::{JinjaRenderer, TemplateRenderer};
