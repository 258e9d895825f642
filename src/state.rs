//! Shared application state for all routes. The registry is read-only after load.

use crate::config::{EntityRegistry, GatewaySettings};
use crate::extractors::PrincipalProvider;
use crate::store::DataStore;
use crate::template::TemplateRenderer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EntityRegistry>,
    pub store: Arc<dyn DataStore>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub principals: Arc<dyn PrincipalProvider>,
    pub settings: Arc<GatewaySettings>,
}
