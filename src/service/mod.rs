//! Request services: object resolution, search, rendering and mutation.

pub mod context;
pub mod mutation;
pub mod new_value;
pub mod render;
pub mod search;

pub use context::{FieldValue, RequestContext, RouteInfo};
pub use new_value::{NewValue, ValueKey};
pub use render::Renderable;
