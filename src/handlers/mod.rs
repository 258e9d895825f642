//! HTTP handlers for the attribute endpoints.

pub mod attribute;
pub use attribute::*;
