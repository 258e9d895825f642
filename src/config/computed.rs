//! Callable fields: values computed from a record instead of stored on it.

use crate::config::{FieldKind, TypeDescriptor};
use crate::store::{DataStore, Record};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A zero-argument computation over a record. Errors are plain messages; the field
/// introspector wraps them into request errors.
#[async_trait]
pub trait Computed: Send + Sync + fmt::Debug {
    async fn compute(&self, store: &dyn DataStore, entity: &TypeDescriptor, record: &Record) -> Result<Value, String>;
}

/// Implementations registered by the embedding application, referenced from config as
/// `{"kind": "custom", "name": "..."}`.
pub type ComputedRegistry = HashMap<String, Arc<dyn Computed>>;

/// Number of records linked through a to-many field.
#[derive(Debug)]
pub struct RelationCount {
    pub relation: String,
}

#[async_trait]
impl Computed for RelationCount {
    async fn compute(&self, store: &dyn DataStore, entity: &TypeDescriptor, record: &Record) -> Result<Value, String> {
        match entity.field(&self.relation).map(|f| &f.kind) {
            Some(FieldKind::ToMany { .. }) => {}
            _ => return Err(format!("'{}' is not a to-many relation of {}", self.relation, entity.name)),
        }
        let pks = store
            .related_pks(&entity.label, record.pk, &self.relation)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Value::from(pks.len() as u64))
    }
}

/// The record's display string.
#[derive(Debug)]
pub struct DisplayString;

#[async_trait]
impl Computed for DisplayString {
    async fn compute(&self, _store: &dyn DataStore, entity: &TypeDescriptor, record: &Record) -> Result<Value, String> {
        Ok(Value::String(entity.display(record)))
    }
}
