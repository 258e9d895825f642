//! In-process store evaluating filters directly. Used by tests and the demo server.

use crate::config::{EntityRegistry, FieldKind, TypeDescriptor};
use crate::error::StoreError;
use crate::store::{DataStore, Filter, Query, Record};
use crate::text::value_to_string;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<i64, Map<String, Value>>>,
    next_pk: HashMap<String, i64>,
    /// (entity label, to-many field) -> (source pk, target pk)
    links: HashMap<(String, String), BTreeSet<(i64, i64)>>,
}

pub struct MemoryStore {
    registry: Arc<EntityRegistry>,
    data: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        MemoryStore {
            registry,
            data: RwLock::new(Tables::default()),
        }
    }

    /// Load fixtures shaped `{"app.name": [{"id": 1, "field": ..., "to_many_field": [2, 3]}]}`.
    /// Rows without `id` get the next free pk.
    pub fn seed(&self, fixtures: &Value) -> Result<(), StoreError> {
        let Some(by_type) = fixtures.as_object() else {
            return Err(StoreError::Constraint("fixtures must be a JSON object keyed by type label".into()));
        };
        let mut data = self.write()?;
        for (label, rows) in by_type {
            let entity = self.entity(label)?;
            for row in rows.as_array().into_iter().flatten() {
                let Some(row) = row.as_object() else { continue };
                let mut values = Map::new();
                let mut links = Vec::new();
                for (k, v) in row {
                    if k == "id" || k == "pk" {
                        continue;
                    }
                    match entity.field(k).map(|f| &f.kind) {
                        Some(FieldKind::ToMany { .. }) => {
                            for t in v.as_array().into_iter().flatten().filter_map(Value::as_i64) {
                                links.push((k.clone(), t));
                            }
                        }
                        _ => {
                            values.insert(k.clone(), v.clone());
                        }
                    }
                }
                let pk = match row.get("id").and_then(Value::as_i64) {
                    Some(pk) => pk,
                    None => next_pk(&mut data, label),
                };
                let next = data.next_pk.entry(label.clone()).or_insert(1);
                if *next <= pk {
                    *next = pk + 1;
                }
                let values = check_columns(&entity, values)?;
                data.rows.entry(label.clone()).or_default().insert(pk, values);
                for (field, target) in links {
                    data.links.entry((label.clone(), field)).or_default().insert((pk, target));
                }
            }
        }
        Ok(())
    }

    fn entity(&self, label: &str) -> Result<Arc<TypeDescriptor>, StoreError> {
        self.registry
            .get_type(label)
            .cloned()
            .ok_or_else(|| StoreError::UnknownType(label.to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.data
            .read()
            .map_err(|_| StoreError::Constraint("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.data
            .write()
            .map_err(|_| StoreError::Constraint("memory store lock poisoned".into()))
    }

    fn matches(&self, data: &Tables, entity: &TypeDescriptor, pk: i64, values: &Map<String, Value>, filter: &Filter) -> bool {
        match filter {
            Filter::All => true,
            Filter::Nothing => false,
            Filter::Pk(p) => pk == *p,
            Filter::PkIn(pks) => pks.contains(&pk),
            Filter::Eq { field, value } => {
                let current = column(pk, values, field);
                loose_eq(&current, value)
            }
            Filter::IExact { field, value } => {
                value_to_string(&column(pk, values, field)).to_lowercase() == value.to_lowercase()
            }
            Filter::IContains { field, value } => value_to_string(&column(pk, values, field))
                .to_lowercase()
                .contains(&value.to_lowercase()),
            Filter::Related { field, filter } => {
                let Some(target) = entity.field(field).and_then(|f| self.registry.related_type(f).ok()) else {
                    return false;
                };
                let Some(target_pk) = values.get(field).and_then(Value::as_i64) else {
                    return false;
                };
                data.rows
                    .get(&target.label)
                    .and_then(|rows| rows.get(&target_pk))
                    .map(|v| self.matches(data, &target, target_pk, v, filter))
                    .unwrap_or(false)
            }
            Filter::AnyRelated { field, filter } => {
                let Some(target) = entity.field(field).and_then(|f| self.registry.related_type(f).ok()) else {
                    return false;
                };
                let Some(links) = data.links.get(&(entity.label.clone(), field.clone())) else {
                    return false;
                };
                let rows = data.rows.get(&target.label);
                links
                    .iter()
                    .filter(|(s, _)| *s == pk)
                    .filter_map(|(_, t)| rows.and_then(|r| r.get(t)).map(|v| (*t, v)))
                    .any(|(t, v)| self.matches(data, &target, t, v, filter))
            }
            Filter::MemberOf { owner, owner_pk, field } => data
                .links
                .get(&(owner.clone(), field.clone()))
                .map(|l| l.contains(&(*owner_pk, pk)))
                .unwrap_or(false),
            Filter::And(fs) => fs.iter().all(|f| self.matches(data, entity, pk, values, f)),
            Filter::Or(fs) => fs.iter().any(|f| self.matches(data, entity, pk, values, f)),
            Filter::Not(f) => !self.matches(data, entity, pk, values, f),
        }
    }
}

fn next_pk(data: &mut Tables, label: &str) -> i64 {
    let next = data.next_pk.entry(label.to_string()).or_insert(1);
    let pk = *next;
    *next += 1;
    pk
}

fn column(pk: i64, values: &Map<String, Value>, field: &str) -> Value {
    if field == "id" || field == "pk" {
        return Value::from(pk);
    }
    values.get(field).cloned().unwrap_or(Value::Null)
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(_), Value::String(s)) | (Value::String(s), Value::Number(_)) => {
            value_to_string(a) == *s || value_to_string(b) == *s
        }
        _ => a == b,
    }
}

/// Rejects values for fields that are not columns of `entity`.
fn check_columns(entity: &TypeDescriptor, values: Map<String, Value>) -> Result<Map<String, Value>, StoreError> {
    for k in values.keys() {
        if !entity.field(k).map(|f| f.is_column()).unwrap_or(false) {
            return Err(StoreError::UnknownField {
                entity: entity.label.clone(),
                field: k.clone(),
            });
        }
    }
    Ok(values)
}

fn check_unique(data: &Tables, entity: &TypeDescriptor, pk: i64, values: &Map<String, Value>) -> Result<(), StoreError> {
    let Some(rows) = data.rows.get(&entity.label) else {
        return Ok(());
    };
    for f in entity.fields.iter().filter(|f| f.unique) {
        let Some(v) = values.get(&f.name).filter(|v| !v.is_null()) else {
            continue;
        };
        if rows.iter().any(|(other, row)| *other != pk && row.get(&f.name) == Some(v)) {
            return Err(StoreError::Constraint(format!(
                "{}.{} must be unique; '{}' is taken",
                entity.label,
                f.name,
                value_to_string(v)
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let entity = self.entity(&query.entity)?;
        let data = self.read()?;
        let Some(rows) = data.rows.get(&entity.label) else {
            return Ok(Vec::new());
        };
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows
            .iter()
            .filter(|(pk, values)| self.matches(&data, &entity, **pk, values, &query.filter))
            .take(limit)
            .map(|(pk, values)| Record::with_values(entity.label.clone(), *pk, values.clone()))
            .collect())
    }

    async fn create(&self, entity: &str, values: Map<String, Value>) -> Result<Record, StoreError> {
        let entity = self.entity(entity)?;
        let mut values = check_columns(&entity, values)?;
        for f in entity.column_fields() {
            values.entry(f.name.clone()).or_insert(Value::Null);
        }
        let mut data = self.write()?;
        check_unique(&data, &entity, 0, &values)?;
        let pk = next_pk(&mut data, &entity.label);
        data.rows
            .entry(entity.label.clone())
            .or_default()
            .insert(pk, values.clone());
        Ok(Record::with_values(entity.label.clone(), pk, values))
    }

    async fn update(&self, entity: &str, pk: i64, changes: Map<String, Value>) -> Result<Record, StoreError> {
        let entity = self.entity(entity)?;
        let changes = check_columns(&entity, changes)?;
        let mut data = self.write()?;
        let missing = || StoreError::Missing {
            entity: entity.label.clone(),
            pk,
        };
        let mut values = data
            .rows
            .get(&entity.label)
            .and_then(|rows| rows.get(&pk))
            .cloned()
            .ok_or_else(missing)?;
        values.extend(changes);
        check_unique(&data, &entity, pk, &values)?;
        let row = data
            .rows
            .get_mut(&entity.label)
            .and_then(|rows| rows.get_mut(&pk))
            .ok_or_else(missing)?;
        *row = values.clone();
        Ok(Record::with_values(entity.label.clone(), pk, values))
    }

    async fn related_pks(&self, entity: &str, pk: i64, field: &str) -> Result<Vec<i64>, StoreError> {
        let data = self.read()?;
        Ok(data
            .links
            .get(&(entity.to_string(), field.to_string()))
            .map(|l| l.iter().filter(|(s, _)| *s == pk).map(|(_, t)| *t).collect())
            .unwrap_or_default())
    }

    async fn add_related(&self, entity: &str, pk: i64, field: &str, target_pk: i64) -> Result<(), StoreError> {
        let mut data = self.write()?;
        data.links
            .entry((entity.to_string(), field.to_string()))
            .or_default()
            .insert((pk, target_pk));
        Ok(())
    }

    async fn remove_related(&self, entity: &str, pk: i64, field: &str, target_pk: i64) -> Result<(), StoreError> {
        let mut data = self.write()?;
        if let Some(l) = data.links.get_mut(&(entity.to_string(), field.to_string())) {
            l.remove(&(pk, target_pk));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, AccessPolicy, RegistryConfig};

    fn store() -> MemoryStore {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "entities": [
                {"app": "library", "name": "genre", "fields": [
                    {"name": "name", "type": "string", "unique": true}
                ]},
                {"app": "library", "name": "book", "fields": [
                    {"name": "name", "type": "string"},
                    {"name": "genre", "type": "to_one", "target": "genre"},
                    {"name": "tags", "type": "to_many", "target": "genre"}
                ]}
            ]
        }))
        .unwrap();
        let store = MemoryStore::new(Arc::new(resolve(&config, AccessPolicy::Public).unwrap()));
        store
            .seed(&serde_json::json!({
                "library.genre": [{"id": 1, "name": "Fantasy"}, {"id": 2, "name": "Science Fiction"}],
                "library.book": [
                    {"id": 1, "name": "Dune", "genre": 2, "tags": [1, 2]},
                    {"id": 2, "name": "Hobbit", "genre": 1, "tags": [1]}
                ]
            }))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn filters_through_relations() {
        let s = store();
        let q = Query::all("library.book").filter(Filter::Related {
            field: "genre".into(),
            filter: Box::new(Filter::icontains("name", "science")),
        });
        let names: Vec<_> = s.fetch(&q).await.unwrap().into_iter().map(|r| r.pk).collect();
        assert_eq!(names, vec![1]);

        let q = Query::all("library.book").filter(Filter::AnyRelated {
            field: "tags".into(),
            filter: Box::new(Filter::icontains("name", "fant")),
        });
        assert_eq!(s.count(&q).await.unwrap(), 2);

        let q = Query::all("library.genre").filter(Filter::MemberOf {
            owner: "library.book".into(),
            owner_pk: 2,
            field: "tags".into(),
        });
        assert_eq!(s.pks(&q).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn create_assigns_next_pk_and_enforces_unique() {
        let s = store();
        let mut values = Map::new();
        values.insert("name".into(), Value::from("Horror"));
        let r = s.create("library.genre", values.clone()).await.unwrap();
        assert_eq!(r.pk, 3);
        assert!(matches!(
            s.create("library.genre", values).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn update_and_links() {
        let s = store();
        let mut changes = Map::new();
        changes.insert("name".into(), Value::from("Dune Messiah"));
        let r = s.update("library.book", 1, changes).await.unwrap();
        assert_eq!(r.values["name"], "Dune Messiah");
        assert_eq!(r.values["genre"], 2);
        assert!(matches!(
            s.update("library.book", 9, Map::new()).await,
            Err(StoreError::Missing { pk: 9, .. })
        ));

        s.remove_related("library.book", 1, "tags", 1).await.unwrap();
        assert_eq!(s.related_pks("library.book", 1, "tags").await.unwrap(), vec![2]);
        s.add_related("library.book", 1, "tags", 1).await.unwrap();
        assert_eq!(s.related_pks("library.book", 1, "tags").await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected() {
        let s = store();
        let mut values = Map::new();
        values.insert("tags".into(), Value::from(1));
        assert!(matches!(
            s.create("library.book", values).await,
            Err(StoreError::UnknownField { .. })
        ));
        assert!(matches!(
            s.fetch(&Query::all("library.movie")).await,
            Err(StoreError::UnknownType(_))
        ));
    }
}
