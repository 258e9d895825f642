//! Data store abstraction: records, composable filters and the async store trait.
//!
//! Filters are plain data so the in-memory store can evaluate them directly and the
//! PostgreSQL store can compile them to parameterised SQL.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One stored entity instance. To-one relations hold the related pk (or null) under the
/// field name; to-many memberships live in the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Qualified type label (`app.name`).
    pub entity: String,
    pub pk: i64,
    pub values: Map<String, Value>,
}

impl Record {
    pub fn new(entity: impl Into<String>, pk: i64) -> Self {
        Record {
            entity: entity.into(),
            pk,
            values: Map::new(),
        }
    }

    pub fn with_values(entity: impl Into<String>, pk: i64, values: Map<String, Value>) -> Self {
        Record {
            entity: entity.into(),
            pk,
            values,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == "id" || field == "pk" {
            return None;
        }
        self.values.get(field)
    }

    /// Pk of a to-one relation, if set.
    pub fn related_pk(&self, field: &str) -> Option<i64> {
        self.values.get(field).and_then(Value::as_i64)
    }

    /// Values plus `id` and `pk`.
    pub fn to_json(&self) -> Value {
        let mut map = self.values.clone();
        map.insert("id".into(), Value::from(self.pk));
        map.insert("pk".into(), Value::from(self.pk));
        Value::Object(map)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    Nothing,
    Pk(i64),
    PkIn(Vec<i64>),
    Eq { field: String, value: Value },
    /// Case-insensitive equality on the value's string form.
    IExact { field: String, value: String },
    /// Case-insensitive substring match on the value's string form.
    IContains { field: String, value: String },
    /// The record a to-one field points to matches `filter`.
    Related { field: String, filter: Box<Filter> },
    /// At least one record linked through a to-many field matches `filter`.
    AnyRelated { field: String, filter: Box<Filter> },
    /// Records linked from `owner`'s object `owner_pk` through its to-many `field`.
    MemberOf { owner: String, owner_pk: i64, field: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Nothing, _) | (_, Filter::Nothing) => Filter::Nothing,
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, _) | (_, Filter::All) => Filter::All,
            (Filter::Nothing, f) | (f, Filter::Nothing) => f,
            (Filter::Or(mut a), Filter::Or(b)) => {
                a.extend(b);
                Filter::Or(a)
            }
            (Filter::Or(mut a), f) => {
                a.push(f);
                Filter::Or(a)
            }
            (f, g) => Filter::Or(vec![f, g]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        match self {
            Filter::All => Filter::Nothing,
            Filter::Nothing => Filter::All,
            Filter::Not(inner) => *inner,
            f => Filter::Not(Box::new(f)),
        }
    }

    pub fn icontains(field: impl Into<String>, value: impl Into<String>) -> Filter {
        Filter::IContains {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A re-executable selection of records of one type.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub entity: String,
    pub filter: Filter,
    pub limit: Option<usize>,
}

impl Query {
    pub fn all(entity: impl Into<String>) -> Self {
        Query {
            entity: entity.into(),
            filter: Filter::All,
            limit: None,
        }
    }

    pub fn filter(mut self, f: Filter) -> Self {
        self.filter = self.filter.and(f);
        self
    }

    pub fn exclude(mut self, f: Filter) -> Self {
        self.filter = self.filter.and(f.not());
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Storage behind the gateway. Results are ordered by pk.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>, StoreError>;

    async fn count(&self, query: &Query) -> Result<usize, StoreError> {
        let mut q = query.clone();
        q.limit = None;
        Ok(self.fetch(&q).await?.len())
    }

    async fn first(&self, query: &Query) -> Result<Option<Record>, StoreError> {
        let q = query.clone().limit(1);
        Ok(self.fetch(&q).await?.into_iter().next())
    }

    async fn get(&self, entity: &str, pk: i64) -> Result<Option<Record>, StoreError> {
        self.first(&Query::all(entity).filter(Filter::Pk(pk))).await
    }

    async fn pks(&self, query: &Query) -> Result<Vec<i64>, StoreError> {
        Ok(self.fetch(query).await?.into_iter().map(|r| r.pk).collect())
    }

    /// Insert a record; columns not given are null.
    async fn create(&self, entity: &str, values: Map<String, Value>) -> Result<Record, StoreError>;

    /// Assign the given columns on one record and return the stored result.
    async fn update(&self, entity: &str, pk: i64, changes: Map<String, Value>) -> Result<Record, StoreError>;

    async fn related_pks(&self, entity: &str, pk: i64, field: &str) -> Result<Vec<i64>, StoreError>;

    async fn add_related(&self, entity: &str, pk: i64, field: &str, target_pk: i64) -> Result<(), StoreError>;

    async fn remove_related(&self, entity: &str, pk: i64, field: &str, target_pk: i64) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(f: &str) -> Filter {
        Filter::Eq {
            field: f.into(),
            value: Value::from(1),
        }
    }

    #[test]
    fn all_and_nothing_are_identities() {
        assert_eq!(Filter::All.and(eq("a")), eq("a"));
        assert_eq!(eq("a").and(Filter::Nothing), Filter::Nothing);
        assert_eq!(Filter::Nothing.or(eq("a")), eq("a"));
        assert_eq!(eq("a").or(Filter::All), Filter::All);
        assert_eq!(Filter::All.not(), Filter::Nothing);
        assert_eq!(eq("a").not().not(), eq("a"));
    }

    #[test]
    fn combinators_flatten() {
        let f = eq("a").or(eq("b")).or(eq("c"));
        assert_eq!(f, Filter::Or(vec![eq("a"), eq("b"), eq("c")]));
        let f = eq("a").and(eq("b")).and(eq("c"));
        assert_eq!(f, Filter::And(vec![eq("a"), eq("b"), eq("c")]));
    }

    #[test]
    fn query_exclude_negates() {
        let q = Query::all("library.book").exclude(Filter::PkIn(vec![1, 2])).limit(2);
        assert_eq!(q.filter, Filter::Not(Box::new(Filter::PkIn(vec![1, 2]))));
        assert_eq!(q.limit, Some(2));
    }

    #[test]
    fn record_json_carries_pk() {
        let mut r = Record::new("library.book", 3);
        r.values.insert("name".into(), Value::from("Dune"));
        let j = r.to_json();
        assert_eq!(j["id"], 3);
        assert_eq!(j["pk"], 3);
        assert_eq!(j["name"], "Dune");
        assert_eq!(r.get("id"), None);
    }
}
