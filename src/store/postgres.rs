//! PostgreSQL store: filters compiled to parameterised SQL, one table per entity type
//! plus a join table per to-many field.

use crate::config::EntityRegistry;
use crate::error::StoreError;
use crate::sql::{self, PgBindValue, QueryBuf, SqlContext};
use crate::store::{DataStore, Query, Record};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{ConnectOptions, PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;

pub struct PgStore {
    pool: PgPool,
    registry: Arc<EntityRegistry>,
    schema: String,
}

impl PgStore {
    pub fn new(pool: PgPool, registry: Arc<EntityRegistry>, schema: impl Into<String>) -> Self {
        PgStore {
            pool,
            registry,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn ctx(&self) -> SqlContext<'_> {
        SqlContext {
            registry: &self.registry,
            schema: &self.schema,
        }
    }

    fn entity(&self, label: &str) -> Result<&crate::config::TypeDescriptor, StoreError> {
        self.registry
            .get_type(label)
            .map(|t| t.as_ref())
            .ok_or_else(|| StoreError::UnknownType(label.to_string()))
    }

    async fn query_many(&self, q: &QueryBuf) -> Result<Vec<PgRow>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn query_one(&self, q: &QueryBuf) -> Result<Option<PgRow>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.fetch_optional(&self.pool).await?)
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}

/// Unique violations surface as constraint errors, everything else as database errors.
fn map_db_error(e: StoreError) -> StoreError {
    match e {
        StoreError::Db(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            StoreError::Constraint(db.message().to_string())
        }
        other => other,
    }
}

fn row_to_record(entity: &str, row: &PgRow) -> Result<Record, StoreError> {
    use sqlx::Column;
    let pk: i64 = row.try_get("id")?;
    let mut values = Map::new();
    for col in row.columns() {
        let name = col.name();
        if name == "id" {
            continue;
        }
        values.insert(name.to_string(), cell_to_value(row, name));
    }
    Ok(Record::with_values(entity, pk, values))
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[async_trait]
impl DataStore for PgStore {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let q = sql::select(self.ctx(), query)?;
        let rows = self.query_many(&q).await?;
        rows.iter().map(|r| row_to_record(&query.entity, r)).collect()
    }

    async fn count(&self, query: &Query) -> Result<usize, StoreError> {
        let q = sql::count(self.ctx(), query)?;
        let row = self.query_one(&q).await?;
        let n: i64 = match row {
            Some(r) => r.try_get("count")?,
            None => 0,
        };
        Ok(n.max(0) as usize)
    }

    async fn create(&self, entity: &str, values: Map<String, Value>) -> Result<Record, StoreError> {
        let e = self.entity(entity)?;
        let q = sql::insert(self.ctx(), e, &values)?;
        let row = self.query_one(&q).await.map_err(map_db_error)?;
        let row = row.ok_or_else(|| StoreError::Constraint(format!("insert into {} returned no row", entity)))?;
        row_to_record(entity, &row)
    }

    async fn update(&self, entity: &str, pk: i64, changes: Map<String, Value>) -> Result<Record, StoreError> {
        let e = self.entity(entity)?;
        let q = sql::update(self.ctx(), e, pk, &changes)?;
        match self.query_one(&q).await.map_err(map_db_error)? {
            Some(row) => row_to_record(entity, &row),
            None => Err(StoreError::Missing {
                entity: entity.to_string(),
                pk,
            }),
        }
    }

    async fn related_pks(&self, entity: &str, pk: i64, field: &str) -> Result<Vec<i64>, StoreError> {
        let e = self.entity(entity)?;
        let q = sql::select_related_pks(self.ctx(), e, pk, field)?;
        let rows = self.query_many(&q).await?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("target_id").map_err(StoreError::from))
            .collect()
    }

    async fn add_related(&self, entity: &str, pk: i64, field: &str, target_pk: i64) -> Result<(), StoreError> {
        let e = self.entity(entity)?;
        let q = sql::insert_link(self.ctx(), e, pk, field, target_pk)?;
        self.execute(&q).await.map_err(map_db_error)?;
        Ok(())
    }

    async fn remove_related(&self, entity: &str, pk: i64, field: &str, target_pk: i64) -> Result<(), StoreError> {
        let e = self.entity(entity)?;
        let q = sql::delete_link(self.ctx(), e, pk, field, target_pk)?;
        self.execute(&q).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Create the database named in `database_url` if it does not exist, connecting through
/// the `postgres` maintenance database.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Constraint("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}
