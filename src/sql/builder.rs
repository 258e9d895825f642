//! Builds parameterized SELECT, INSERT, UPDATE and join-table statements from the
//! entity registry and composable filters.

use crate::config::{EntityRegistry, FieldDescriptor, FieldKind, TypeDescriptor};
use crate::error::StoreError;
use crate::store::{Filter, Query};
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// Join table holding a to-many relation: `<table>__<field>(source_id, target_id)`.
pub fn join_table_name(entity: &TypeDescriptor, field: &str) -> String {
    format!("{}__{}", entity.table, field)
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
    aliases: usize,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
            aliases: 0,
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Placeholder cast to `sql_type`.
    fn param(&mut self, v: Value, sql_type: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, sql_type)
    }

    fn alias(&mut self) -> String {
        let a = format!("t{}", self.aliases);
        self.aliases += 1;
        a
    }
}

/// Registry and schema a statement is built against.
#[derive(Clone, Copy)]
pub struct SqlContext<'a> {
    pub registry: &'a EntityRegistry,
    pub schema: &'a str,
}

impl<'a> SqlContext<'a> {
    fn entity(&self, label: &str) -> Result<&'a TypeDescriptor, StoreError> {
        self.registry
            .get_type(label)
            .map(|t| t.as_ref())
            .ok_or_else(|| StoreError::UnknownType(label.to_string()))
    }

    fn table(&self, entity: &TypeDescriptor) -> String {
        qualified_table(self.schema, &entity.table)
    }

    fn join_table(&self, entity: &TypeDescriptor, field: &str) -> String {
        qualified_table(self.schema, &join_table_name(entity, field))
    }
}

fn column_type(field: &FieldDescriptor) -> Option<&'static str> {
    match &field.kind {
        FieldKind::Scalar(t) => Some(t.sql_type()),
        FieldKind::ToOne { .. } => Some("bigint"),
        _ => None,
    }
}

fn field_of<'e>(entity: &'e TypeDescriptor, name: &str) -> Result<&'e FieldDescriptor, StoreError> {
    entity.field(name).ok_or_else(|| StoreError::UnknownField {
        entity: entity.label.clone(),
        field: name.to_string(),
    })
}

fn column_of<'e>(entity: &'e TypeDescriptor, name: &str) -> Result<(&'e FieldDescriptor, &'static str), StoreError> {
    let f = field_of(entity, name)?;
    let t = column_type(f).ok_or_else(|| StoreError::UnknownField {
        entity: entity.label.clone(),
        field: name.to_string(),
    })?;
    Ok((f, t))
}

/// Escape LIKE wildcards so the value matches literally.
fn like_pattern(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Column expression; `id`/`pk` refer to the primary key.
fn column_expr(alias: &str, name: &str) -> String {
    if name == "id" || name == "pk" {
        format!("{}.\"id\"", alias)
    } else {
        format!("{}.{}", alias, quoted(name))
    }
}

fn where_clause(
    q: &mut QueryBuf,
    ctx: SqlContext<'_>,
    entity: &TypeDescriptor,
    alias: &str,
    filter: &Filter,
) -> Result<String, StoreError> {
    Ok(match filter {
        Filter::All => "TRUE".into(),
        Filter::Nothing => "FALSE".into(),
        Filter::Pk(pk) => format!("{}.\"id\" = {}", alias, q.param(Value::from(*pk), "bigint")),
        Filter::PkIn(pks) if pks.is_empty() => "FALSE".into(),
        Filter::PkIn(pks) => {
            let phs: Vec<String> = pks.iter().map(|p| q.param(Value::from(*p), "bigint")).collect();
            format!("{}.\"id\" IN ({})", alias, phs.join(", "))
        }
        Filter::Eq { field, value } => {
            let sql_type = if field == "id" || field == "pk" {
                "bigint"
            } else {
                column_of(entity, field)?.1
            };
            if value.is_null() {
                format!("{} IS NULL", column_expr(alias, field))
            } else {
                format!("{} = {}", column_expr(alias, field), q.param(value.clone(), sql_type))
            }
        }
        Filter::IExact { field, value } => {
            column_of(entity, field)?;
            format!(
                "lower({}::text) = lower({})",
                column_expr(alias, field),
                q.param(Value::from(value.as_str()), "text")
            )
        }
        Filter::IContains { field, value } => {
            column_of(entity, field)?;
            format!(
                "{}::text ILIKE {}",
                column_expr(alias, field),
                q.param(Value::from(like_pattern(value)), "text")
            )
        }
        Filter::Related { field, filter } => {
            let f = field_of(entity, field)?;
            let target = match &f.kind {
                FieldKind::ToOne { target } => ctx.entity(target)?,
                _ => return Err(not_relation(entity, field)),
            };
            let sub = q.alias();
            let inner = where_clause(q, ctx, target, &sub, filter)?;
            format!(
                "{} IN (SELECT {}.\"id\" FROM {} {} WHERE {})",
                column_expr(alias, field),
                sub,
                ctx.table(target),
                sub,
                inner
            )
        }
        Filter::AnyRelated { field, filter } => {
            let f = field_of(entity, field)?;
            let target = match &f.kind {
                FieldKind::ToMany { target } => ctx.entity(target)?,
                _ => return Err(not_relation(entity, field)),
            };
            let link = q.alias();
            let sub = q.alias();
            let inner = where_clause(q, ctx, target, &sub, filter)?;
            format!(
                "{}.\"id\" IN (SELECT {}.\"source_id\" FROM {} {} JOIN {} {} ON {}.\"id\" = {}.\"target_id\" WHERE {})",
                alias,
                link,
                ctx.join_table(entity, field),
                link,
                ctx.table(target),
                sub,
                sub,
                link,
                inner
            )
        }
        Filter::MemberOf { owner, owner_pk, field } => {
            let owner = ctx.entity(owner)?;
            let link = q.alias();
            format!(
                "{}.\"id\" IN (SELECT {}.\"target_id\" FROM {} {} WHERE {}.\"source_id\" = {})",
                alias,
                link,
                ctx.join_table(owner, field),
                link,
                link,
                q.param(Value::from(*owner_pk), "bigint")
            )
        }
        Filter::And(fs) if fs.is_empty() => "TRUE".into(),
        Filter::And(fs) => {
            let parts = fs
                .iter()
                .map(|f| where_clause(q, ctx, entity, alias, f))
                .collect::<Result<Vec<_>, _>>()?;
            format!("({})", parts.join(" AND "))
        }
        Filter::Or(fs) if fs.is_empty() => "FALSE".into(),
        Filter::Or(fs) => {
            let parts = fs
                .iter()
                .map(|f| where_clause(q, ctx, entity, alias, f))
                .collect::<Result<Vec<_>, _>>()?;
            format!("({})", parts.join(" OR "))
        }
        Filter::Not(f) => format!("NOT ({})", where_clause(q, ctx, entity, alias, f)?),
    })
}

fn not_relation(entity: &TypeDescriptor, field: &str) -> StoreError {
    StoreError::Constraint(format!("{}.{} is not a relation", entity.label, field))
}

/// `"id", "col", ...` for every column field; dates come back as text.
fn select_column_list(entity: &TypeDescriptor, alias: &str) -> String {
    let mut cols = vec![format!("{}.\"id\"", alias)];
    for f in entity.column_fields() {
        let expr = column_expr(alias, &f.name);
        match column_type(f) {
            Some("date") | Some("timestamptz") => cols.push(format!("{}::text AS {}", expr, quoted(&f.name))),
            _ => cols.push(expr),
        }
    }
    cols.join(", ")
}

fn returning_list(entity: &TypeDescriptor) -> String {
    let mut cols = vec!["\"id\"".to_string()];
    for f in entity.column_fields() {
        match column_type(f) {
            Some("date") | Some("timestamptz") => cols.push(format!("{}::text AS {}", quoted(&f.name), quoted(&f.name))),
            _ => cols.push(quoted(&f.name)),
        }
    }
    cols.join(", ")
}

/// SELECT rows matching the query's filter, ORDER BY pk, optional LIMIT.
pub fn select(ctx: SqlContext<'_>, query: &Query) -> Result<QueryBuf, StoreError> {
    let entity = ctx.entity(&query.entity)?;
    let mut q = QueryBuf::new();
    let alias = q.alias();
    let where_sql = where_clause(&mut q, ctx, entity, &alias, &query.filter)?;
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {} ORDER BY {}.\"id\"{}",
        select_column_list(entity, &alias),
        ctx.table(entity),
        alias,
        where_sql,
        alias,
        limit_clause
    );
    Ok(q)
}

pub fn count(ctx: SqlContext<'_>, query: &Query) -> Result<QueryBuf, StoreError> {
    let entity = ctx.entity(&query.entity)?;
    let mut q = QueryBuf::new();
    let alias = q.alias();
    let where_sql = where_clause(&mut q, ctx, entity, &alias, &query.filter)?;
    q.sql = format!(
        "SELECT COUNT(*) AS \"count\" FROM {} {} WHERE {}",
        ctx.table(entity),
        alias,
        where_sql
    );
    Ok(q)
}

/// INSERT the given columns; others take the column default (null).
pub fn insert(ctx: SqlContext<'_>, entity: &TypeDescriptor, values: &Map<String, Value>) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (name, value) in values {
        let (_, sql_type) = column_of(entity, name)?;
        cols.push(quoted(name));
        placeholders.push(q.param(value.clone(), sql_type));
    }
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", ctx.table(entity), returning_list(entity))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            ctx.table(entity),
            cols.join(", "),
            placeholders.join(", "),
            returning_list(entity)
        )
    };
    Ok(q)
}

/// UPDATE by id: SET only the given columns.
pub fn update(ctx: SqlContext<'_>, entity: &TypeDescriptor, pk: i64, changes: &Map<String, Value>) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (name, value) in changes {
        let (_, sql_type) = column_of(entity, name)?;
        let rhs = q.param(value.clone(), sql_type);
        sets.push(format!("{} = {}", quoted(name), rhs));
    }
    let id = q.param(Value::from(pk), "bigint");
    q.sql = if sets.is_empty() {
        format!("SELECT {} FROM {} WHERE \"id\" = {}", returning_list(entity), ctx.table(entity), id)
    } else {
        format!(
            "UPDATE {} SET {} WHERE \"id\" = {} RETURNING {}",
            ctx.table(entity),
            sets.join(", "),
            id,
            returning_list(entity)
        )
    };
    Ok(q)
}

fn to_many<'e>(entity: &'e TypeDescriptor, field: &str) -> Result<&'e FieldDescriptor, StoreError> {
    let f = field_of(entity, field)?;
    match f.kind {
        FieldKind::ToMany { .. } => Ok(f),
        _ => Err(not_relation(entity, field)),
    }
}

pub fn select_related_pks(ctx: SqlContext<'_>, entity: &TypeDescriptor, pk: i64, field: &str) -> Result<QueryBuf, StoreError> {
    to_many(entity, field)?;
    let mut q = QueryBuf::new();
    let src = q.param(Value::from(pk), "bigint");
    q.sql = format!(
        "SELECT \"target_id\" FROM {} WHERE \"source_id\" = {} ORDER BY \"target_id\"",
        ctx.join_table(entity, field),
        src
    );
    Ok(q)
}

pub fn insert_link(ctx: SqlContext<'_>, entity: &TypeDescriptor, pk: i64, field: &str, target_pk: i64) -> Result<QueryBuf, StoreError> {
    to_many(entity, field)?;
    let mut q = QueryBuf::new();
    let src = q.param(Value::from(pk), "bigint");
    let dst = q.param(Value::from(target_pk), "bigint");
    q.sql = format!(
        "INSERT INTO {} (\"source_id\", \"target_id\") VALUES ({}, {}) ON CONFLICT DO NOTHING",
        ctx.join_table(entity, field),
        src,
        dst
    );
    Ok(q)
}

pub fn delete_link(ctx: SqlContext<'_>, entity: &TypeDescriptor, pk: i64, field: &str, target_pk: i64) -> Result<QueryBuf, StoreError> {
    to_many(entity, field)?;
    let mut q = QueryBuf::new();
    let src = q.param(Value::from(pk), "bigint");
    let dst = q.param(Value::from(target_pk), "bigint");
    q.sql = format!(
        "DELETE FROM {} WHERE \"source_id\" = {} AND \"target_id\" = {}",
        ctx.join_table(entity, field),
        src,
        dst
    );
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, AccessPolicy, RegistryConfig};

    fn registry() -> EntityRegistry {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "entities": [
                {"app": "library", "name": "genre", "fields": [{"name": "name", "type": "string"}]},
                {"app": "library", "name": "book", "table": "books", "fields": [
                    {"name": "name", "type": "string"},
                    {"name": "published", "type": "date"},
                    {"name": "genre", "type": "to_one", "target": "genre"},
                    {"name": "tags", "type": "to_many", "target": "genre"}
                ]}
            ]
        }))
        .unwrap();
        resolve(&config, AccessPolicy::Public).unwrap()
    }

    #[test]
    fn select_casts_every_placeholder() {
        let reg = registry();
        let ctx = SqlContext { registry: &reg, schema: "gateway" };
        let query = Query::all("library.book")
            .filter(Filter::Pk(3).or(Filter::icontains("name", "50%")))
            .limit(2);
        let q = select(ctx, &query).unwrap();
        assert_eq!(
            q.sql,
            "SELECT t0.\"id\", t0.\"name\", t0.\"published\"::text AS \"published\", t0.\"genre\" \
             FROM \"gateway\".\"books\" t0 WHERE (t0.\"id\" = $1::bigint OR t0.\"name\"::text ILIKE $2::text) \
             ORDER BY t0.\"id\" LIMIT 2"
        );
        assert_eq!(q.params, vec![Value::from(3), Value::from("%50\\%%")]);
    }

    #[test]
    fn relations_become_subqueries() {
        let reg = registry();
        let ctx = SqlContext { registry: &reg, schema: "gateway" };
        let query = Query::all("library.book").filter(Filter::AnyRelated {
            field: "tags".into(),
            filter: Box::new(Filter::icontains("name", "fi")),
        });
        let q = select(ctx, &query).unwrap();
        assert!(q.sql.contains(
            "t0.\"id\" IN (SELECT t1.\"source_id\" FROM \"gateway\".\"books__tags\" t1 \
             JOIN \"gateway\".\"library_genre\" t2 ON t2.\"id\" = t1.\"target_id\" WHERE t2.\"name\"::text ILIKE $1::text)"
        ));

        let query = Query::all("library.genre").filter(Filter::MemberOf {
            owner: "library.book".into(),
            owner_pk: 7,
            field: "tags".into(),
        });
        let q = select(ctx, &query).unwrap();
        assert!(q.sql.contains("FROM \"gateway\".\"books__tags\" t1 WHERE t1.\"source_id\" = $1::bigint"));
    }

    #[test]
    fn empty_pk_set_matches_nothing() {
        let reg = registry();
        let ctx = SqlContext { registry: &reg, schema: "gateway" };
        let q = select(ctx, &Query::all("library.genre").exclude(Filter::PkIn(vec![]))).unwrap();
        assert!(q.sql.contains("WHERE NOT (FALSE)"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn unknown_column_is_rejected() {
        let reg = registry();
        let ctx = SqlContext { registry: &reg, schema: "gateway" };
        let book = reg.get_type("library.book").unwrap();
        let mut values = Map::new();
        values.insert("tags".into(), Value::from(1));
        assert!(matches!(insert(ctx, book, &values), Err(StoreError::UnknownField { .. })));
    }

    #[test]
    fn update_sets_given_columns() {
        let reg = registry();
        let ctx = SqlContext { registry: &reg, schema: "gateway" };
        let book = reg.get_type("library.book").unwrap();
        let mut changes = Map::new();
        changes.insert("genre".into(), Value::Null);
        let q = update(ctx, book, 4, &changes).unwrap();
        assert!(q.sql.starts_with("UPDATE \"gateway\".\"books\" SET \"genre\" = $1::bigint WHERE \"id\" = $2::bigint"));
    }
}
