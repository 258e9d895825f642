//! Bootstrap DDL for the PostgreSQL store: schema, one table per entity type, one join
//! table per to-many field, and foreign keys. Idempotent; never alters existing tables.

use crate::config::{EntityRegistry, FieldKind};
use crate::error::StoreError;
use crate::sql::{join_table_name, qualified_table, quoted};
use sqlx::PgPool;

pub async fn ensure_schema(pool: &PgPool, registry: &EntityRegistry, schema: &str) -> Result<(), StoreError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
        .execute(pool)
        .await?;

    for t in registry.list_types() {
        let mut col_defs = vec!["\"id\" BIGSERIAL PRIMARY KEY".to_string()];
        for f in t.column_fields() {
            let typ = match &f.kind {
                FieldKind::Scalar(s) => s.sql_type(),
                _ => "bigint",
            };
            let mut def = format!("{} {}", quoted(&f.name), typ);
            if f.unique {
                def.push_str(" UNIQUE");
            }
            col_defs.push(def);
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            qualified_table(schema, &t.table),
            col_defs.join(",\n  ")
        );
        tracing::debug!(sql = %sql, "ddl");
        sqlx::query(&sql).execute(pool).await?;
    }

    for t in registry.list_types() {
        let table = qualified_table(schema, &t.table);
        for f in &t.fields {
            let Some(target) = f.kind.target().and_then(|l| registry.get_type(l)) else {
                continue;
            };
            let target_table = qualified_table(schema, &target.table);
            match f.kind {
                FieldKind::ToOne { .. } => {
                    let sql = format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} (\"id\") ON DELETE SET NULL",
                        table,
                        quoted(&format!("{}_{}_fkey", t.table, f.name)),
                        quoted(&f.name),
                        target_table
                    );
                    // Fails when the constraint already exists.
                    let _ = sqlx::query(&sql).execute(pool).await;
                }
                FieldKind::ToMany { .. } => {
                    let sql = format!(
                        "CREATE TABLE IF NOT EXISTS {} (\n  \"source_id\" BIGINT NOT NULL REFERENCES {} (\"id\") ON DELETE CASCADE,\n  \"target_id\" BIGINT NOT NULL REFERENCES {} (\"id\") ON DELETE CASCADE,\n  PRIMARY KEY (\"source_id\", \"target_id\")\n)",
                        qualified_table(schema, &join_table_name(t, &f.name)),
                        table,
                        target_table
                    );
                    tracing::debug!(sql = %sql, "ddl");
                    sqlx::query(&sql).execute(pool).await?;
                }
                _ => {}
            }
        }
    }

    tracing::info!(schema = %schema, types = registry.list_types().len(), "store schema ensured");
    Ok(())
}
