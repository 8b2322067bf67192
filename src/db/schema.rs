//! Schema operations.
//!
//! DDL for declared tables (`CREATE TABLE` / `DROP TABLE`) and reflection of an
//! engine's whole schema, for SQLite, PostgreSQL, and MySQL.
//!
//! # Architecture
//!
//! Reflection queries live in the `queries` submodule. Each backend submodule maps
//! catalog rows into [`ReflectRow`]s, which [`group_rows`] folds into tables.

use crate::db::pool::{DbPool, Engine};
use crate::db::transaction::log_statement;
use crate::error::{DbError, DbResult};
use crate::models::{ReflectedColumn, ReflectedTable, Table, TableType};
use std::sync::Arc;
use tracing::debug;

/// Schema inspector and DDL runner.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Create every table in `tables` on the engine, in order. Existing tables are kept.
    pub async fn create_tables(engine: &Engine, tables: &[Arc<Table>]) -> DbResult<()> {
        let dialect = engine.db_type();
        for table in tables {
            let sql = table.create_sql(dialect);
            Self::execute_ddl(engine, &sql)
                .await
                .map_err(|e| DbError::schema(e.to_string(), table.name()))?;
        }
        debug!(bind = %engine.bind(), count = tables.len(), "Created tables");
        Ok(())
    }

    /// Drop every table in `tables`, in reverse order so dependents go first.
    pub async fn drop_tables(engine: &Engine, tables: &[Arc<Table>]) -> DbResult<()> {
        let dialect = engine.db_type();
        for table in tables.iter().rev() {
            let sql = table.drop_sql(dialect);
            Self::execute_ddl(engine, &sql)
                .await
                .map_err(|e| DbError::schema(e.to_string(), table.name()))?;
        }
        debug!(bind = %engine.bind(), count = tables.len(), "Dropped tables");
        Ok(())
    }

    /// Reflect every table and view visible to the engine.
    pub async fn reflect(engine: &Engine) -> DbResult<Vec<ReflectedTable>> {
        let rows = match engine.pool() {
            DbPool::Postgres(p) => postgres::reflect_rows(p).await?,
            DbPool::MySql(p) => mysql::reflect_rows(p).await?,
            DbPool::SQLite(p) => sqlite::reflect_rows(p).await?,
        };
        let tables = group_rows(rows);
        debug!(bind = %engine.bind(), count = tables.len(), "Reflected tables");
        Ok(tables)
    }

    async fn execute_ddl(engine: &Engine, sql: &str) -> DbResult<()> {
        log_statement(engine.bind(), engine.echo(), sql);
        match engine.pool() {
            DbPool::MySql(p) => sqlx::query(sql).execute(p).await.map(|_| ())?,
            DbPool::Postgres(p) => sqlx::query(sql).execute(p).await.map(|_| ())?,
            DbPool::SQLite(p) => sqlx::query(sql).execute(p).await.map(|_| ())?,
        }
        Ok(())
    }
}

/// One column of one table, as read from a catalog.
#[derive(Debug, Clone)]
struct ReflectRow {
    table_name: String,
    table_type: String,
    column_name: String,
    data_type: String,
    nullable: bool,
    primary_key: bool,
}

/// Fold catalog rows (ordered by table) into tables.
fn group_rows(rows: Vec<ReflectRow>) -> Vec<ReflectedTable> {
    let mut tables: Vec<ReflectedTable> = Vec::new();
    for row in rows {
        let column = ReflectedColumn {
            name: row.column_name,
            data_type: row.data_type,
            nullable: row.nullable,
            primary_key: row.primary_key,
        };
        match tables.last_mut() {
            Some(table) if table.name == row.table_name => table.columns.push(column),
            _ => {
                let mut table =
                    ReflectedTable::new(row.table_name, TableType::parse(&row.table_type));
                table.columns.push(column);
                tables.push(table);
            }
        }
    }
    tables
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const REFLECT_COLUMNS: &str = r#"
            SELECT
                c.table_name::text AS table_name,
                t.table_type::text AS table_type,
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                (c.is_nullable = 'YES') AS nullable,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage k
                        ON tc.constraint_name = k.constraint_name
                        AND tc.table_schema = k.table_schema
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                    AND tc.table_schema = c.table_schema
                    AND tc.table_name = c.table_name
                    AND k.column_name = c.column_name
                ) AS primary_key
            FROM information_schema.columns c
            JOIN information_schema.tables t
                ON t.table_schema = c.table_schema AND t.table_name = c.table_name
            WHERE c.table_schema = current_schema()
            ORDER BY c.table_name, c.ordinal_position
            "#;
    }

    pub mod mysql {
        pub const REFLECT_COLUMNS: &str = r#"
            SELECT
                CONVERT(c.TABLE_NAME USING utf8mb4) AS table_name,
                CONVERT(t.TABLE_TYPE USING utf8mb4) AS table_type,
                CONVERT(c.COLUMN_NAME USING utf8mb4) AS column_name,
                CONVERT(c.COLUMN_TYPE USING utf8mb4) AS data_type,
                CAST(c.IS_NULLABLE = 'YES' AS SIGNED) AS nullable,
                CAST(c.COLUMN_KEY = 'PRI' AS SIGNED) AS primary_key
            FROM information_schema.columns c
            JOIN information_schema.tables t
                ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME
            WHERE c.TABLE_SCHEMA = DATABASE()
            ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION
            "#;
    }

    pub mod sqlite {
        pub const REFLECT_COLUMNS: &str = r#"
            SELECT
                m.name AS table_name,
                m.type AS table_type,
                p.name AS column_name,
                p.type AS data_type,
                p."notnull" AS not_null,
                p.pk AS pk
            FROM sqlite_master m
            JOIN pragma_table_info(m.name) p
            WHERE m.type IN ('table', 'view')
            AND m.name NOT LIKE 'sqlite_%'
            ORDER BY m.name, p.cid
            "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub async fn reflect_rows(pool: &PgPool) -> DbResult<Vec<ReflectRow>> {
        let rows = sqlx::query(queries::postgres::REFLECT_COLUMNS)
            .fetch_all(pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ReflectRow {
                    table_name: row.try_get("table_name")?,
                    table_type: row.try_get("table_type")?,
                    column_name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    nullable: row.try_get("nullable")?,
                    primary_key: row.try_get("primary_key")?,
                })
            })
            .collect()
    }
}

mod mysql {
    use super::*;
    use sqlx::{MySqlPool, Row};

    pub async fn reflect_rows(pool: &MySqlPool) -> DbResult<Vec<ReflectRow>> {
        let rows = sqlx::query(queries::mysql::REFLECT_COLUMNS)
            .fetch_all(pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ReflectRow {
                    table_name: row.try_get("table_name")?,
                    table_type: row.try_get("table_type")?,
                    column_name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    nullable: row.try_get::<i64, _>("nullable")? != 0,
                    primary_key: row.try_get::<i64, _>("primary_key")? != 0,
                })
            })
            .collect()
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqlitePool};

    pub async fn reflect_rows(pool: &SqlitePool) -> DbResult<Vec<ReflectRow>> {
        let rows = sqlx::query(queries::sqlite::REFLECT_COLUMNS)
            .fetch_all(pool)
            .await?;
        rows.iter()
            .map(|row| {
                let not_null: i64 = row.try_get("not_null")?;
                let pk: i64 = row.try_get("pk")?;
                Ok(ReflectRow {
                    table_name: row.try_get("table_name")?,
                    table_type: row.try_get("table_type")?,
                    column_name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    nullable: not_null == 0 && pk == 0,
                    primary_key: pk > 0,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: &str, column: &str, pk: bool) -> ReflectRow {
        ReflectRow {
            table_name: table.to_string(),
            table_type: "table".to_string(),
            column_name: column.to_string(),
            data_type: "INTEGER".to_string(),
            nullable: !pk,
            primary_key: pk,
        }
    }

    #[test]
    fn test_group_rows_by_table() {
        let tables = group_rows(vec![
            row("events", "id", true),
            row("events", "kind", false),
            row("users", "id", true),
        ]);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "events");
        assert_eq!(tables[0].columns.len(), 2);
        assert!(tables[0].columns[0].primary_key);
        assert_eq!(tables[1].name, "users");
        assert_eq!(tables[1].table_type, TableType::Table);
    }

    #[test]
    fn test_group_rows_empty() {
        assert!(group_rows(Vec::new()).is_empty());
    }
}
