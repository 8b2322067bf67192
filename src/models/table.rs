//! Declared table metadata.
//!
//! Tables are declared once against a [`MetaData`] registry and never mutated
//! afterwards. Each table records the bind that owns it; the resolver and the
//! schema operations route on that key.

use crate::error::{DbError, DbResult};
use crate::models::{BindKey, DatabaseType};
use std::sync::{Arc, RwLock};

/// A column definition used to render DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Raw SQL type, e.g. `INTEGER` or `VARCHAR(255)`
    pub sql_type: String,
    pub primary_key: bool,
    pub nullable: bool,
    pub default: Option<String>,
    /// Extra constraint text appended verbatim (e.g. a `REFERENCES` clause)
    pub constraint: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            primary_key: false,
            nullable: true,
            default: None,
            constraint: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn constraint(mut self, clause: impl Into<String>) -> Self {
        self.constraint = Some(clause.into());
        self
    }

    fn render(&self, dialect: DatabaseType) -> String {
        let mut sql = format!("{} {}", dialect.quote_identifier(&self.name), self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if let Some(constraint) = &self.constraint {
            sql.push(' ');
            sql.push_str(constraint);
        }
        sql
    }
}

/// A declared table and the bind that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    bind_key: BindKey,
}

impl Table {
    /// A table owned by the primary bind.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            bind_key: BindKey::Primary,
        }
    }

    pub fn with_bind_key(mut self, bind_key: impl Into<BindKey>) -> Self {
        self.bind_key = bind_key.into();
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn bind_key(&self) -> &BindKey {
        &self.bind_key
    }

    pub fn create_sql(&self, dialect: DatabaseType) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| c.render(dialect))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            dialect.quote_identifier(&self.name),
            columns
        )
    }

    pub fn drop_sql(&self, dialect: DatabaseType) -> String {
        format!("DROP TABLE IF EXISTS {}", dialect.quote_identifier(&self.name))
    }
}

/// Registry of declared tables, in declaration order.
#[derive(Debug, Default)]
pub struct MetaData {
    tables: RwLock<Vec<Arc<Table>>>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. Names are unique across all binds.
    pub fn declare(&self, table: Table) -> DbResult<Arc<Table>> {
        if table.columns.is_empty() {
            return Err(DbError::schema(
                "Table must declare at least one column",
                table.name.clone(),
            ));
        }
        let mut tables = self
            .tables
            .write()
            .map_err(|_| DbError::internal("table registry lock poisoned"))?;
        if tables.iter().any(|t| t.name == table.name) {
            return Err(DbError::schema(
                "Table is already defined for this metadata",
                table.name.clone(),
            ));
        }
        let table = Arc::new(table);
        tables.push(Arc::clone(&table));
        Ok(table)
    }

    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.tables
            .read()
            .map(|tables| tables.clone())
            .unwrap_or_default()
    }

    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.iter().find(|t| t.name == name).cloned())
    }

    /// Every declared table whose bind equals `bind`, in declaration order.
    pub fn tables_for_bind(&self, bind: &BindKey) -> Vec<Arc<Table>> {
        self.tables
            .read()
            .map(|tables| {
                tables
                    .iter()
                    .filter(|t| &t.bind_key == bind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", "INTEGER").primary_key())
            .column(Column::new("name", "TEXT").not_null())
    }

    #[test]
    fn test_create_sql_sqlite() {
        assert_eq!(
            users().create_sql(DatabaseType::SQLite),
            "CREATE TABLE IF NOT EXISTS \"users\" (\"id\" INTEGER PRIMARY KEY, \"name\" TEXT NOT NULL)"
        );
    }

    #[test]
    fn test_create_sql_mysql_quotes_with_backticks() {
        let sql = users().create_sql(DatabaseType::MySQL);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `users`"));
        assert_eq!(
            users().drop_sql(DatabaseType::MySQL),
            "DROP TABLE IF EXISTS `users`"
        );
    }

    #[test]
    fn test_tables_for_bind_exact_match() {
        let metadata = MetaData::new();
        metadata.declare(users()).unwrap();
        metadata
            .declare(
                Table::new("events")
                    .with_bind_key("reporting")
                    .column(Column::new("id", "INTEGER")),
            )
            .unwrap();
        metadata
            .declare(
                Table::new("audit_log")
                    .with_bind_key("audit")
                    .column(Column::new("id", "INTEGER")),
            )
            .unwrap();

        let primary: Vec<_> = metadata
            .tables_for_bind(&BindKey::Primary)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(primary, vec!["users"]);

        let reporting: Vec<_> = metadata
            .tables_for_bind(&BindKey::named("reporting"))
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(reporting, vec!["events"]);

        assert!(metadata.tables_for_bind(&BindKey::named("other")).is_empty());
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let metadata = MetaData::new();
        metadata.declare(users()).unwrap();
        let err = metadata.declare(users()).unwrap_err();
        assert!(matches!(err, DbError::Schema { .. }));
        assert_eq!(metadata.len(), 1);
    }

    #[test]
    fn test_empty_table_rejected() {
        let metadata = MetaData::new();
        assert!(metadata.declare(Table::new("empty")).is_err());
        assert!(metadata.is_empty());
    }
}
