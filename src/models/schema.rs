//! Schema-related data models.
//!
//! This module defines the types returned by reflection.

use crate::models::BindKey;
use serde::{Deserialize, Serialize};

/// Table type as reported by the database catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
}

impl TableType {
    /// Parse table type from catalog strings (`BASE TABLE`, `table`, `VIEW`, ...).
    pub fn parse(s: &str) -> Self {
        if s.to_ascii_uppercase().contains("VIEW") {
            Self::View
        } else {
            Self::Table
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectedColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectedTable {
    pub name: String,
    pub table_type: TableType,
    pub columns: Vec<ReflectedColumn>,
}

impl ReflectedTable {
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            name: name.into(),
            table_type,
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ReflectedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Everything reflected from one bind's engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectedSchema {
    pub bind: BindKey,
    pub tables: Vec<ReflectedTable>,
}

impl ReflectedSchema {
    pub fn table(&self, name: &str) -> Option<&ReflectedTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}
