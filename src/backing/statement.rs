//! Backend statements and the MySQL-dialect builder

use serde::{Deserialize, Serialize};

use super::errors::{BackingError, BackingResult};
use super::StatementBuilder;
use crate::flush::Mutation;
use crate::row::Value;

/// Primary-key layout of a backing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    /// Key column names in declaration order
    pub primary_key_columns: Vec<String>,
}

impl TableSchema {
    pub fn new<I, S>(table: impl Into<String>, primary_key_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            primary_key_columns: primary_key_columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        self.primary_key_columns.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Upsert,
    Delete,
}

/// A parameterized statement ready to run against the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    pub sql: String,
    /// Bound primary-key values, in schema order
    pub key: Vec<(String, Value)>,
    /// Bound non-key columns, in column order (empty for deletes)
    pub values: Vec<(String, Value)>,
}

impl Statement {
    /// Positional parameters matching the placeholders in `sql`.
    pub fn params(&self) -> Vec<&Value> {
        self.key
            .iter()
            .chain(self.values.iter())
            .map(|(_, value)| value)
            .collect()
    }
}

/// Resolve the value for every schema key column.
///
/// Lookup order per column: the mutation's primary key, then its columns,
/// then (single-column keys only) the sole primary-key value regardless of
/// its name.
pub fn bind_primary_key(
    mutation: &Mutation,
    schema: &TableSchema,
) -> BackingResult<Vec<(String, Value)>> {
    let sole_value = match (
        schema.primary_key_columns.len(),
        mutation.primary_key.len(),
    ) {
        (1, 1) => mutation.primary_key.values().next(),
        _ => None,
    };

    schema
        .primary_key_columns
        .iter()
        .map(|column| {
            mutation
                .primary_key
                .get(column)
                .or_else(|| mutation.columns.get(column))
                .or(sole_value)
                .map(|value| (column.clone(), value.clone()))
                .ok_or_else(|| BackingError::MissingKeyValue {
                    table: schema.table.clone(),
                    column: column.clone(),
                })
        })
        .collect()
}

/// Builds `INSERT .. ON DUPLICATE KEY UPDATE` and `DELETE .. WHERE` statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlStatementBuilder;

impl MySqlStatementBuilder {
    fn quote(identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn upsert(
        &self,
        schema: &TableSchema,
        key: Vec<(String, Value)>,
        mutation: &Mutation,
    ) -> Statement {
        let values: Vec<(String, Value)> = mutation
            .columns
            .iter()
            .filter(|(column, _)| !schema.is_key_column(column))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();

        let names: Vec<String> = key
            .iter()
            .chain(values.iter())
            .map(|(column, _)| Self::quote(column))
            .collect();
        let placeholders = vec!["?"; names.len()].join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::quote(&schema.table),
            names.join(", "),
            placeholders
        );

        // Key-only rows still need a no-op update clause to stay idempotent.
        let updates: Vec<String> = if values.is_empty() {
            key.iter()
                .map(|(column, _)| {
                    let quoted = Self::quote(column);
                    format!("{} = {}", quoted, quoted)
                })
                .collect()
        } else {
            values
                .iter()
                .map(|(column, _)| {
                    let quoted = Self::quote(column);
                    format!("{} = VALUES({})", quoted, quoted)
                })
                .collect()
        };
        sql.push_str(" ON DUPLICATE KEY UPDATE ");
        sql.push_str(&updates.join(", "));

        Statement {
            kind: StatementKind::Upsert,
            table: schema.table.clone(),
            sql,
            key,
            values,
        }
    }

    fn delete(&self, schema: &TableSchema, key: Vec<(String, Value)>) -> Statement {
        let predicate: Vec<String> = key
            .iter()
            .map(|(column, _)| format!("{} = ?", Self::quote(column)))
            .collect();

        Statement {
            kind: StatementKind::Delete,
            table: schema.table.clone(),
            sql: format!(
                "DELETE FROM {} WHERE {}",
                Self::quote(&schema.table),
                predicate.join(" AND ")
            ),
            key,
            values: Vec::new(),
        }
    }
}

impl StatementBuilder for MySqlStatementBuilder {
    fn build(&self, mutation: &Mutation, schema: &TableSchema) -> BackingResult<Statement> {
        let key = bind_primary_key(mutation, schema)?;

        if mutation.is_delete {
            Ok(self.delete(schema, key))
        } else {
            Ok(self.upsert(schema, key, mutation))
        }
    }
}
