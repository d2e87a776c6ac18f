//! Schema registry for the fixed ticker plant tables
//!
//! Every record entering the plant is validated against an explicit
//! typed-field descriptor keyed by table name. Tables are fixed-schema:
//! arity and per-column types must match exactly, so downstream consumers
//! never see a malformed row.

use crate::record::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Column type descriptor, one variant per `Value` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Timestamp,
    Symbol,
    Decimal,
    Int,
    Side,
    Status,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Timestamp => "timestamp",
            ColumnType::Symbol => "symbol",
            ColumnType::Decimal => "decimal",
            ColumnType::Int => "int",
            ColumnType::Side => "side",
            ColumnType::Status => "status",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named, typed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl ColumnDef {
    const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }
}

/// Schema validation errors, reported to the publisher before any log write.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("unknown table: {name}")]
    UnknownTable { name: String },

    #[error("table {table}: arity mismatch, expected {expected} columns, got {got}")]
    Arity {
        table: String,
        expected: usize,
        got: usize,
    },

    #[error("table {table}: column {column} expects {expected}, got {got}")]
    ColumnType {
        table: String,
        column: String,
        expected: ColumnType,
        got: String,
    },
}

/// Typed descriptor for one table: column set plus the well-known
/// time/symbol column positions used on the hot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
    /// Index of the timestamp column, if the table has one.
    pub time_col: Option<usize>,
    /// Index of the symbol column used for subscription filtering.
    pub sym_col: Option<usize>,
}

impl TableSchema {
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Validate one record: arity first, then per-column type.
    ///
    /// `Null` is accepted only in the timestamp column (it marks a time to
    /// be stamped by the engine).
    pub fn validate_record(&self, record: &Record) -> Result<(), SchemaError> {
        if record.arity() != self.arity() {
            return Err(SchemaError::Arity {
                table: self.name.to_string(),
                expected: self.arity(),
                got: record.arity(),
            });
        }

        for (index, (value, col)) in record.values.iter().zip(self.columns.iter()).enumerate() {
            let ok = match (value, col.ty) {
                (Value::Timestamp(_), ColumnType::Timestamp) => true,
                (Value::Null, ColumnType::Timestamp) => self.time_col == Some(index),
                (Value::Symbol(_), ColumnType::Symbol) => true,
                (Value::Decimal(_), ColumnType::Decimal) => true,
                (Value::Int(_), ColumnType::Int) => true,
                (Value::Side(_), ColumnType::Side) => true,
                (Value::Status(_), ColumnType::Status) => true,
                _ => false,
            };
            if !ok {
                return Err(SchemaError::ColumnType {
                    table: self.name.to_string(),
                    column: col.name.to_string(),
                    expected: col.ty,
                    got: value.type_label().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validate a whole batch; fails on the first bad record so the caller
    /// can reject the batch with no partial side effects.
    pub fn validate_batch(&self, batch: &[Record]) -> Result<(), SchemaError> {
        for record in batch {
            self.validate_record(record)?;
        }
        Ok(())
    }

    /// Extract the subscription symbol of a record, if the table has one.
    pub fn symbol_of<'a>(&self, record: &'a Record) -> Option<&'a str> {
        self.sym_col
            .and_then(|i| record.get(i))
            .and_then(Value::as_symbol)
    }

    /// Extract the event time of a record, if present and stamped.
    pub fn time_of(&self, record: &Record) -> Option<i64> {
        self.time_col
            .and_then(|i| record.get(i))
            .and_then(Value::as_timestamp)
    }

    fn trade() -> Self {
        Self {
            name: "trade",
            columns: vec![
                ColumnDef::new("time", ColumnType::Timestamp),
                ColumnDef::new("sym", ColumnType::Symbol),
                ColumnDef::new("price", ColumnType::Decimal),
                ColumnDef::new("size", ColumnType::Int),
            ],
            time_col: Some(0),
            sym_col: Some(1),
        }
    }

    fn quote() -> Self {
        Self {
            name: "quote",
            columns: vec![
                ColumnDef::new("time", ColumnType::Timestamp),
                ColumnDef::new("sym", ColumnType::Symbol),
                ColumnDef::new("bid", ColumnType::Decimal),
                ColumnDef::new("ask", ColumnType::Decimal),
                ColumnDef::new("bsize", ColumnType::Int),
                ColumnDef::new("asize", ColumnType::Int),
            ],
            time_col: Some(0),
            sym_col: Some(1),
        }
    }

    fn bar() -> Self {
        Self {
            name: "bar",
            columns: vec![
                ColumnDef::new("time", ColumnType::Timestamp),
                ColumnDef::new("sym", ColumnType::Symbol),
                ColumnDef::new("open", ColumnType::Decimal),
                ColumnDef::new("high", ColumnType::Decimal),
                ColumnDef::new("low", ColumnType::Decimal),
                ColumnDef::new("close", ColumnType::Decimal),
                ColumnDef::new("volume", ColumnType::Int),
            ],
            time_col: Some(0),
            sym_col: Some(1),
        }
    }

    fn order() -> Self {
        Self {
            name: "order",
            columns: vec![
                ColumnDef::new("time", ColumnType::Timestamp),
                ColumnDef::new("sym", ColumnType::Symbol),
                ColumnDef::new("side", ColumnType::Side),
                ColumnDef::new("qty", ColumnType::Int),
                ColumnDef::new("price", ColumnType::Decimal),
                ColumnDef::new("status", ColumnType::Status),
            ],
            time_col: Some(0),
            sym_col: Some(1),
        }
    }

    fn position() -> Self {
        Self {
            name: "position",
            columns: vec![
                ColumnDef::new("sym", ColumnType::Symbol),
                ColumnDef::new("qty", ColumnType::Int),
                ColumnDef::new("avg_cost", ColumnType::Decimal),
                ColumnDef::new("last_price", ColumnType::Decimal),
                ColumnDef::new("unrealized_pnl", ColumnType::Decimal),
            ],
            time_col: None,
            sym_col: Some(0),
        }
    }
}

/// Static registry of all table schemas, keyed by table name.
///
/// Uses `BTreeMap` for deterministic iteration.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: BTreeMap<&'static str, TableSchema>,
}

impl SchemaRegistry {
    /// Build the registry with the five built-in tables.
    pub fn builtin() -> Self {
        let mut tables = BTreeMap::new();
        for schema in [
            TableSchema::trade(),
            TableSchema::quote(),
            TableSchema::bar(),
            TableSchema::order(),
            TableSchema::position(),
        ] {
            tables.insert(schema.name, schema);
        }
        Self { tables }
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Look up a schema, failing with `UnknownTable` for anything not
    /// registered.
    pub fn require(&self, name: &str) -> Result<&TableSchema, SchemaError> {
        self.get(name).ok_or_else(|| SchemaError::UnknownTable {
            name: name.to_string(),
        })
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
