//! Real-time mirror: in-memory view of the current session
//!
//! Holds every table of the current trading day in append order, plus a
//! last-record-by-symbol index for point queries. Rebuilt by segment
//! replay on attach and truncated at the day boundary.
//!
//! Uses `BTreeMap` keyed state so the serialized form, and therefore the
//! state checksum, is deterministic.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use types::record::{Record, Trade};
use types::schema::{SchemaRegistry, TableSchema};

/// In-memory, queryable copy of the session's tables.
#[derive(Debug, Default)]
pub struct RealTimeMirror {
    /// Full tables in append order.
    tables: BTreeMap<String, Vec<Record>>,
    /// Most recent record per symbol, per table.
    last_by_symbol: BTreeMap<String, HashMap<String, Record>>,
}

impl RealTimeMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a mirror from replayed (table, batch) pairs.
    pub fn rebuild(schemas: &SchemaRegistry, batches: &[(String, Vec<Record>)]) -> Self {
        let mut mirror = Self::new();
        for (table, records) in batches {
            if let Some(schema) = schemas.get(table) {
                mirror.apply(schema, records);
            }
        }
        mirror
    }

    /// Append a delivered batch to the table and refresh the per-symbol
    /// index. Records arrive validated and stamped.
    pub fn apply(&mut self, schema: &TableSchema, records: &[Record]) {
        let table = self.tables.entry(schema.name.to_string()).or_default();
        table.extend_from_slice(records);

        let index = self
            .last_by_symbol
            .entry(schema.name.to_string())
            .or_default();
        for record in records {
            if let Some(sym) = schema.symbol_of(record) {
                index.insert(sym.to_string(), record.clone());
            }
        }
    }

    /// The table's records in append order (empty for an unseen table).
    pub fn records(&self, table: &str) -> &[Record] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, table: &str) -> usize {
        self.records(table).len()
    }

    pub fn total_records(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }

    /// Most recent record for a symbol in a table.
    pub fn last_by_symbol(&self, table: &str, sym: &str) -> Option<&Record> {
        self.last_by_symbol.get(table).and_then(|idx| idx.get(sym))
    }

    /// Last trade price for a symbol, if any trade was seen this session.
    pub fn last_trade_price(&self, sym: &str) -> Option<Decimal> {
        self.last_by_symbol("trade", sym)
            .and_then(|r| Trade::from_record(r).ok())
            .map(|t| t.price)
    }

    /// Drop all session state (day boundary).
    pub fn truncate(&mut self) {
        self.tables.clear();
        self.last_by_symbol.clear();
    }

    /// Deterministic SHA-256 over the serialized tables. Two mirrors that
    /// saw the same batches in the same order hash identically; used to
    /// verify replay fidelity.
    pub fn state_checksum(&self) -> String {
        let bytes = bincode::serialize(&self.tables)
            .expect("mirror table serialization should never fail");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }
}
