//! Record and value types for ticker plant tables
//!
//! A `Record` is an ordered tuple of typed `Value`s belonging to one of the
//! fixed tables (trade, quote, bar, order, position). Publishers usually
//! build the typed structs (`Trade`, `Quote`, ...) and convert them to the
//! generic record form that travels through the log and the fan-out path.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(non_camel_case_types)]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::BUY => "BUY",
            Side::SELL => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status carried in the `order` table's status column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Accepted and awaiting matching
    Pending,
    /// Partially matched
    Partial,
    /// Completely matched (terminal)
    Filled,
    /// Canceled by user or system (terminal)
    Canceled,
    /// Failed validation (terminal)
    Rejected,
    /// Time-in-force deadline reached (terminal)
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed field value within a record.
///
/// `Null` is only legal in a timestamp column, and only on the publisher
/// side: the engine stamps missing times before anything is logged, so
/// records read back from a segment never contain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Unix nanoseconds
    Timestamp(i64),
    /// Instrument symbol, e.g. "AAPL"
    Symbol(String),
    /// Price-like decimal field
    Decimal(Decimal),
    /// Integer field (sizes, volumes, quantities)
    Int(i64),
    Side(Side),
    Status(OrderStatus),
    /// Missing timestamp, stamped at publish time
    Null,
}

impl Value {
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_side(&self) -> Option<Side> {
        match self {
            Value::Side(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<OrderStatus> {
        match self {
            Value::Status(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type label for error messages.
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Timestamp(_) => "timestamp",
            Value::Symbol(_) => "symbol",
            Value::Decimal(_) => "decimal",
            Value::Int(_) => "int",
            Value::Side(_) => "side",
            Value::Status(_) => "status",
            Value::Null => "null",
        }
    }
}

/// An ordered tuple of values belonging to a named table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Errors converting between records and typed structs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("record arity mismatch: expected {expected}, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("field {index} has wrong type: expected {expected}")]
    FieldType { index: usize, expected: &'static str },
}

fn field<'a>(record: &'a Record, index: usize, expected_arity: usize) -> Result<&'a Value, RecordError> {
    if record.arity() != expected_arity {
        return Err(RecordError::Arity {
            expected: expected_arity,
            got: record.arity(),
        });
    }
    // arity already checked, index is in bounds
    Ok(&record.values[index])
}

fn time_field(record: &Record, index: usize, arity: usize) -> Result<Option<i64>, RecordError> {
    match field(record, index, arity)? {
        Value::Timestamp(t) => Ok(Some(*t)),
        Value::Null => Ok(None),
        _ => Err(RecordError::FieldType {
            index,
            expected: "timestamp",
        }),
    }
}

// ── Typed table rows ────────────────────────────────────────────────

/// A row of the `trade` table: {time, sym, price, size}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Unix nanos; `None` means "stamp at publish time"
    pub time: Option<i64>,
    pub sym: String,
    pub price: Decimal,
    pub size: i64,
}

impl Trade {
    pub fn new(sym: impl Into<String>, price: Decimal, size: i64) -> Self {
        Self {
            time: None,
            sym: sym.into(),
            price,
            size,
        }
    }

    /// Attach an explicit event time (Unix nanos).
    pub fn at(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn into_record(self) -> Record {
        Record::new(vec![
            self.time.map_or(Value::Null, Value::Timestamp),
            Value::Symbol(self.sym),
            Value::Decimal(self.price),
            Value::Int(self.size),
        ])
    }

    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        let time = time_field(record, 0, 4)?;
        let sym = record.values[1]
            .as_symbol()
            .ok_or(RecordError::FieldType {
                index: 1,
                expected: "symbol",
            })?
            .to_string();
        let price = record.values[2].as_decimal().ok_or(RecordError::FieldType {
            index: 2,
            expected: "decimal",
        })?;
        let size = record.values[3].as_int().ok_or(RecordError::FieldType {
            index: 3,
            expected: "int",
        })?;
        Ok(Self {
            time,
            sym,
            price,
            size,
        })
    }
}

/// A row of the `quote` table: {time, sym, bid, ask, bsize, asize}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub time: Option<i64>,
    pub sym: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub bsize: i64,
    pub asize: i64,
}

impl Quote {
    pub fn new(sym: impl Into<String>, bid: Decimal, ask: Decimal, bsize: i64, asize: i64) -> Self {
        Self {
            time: None,
            sym: sym.into(),
            bid,
            ask,
            bsize,
            asize,
        }
    }

    pub fn at(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    /// Quoted spread (ask - bid).
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    pub fn into_record(self) -> Record {
        Record::new(vec![
            self.time.map_or(Value::Null, Value::Timestamp),
            Value::Symbol(self.sym),
            Value::Decimal(self.bid),
            Value::Decimal(self.ask),
            Value::Int(self.bsize),
            Value::Int(self.asize),
        ])
    }

    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        let time = time_field(record, 0, 6)?;
        let sym = record.values[1]
            .as_symbol()
            .ok_or(RecordError::FieldType {
                index: 1,
                expected: "symbol",
            })?
            .to_string();
        let decimal_at = |index: usize| {
            record.values[index]
                .as_decimal()
                .ok_or(RecordError::FieldType {
                    index,
                    expected: "decimal",
                })
        };
        let int_at = |index: usize| {
            record.values[index].as_int().ok_or(RecordError::FieldType {
                index,
                expected: "int",
            })
        };
        Ok(Self {
            time,
            sym,
            bid: decimal_at(2)?,
            ask: decimal_at(3)?,
            bsize: int_at(4)?,
            asize: int_at(5)?,
        })
    }
}

/// A row of the `bar` table: {time, sym, open, high, low, close, volume}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: Option<i64>,
    pub sym: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sym: impl Into<String>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
    ) -> Self {
        Self {
            time: None,
            sym: sym.into(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn at(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn into_record(self) -> Record {
        Record::new(vec![
            self.time.map_or(Value::Null, Value::Timestamp),
            Value::Symbol(self.sym),
            Value::Decimal(self.open),
            Value::Decimal(self.high),
            Value::Decimal(self.low),
            Value::Decimal(self.close),
            Value::Int(self.volume),
        ])
    }

    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        let time = time_field(record, 0, 7)?;
        let sym = record.values[1]
            .as_symbol()
            .ok_or(RecordError::FieldType {
                index: 1,
                expected: "symbol",
            })?
            .to_string();
        let decimal_at = |index: usize| {
            record.values[index]
                .as_decimal()
                .ok_or(RecordError::FieldType {
                    index,
                    expected: "decimal",
                })
        };
        let volume = record.values[6].as_int().ok_or(RecordError::FieldType {
            index: 6,
            expected: "int",
        })?;
        Ok(Self {
            time,
            sym,
            open: decimal_at(2)?,
            high: decimal_at(3)?,
            low: decimal_at(4)?,
            close: decimal_at(5)?,
            volume,
        })
    }
}

/// A row of the `order` table: {time, sym, side, qty, price, status}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub time: Option<i64>,
    pub sym: String,
    pub side: Side,
    pub qty: i64,
    pub price: Decimal,
    pub status: OrderStatus,
}

impl Order {
    pub fn new(
        sym: impl Into<String>,
        side: Side,
        qty: i64,
        price: Decimal,
        status: OrderStatus,
    ) -> Self {
        Self {
            time: None,
            sym: sym.into(),
            side,
            qty,
            price,
            status,
        }
    }

    pub fn at(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn into_record(self) -> Record {
        Record::new(vec![
            self.time.map_or(Value::Null, Value::Timestamp),
            Value::Symbol(self.sym),
            Value::Side(self.side),
            Value::Int(self.qty),
            Value::Decimal(self.price),
            Value::Status(self.status),
        ])
    }

    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        let time = time_field(record, 0, 6)?;
        let sym = record.values[1]
            .as_symbol()
            .ok_or(RecordError::FieldType {
                index: 1,
                expected: "symbol",
            })?
            .to_string();
        let side = record.values[2].as_side().ok_or(RecordError::FieldType {
            index: 2,
            expected: "side",
        })?;
        let qty = record.values[3].as_int().ok_or(RecordError::FieldType {
            index: 3,
            expected: "int",
        })?;
        let price = record.values[4].as_decimal().ok_or(RecordError::FieldType {
            index: 4,
            expected: "decimal",
        })?;
        let status = record.values[5].as_status().ok_or(RecordError::FieldType {
            index: 5,
            expected: "status",
        })?;
        Ok(Self {
            time,
            sym,
            side,
            qty,
            price,
            status,
        })
    }
}

/// A row of the `position` table: {sym, qty, avg_cost, last_price, unrealized_pnl}.
///
/// Positions carry no event time; their effective date is always the
/// current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub sym: String,
    pub qty: i64,
    pub avg_cost: Decimal,
    pub last_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn new(
        sym: impl Into<String>,
        qty: i64,
        avg_cost: Decimal,
        last_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> Self {
        Self {
            sym: sym.into(),
            qty,
            avg_cost,
            last_price,
            unrealized_pnl,
        }
    }

    /// Mark-to-market value (qty x last_price).
    pub fn market_value(&self) -> Decimal {
        Decimal::from(self.qty) * self.last_price
    }

    pub fn into_record(self) -> Record {
        Record::new(vec![
            Value::Symbol(self.sym),
            Value::Int(self.qty),
            Value::Decimal(self.avg_cost),
            Value::Decimal(self.last_price),
            Value::Decimal(self.unrealized_pnl),
        ])
    }

    pub fn from_record(record: &Record) -> Result<Self, RecordError> {
        let sym = field(record, 0, 5)?
            .as_symbol()
            .ok_or(RecordError::FieldType {
                index: 0,
                expected: "symbol",
            })?
            .to_string();
        let qty = record.values[1].as_int().ok_or(RecordError::FieldType {
            index: 1,
            expected: "int",
        })?;
        let decimal_at = |index: usize| {
            record.values[index]
                .as_decimal()
                .ok_or(RecordError::FieldType {
                    index,
                    expected: "decimal",
                })
        };
        Ok(Self {
            sym,
            qty,
            avg_cost: decimal_at(2)?,
            last_price: decimal_at(3)?,
            unrealized_pnl: decimal_at(4)?,
        })
    }
}
