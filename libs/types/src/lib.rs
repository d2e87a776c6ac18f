//! Types library for the market-data ticker plant
//!
//! This library provides the type definitions shared by the ticker plant
//! service and its in-process publishers and subscribers: typed record
//! values, the fixed table schemas, and the trading-session date.
//!
//! # Modules
//! - `record`: typed values, generic records, and the typed table rows
//!   (`Trade`, `Quote`, `Bar`, `Order`, `Position`)
//! - `schema`: per-table typed-field descriptors and the schema registry
//! - `session`: trading-session date arithmetic

// Public modules
pub mod record;
pub mod schema;
pub mod session;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::record::*;
    pub use crate::schema::*;
    pub use crate::session::*;
}
