//! Ticker Plant Service
//!
//! Single ingestion point for time-stamped market events: validates
//! against fixed table schemas, appends to a per-day write-ahead log,
//! and fans batches out in append order to every live subscriber and the
//! in-memory session mirror. Crash recovery replays the open segment;
//! the daily rollover seals it for the historical sink.
//!
//! # Architecture
//!
//! ```text
//!        Publishers
//!            │
//!      ┌─────▼─────┐
//!      │  Ticker   │  ← validate, stamp times, day boundary
//!      │  Plant    │
//!      └─────┬─────┘
//!            │ append (durability point)
//!      ┌─────▼─────┐
//!      │    WAL    │  ← per-day segment, CRC32C per entry
//!      └─────┬─────┘
//!            │ fan-out (zero-latency | batched)
//!    ┌───────┼─────────────┐
//!    │       │             │
//! ┌──▼───┐ ┌─▼─────────┐ ┌─▼──────────┐
//! │Mirror│ │Subscribers│ │ End-of-day │
//! │ (RDB)│ │ (filtered)│ │ segment →  │
//! └──────┘ └───────────┘ │ hist. sink │
//!                        └────────────┘
//! ```

pub mod config;
pub mod delivery;
pub mod mirror;
pub mod plant;
pub mod replay;
pub mod subscriptions;
pub mod wal;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
