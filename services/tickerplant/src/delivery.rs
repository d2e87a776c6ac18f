//! Delivery policies: zero-latency and batched fan-out
//!
//! The policy is chosen once at startup and never re-dispatched per
//! record. Both policies preserve per-table append order to every
//! subscriber; they differ only in when a batch leaves the engine.
//!
//! A subscriber whose bounded queue is full is reported back to the
//! engine for removal rather than allowed to stall the shared path.

use crate::subscriptions::{
    DeliveryFailure, SubscriptionId, SubscriptionRegistry, TickMessage,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use types::record::Record;
use types::schema::SchemaRegistry;

/// Delivery granularity, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Publish each accepted batch immediately after its WAL append.
    ZeroLatency,
    /// Accumulate accepted records; a periodic tick flushes all buffered
    /// tables to subscribers in one round.
    Batched { interval: Duration },
}

/// Applies the configured delivery policy and tracks the two message
/// counters: records still buffered since the last flush boundary and
/// records published to subscribers.
pub struct DeliveryEngine {
    policy: DeliveryPolicy,
    buffer: BTreeMap<String, Vec<Record>>,
    buffered_records: u64,
    published_records: u64,
}

impl DeliveryEngine {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            buffer: BTreeMap::new(),
            buffered_records: 0,
            published_records: 0,
        }
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    /// Hand an accepted (already logged) batch to the policy.
    ///
    /// Returns the ids of subscribers that must be dropped (full queue or
    /// gone). In batched mode the batch is buffered and nothing is sent.
    pub fn offer(
        &mut self,
        schemas: &SchemaRegistry,
        registry: &SubscriptionRegistry,
        table: &str,
        records: Vec<Record>,
    ) -> Vec<SubscriptionId> {
        match self.policy {
            DeliveryPolicy::ZeroLatency => {
                self.published_records += records.len() as u64;
                self.publish_table(schemas, registry, table, &records)
            }
            DeliveryPolicy::Batched { .. } => {
                self.buffered_records += records.len() as u64;
                self.buffer
                    .entry(table.to_string())
                    .or_default()
                    .extend(records);
                Vec::new()
            }
        }
    }

    /// Flush all buffered tables to subscribers in one round, then clear
    /// the buffer and advance the published counter to the total.
    ///
    /// A no-op under zero-latency (the buffer is always empty).
    pub fn flush(
        &mut self,
        schemas: &SchemaRegistry,
        registry: &SubscriptionRegistry,
    ) -> Vec<SubscriptionId> {
        if self.buffer.is_empty() {
            return Vec::new();
        }

        let buffer = std::mem::take(&mut self.buffer);
        let mut dropped = Vec::new();
        for (table, records) in &buffer {
            for id in self.publish_table(schemas, registry, table, records) {
                if !dropped.contains(&id) {
                    dropped.push(id);
                }
            }
        }

        debug!(
            records = self.buffered_records,
            tables = buffer.len(),
            "Flushed delivery buffer"
        );
        self.published_records += self.buffered_records;
        self.buffered_records = 0;
        dropped
    }

    /// Send the day-boundary marker to every live subscriber.
    ///
    /// The caller flushes first so the marker strictly follows the final
    /// batch of the day.
    pub fn broadcast(
        &self,
        registry: &SubscriptionRegistry,
        message: TickMessage,
    ) -> Vec<SubscriptionId> {
        let mut dropped = Vec::new();
        for id in registry.all_ids() {
            match registry.try_send(id, message.clone()) {
                Ok(()) => {}
                Err(failure) => {
                    warn!(subscription = id, ?failure, "Broadcast delivery failed");
                    dropped.push(id);
                }
            }
        }
        dropped
    }

    /// Records buffered since the last flush boundary.
    pub fn buffered_records(&self) -> u64 {
        self.buffered_records
    }

    /// Records published to subscribers so far.
    pub fn published_records(&self) -> u64 {
        self.published_records
    }

    // ── Internal ────────────────────────────────────────────────────

    /// One fan-out round for one table. Per-subscriber filtering happens
    /// here; order within the batch is never changed.
    fn publish_table(
        &self,
        schemas: &SchemaRegistry,
        registry: &SubscriptionRegistry,
        table: &str,
        records: &[Record],
    ) -> Vec<SubscriptionId> {
        let Some(schema) = schemas.get(table) else {
            // Validation upstream makes this unreachable for accepted batches.
            return Vec::new();
        };

        let mut dropped = Vec::new();
        for id in registry.subscribers_of(table) {
            let Some(sub) = registry.get(id) else {
                continue;
            };

            let selected: Vec<Record> = if sub.filter.is_all() {
                records.to_vec()
            } else {
                records
                    .iter()
                    .filter(|r| {
                        schema
                            .symbol_of(r)
                            .map_or(false, |sym| sub.filter.matches(sym))
                    })
                    .cloned()
                    .collect()
            };

            // Filtered subscribers are not woken for batches with no match.
            if selected.is_empty() && !sub.filter.is_all() {
                continue;
            }

            let message = TickMessage::Batch {
                table: table.to_string(),
                records: selected,
            };
            match registry.try_send(id, message) {
                Ok(()) => {}
                Err(DeliveryFailure::QueueFull) => {
                    warn!(
                        subscription = id,
                        table, "Subscriber queue full, marking for drop"
                    );
                    dropped.push(id);
                }
                Err(DeliveryFailure::Disconnected) => {
                    debug!(subscription = id, table, "Subscriber gone, pruning");
                    dropped.push(id);
                }
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::SymbolFilter;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use types::record::Trade;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn trade_batch(entries: &[(&str, &str)]) -> Vec<Record> {
        entries
            .iter()
            .map(|(sym, price)| Trade::new(*sym, dec(price), 100).at(1_000).into_record())
            .collect()
    }

    fn batch_records(message: TickMessage) -> Vec<Record> {
        match message {
            TickMessage::Batch { records, .. } => records,
            other => panic!("Expected Batch, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_latency_delivers_immediately() {
        let schemas = SchemaRegistry::builtin();
        let mut registry = SubscriptionRegistry::new();
        let (_id, mut rx) = registry.subscribe("trade", SymbolFilter::All, 8);

        let mut engine = DeliveryEngine::new(DeliveryPolicy::ZeroLatency);
        let dropped = engine.offer(
            &schemas,
            &registry,
            "trade",
            trade_batch(&[("AAPL", "100")]),
        );

        assert!(dropped.is_empty());
        assert_eq!(batch_records(rx.try_recv().unwrap()).len(), 1);
        assert_eq!(engine.published_records(), 1);
        assert_eq!(engine.buffered_records(), 0);
    }

    #[test]
    fn test_batched_holds_until_flush() {
        let schemas = SchemaRegistry::builtin();
        let mut registry = SubscriptionRegistry::new();
        let (_id, mut rx) = registry.subscribe("trade", SymbolFilter::All, 8);

        let mut engine = DeliveryEngine::new(DeliveryPolicy::Batched {
            interval: Duration::from_secs(1),
        });

        engine.offer(
            &schemas,
            &registry,
            "trade",
            trade_batch(&[("AAPL", "100")]),
        );
        engine.offer(
            &schemas,
            &registry,
            "trade",
            trade_batch(&[("AAPL", "101")]),
        );

        // Nothing delivered before the flush tick
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.buffered_records(), 2);
        assert_eq!(engine.published_records(), 0);

        let dropped = engine.flush(&schemas, &registry);
        assert!(dropped.is_empty());
        assert_eq!(engine.buffered_records(), 0);
        assert_eq!(engine.published_records(), 2);

        // One round with both records, order preserved
        let records = batch_records(rx.try_recv().unwrap());
        assert_eq!(records.len(), 2);
        let prices: Vec<String> = records
            .iter()
            .map(|r| Trade::from_record(r).unwrap().price.to_string())
            .collect();
        assert_eq!(prices, vec!["100", "101"]);
    }

    #[test]
    fn test_symbol_filter_selects_only_matches() {
        let schemas = SchemaRegistry::builtin();
        let mut registry = SubscriptionRegistry::new();
        let (_id, mut rx) = registry.subscribe("trade", SymbolFilter::symbols(["MSFT"]), 8);

        let mut engine = DeliveryEngine::new(DeliveryPolicy::ZeroLatency);
        engine.offer(
            &schemas,
            &registry,
            "trade",
            trade_batch(&[("AAPL", "100"), ("MSFT", "410")]),
        );

        let records = batch_records(rx.try_recv().unwrap());
        assert_eq!(records.len(), 1);
        assert_eq!(Trade::from_record(&records[0]).unwrap().sym, "MSFT");
    }

    #[test]
    fn test_filtered_subscriber_skipped_on_no_match() {
        let schemas = SchemaRegistry::builtin();
        let mut registry = SubscriptionRegistry::new();
        let (_id, mut rx) = registry.subscribe("trade", SymbolFilter::symbols(["MSFT"]), 8);

        let mut engine = DeliveryEngine::new(DeliveryPolicy::ZeroLatency);
        engine.offer(
            &schemas,
            &registry,
            "trade",
            trade_batch(&[("AAPL", "100")]),
        );

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_marks_subscriber_dropped() {
        let schemas = SchemaRegistry::builtin();
        let mut registry = SubscriptionRegistry::new();
        let (slow, _rx_slow) = registry.subscribe("trade", SymbolFilter::All, 1);
        let (_fast, mut rx_fast) = registry.subscribe("trade", SymbolFilter::All, 8);

        let mut engine = DeliveryEngine::new(DeliveryPolicy::ZeroLatency);
        let first = engine.offer(
            &schemas,
            &registry,
            "trade",
            trade_batch(&[("AAPL", "100")]),
        );
        assert!(first.is_empty());

        // Slow subscriber never drains; second round overflows its queue.
        let second = engine.offer(
            &schemas,
            &registry,
            "trade",
            trade_batch(&[("AAPL", "101")]),
        );
        assert_eq!(second, vec![slow]);

        // The healthy subscriber still got both rounds.
        assert_eq!(batch_records(rx_fast.try_recv().unwrap()).len(), 1);
        assert_eq!(batch_records(rx_fast.try_recv().unwrap()).len(), 1);
    }

    #[test]
    fn test_cross_table_batching() {
        let schemas = SchemaRegistry::builtin();
        let mut registry = SubscriptionRegistry::new();
        let (_t, mut rx_trade) = registry.subscribe("trade", SymbolFilter::All, 8);
        let (_q, mut rx_quote) = registry.subscribe("quote", SymbolFilter::All, 8);

        let mut engine = DeliveryEngine::new(DeliveryPolicy::Batched {
            interval: Duration::from_secs(1),
        });
        engine.offer(
            &schemas,
            &registry,
            "trade",
            trade_batch(&[("AAPL", "100")]),
        );
        engine.offer(
            &schemas,
            &registry,
            "quote",
            vec![types::record::Quote::new("AAPL", dec("99.9"), dec("100.1"), 5, 5)
                .at(2_000)
                .into_record()],
        );

        engine.flush(&schemas, &registry);
        assert!(rx_trade.try_recv().is_ok());
        assert!(rx_quote.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_reaches_all_tables() {
        let mut registry = SubscriptionRegistry::new();
        let (_t, mut rx_trade) = registry.subscribe("trade", SymbolFilter::All, 8);
        let (_q, mut rx_quote) = registry.subscribe("quote", SymbolFilter::All, 8);

        let engine = DeliveryEngine::new(DeliveryPolicy::ZeroLatency);
        let message = TickMessage::EndOfDay {
            date: types::session::SessionDate::parse("2024-02-16").unwrap(),
            segment: "/tmp/segment-20240216.wal".into(),
        };
        let dropped = engine.broadcast(&registry, message.clone());

        assert!(dropped.is_empty());
        assert_eq!(rx_trade.try_recv().unwrap(), message);
        assert_eq!(rx_quote.try_recv().unwrap(), message);
    }
}
