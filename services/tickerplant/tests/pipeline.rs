//! End-to-end pipeline tests for the ticker plant
//!
//! Exercises the full publish path (validate, log, mirror, fan-out)
//! across both delivery policies, plus day rollover, crash replay, and
//! corruption refusal.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tickerplant::config::PlantConfig;
use tickerplant::delivery::DeliveryPolicy;
use tickerplant::plant::{PlantError, TickerPlant, TimeSource};
use tickerplant::subscriptions::{SymbolFilter, TickMessage};
use tickerplant::wal::SegmentWriter;
use types::record::{Quote, Record, Trade};
use types::session::SessionDate;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn session() -> SessionDate {
    SessionDate::parse("2024-02-16").unwrap()
}

/// Nanos at noon UTC, `days` after the session date.
fn noon(days: i64) -> i64 {
    let midnight = 1_708_041_600_000_000_000; // 2024-02-16T00:00:00Z
    midnight + days * 86_400_000_000_000 + 43_200_000_000_000
}

struct SharedClock(Arc<AtomicI64>);

impl TimeSource for SharedClock {
    fn now_nanos(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn open(config: PlantConfig) -> TickerPlant {
    let now = Arc::new(AtomicI64::new(noon(0)));
    TickerPlant::open_with_time_source(config, Box::new(SharedClock(now))).unwrap()
}

fn trade(sym: &str, price: &str, time: i64) -> Record {
    Trade::new(sym, dec(price), 100).at(time).into_record()
}

fn received_prices(message: TickMessage) -> Vec<String> {
    match message {
        TickMessage::Batch { records, .. } => records
            .iter()
            .map(|r| Trade::from_record(r).unwrap().price.to_string())
            .collect(),
        other => panic!("Expected Batch, got {:?}", other),
    }
}

/// Publish three AAPL trades in sequence; the subscriber must see them in
/// that order and the mirror's last price must be the final one.
#[test]
fn aapl_sequence_preserved_and_last_price_wins() {
    let tmp = TempDir::new().unwrap();
    let mut plant = open(PlantConfig::new(tmp.path(), session()));
    let (_id, mut rx) = plant
        .subscribe("trade", SymbolFilter::symbols(["AAPL"]))
        .unwrap();

    for (i, price) in ["100", "101", "99"].iter().enumerate() {
        plant
            .publish("trade", vec![trade("AAPL", price, noon(0) + i as i64)])
            .unwrap();
    }

    let mut seen = Vec::new();
    while let Ok(message) = rx.try_recv() {
        seen.extend(received_prices(message));
    }
    assert_eq!(seen, vec!["100", "101", "99"]);
    assert_eq!(plant.mirror().last_trade_price("AAPL"), Some(dec("99")));
}

/// A MSFT-filtered subscriber never sees the AAPL record.
#[test]
fn symbol_filter_excludes_other_symbols() {
    let tmp = TempDir::new().unwrap();
    let mut plant = open(PlantConfig::new(tmp.path(), session()));
    let (_id, mut rx) = plant
        .subscribe("trade", SymbolFilter::symbols(["MSFT"]))
        .unwrap();

    plant
        .publish("trade", vec![trade("AAPL", "187.25", noon(0))])
        .unwrap();
    plant
        .publish("trade", vec![trade("MSFT", "410.50", noon(0) + 1)])
        .unwrap();

    let message = rx.try_recv().unwrap();
    match message {
        TickMessage::Batch { records, .. } => {
            assert_eq!(records.len(), 1);
            assert_eq!(Trade::from_record(&records[0]).unwrap().sym, "MSFT");
        }
        other => panic!("Expected Batch, got {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

/// Order is preserved under both delivery policies.
#[test]
fn order_preserved_under_both_policies() {
    let policies = [
        DeliveryPolicy::ZeroLatency,
        DeliveryPolicy::Batched {
            interval: Duration::from_secs(1),
        },
    ];

    for policy in policies {
        let tmp = TempDir::new().unwrap();
        let mut plant = open(PlantConfig::new(tmp.path(), session()).with_delivery(policy));
        let (_id, mut rx) = plant.subscribe("trade", SymbolFilter::All).unwrap();

        for (i, price) in ["1", "2", "3", "4", "5"].iter().enumerate() {
            plant
                .publish("trade", vec![trade("AAPL", price, noon(0) + i as i64)])
                .unwrap();
        }
        plant.flush();

        let mut seen = Vec::new();
        while let Ok(message) = rx.try_recv() {
            seen.extend(received_prices(message));
        }
        assert_eq!(seen, vec!["1", "2", "3", "4", "5"], "policy {:?}", policy);
    }
}

/// A batch that fails schema validation leaves no WAL entry and delivers
/// nothing.
#[test]
fn schema_mismatch_has_no_partial_side_effects() {
    let tmp = TempDir::new().unwrap();
    let mut plant = open(PlantConfig::new(tmp.path(), session()));
    let (_id, mut rx) = plant.subscribe("trade", SymbolFilter::All).unwrap();

    let good = trade("AAPL", "100", noon(0));
    let bad = Quote::new("AAPL", dec("1"), dec("2"), 1, 1).into_record();
    let result = plant.publish("trade", vec![good, bad]);
    assert!(matches!(result, Err(PlantError::Schema(_))));

    assert_eq!(plant.status().total_messages, 0);
    assert!(rx.try_recv().is_err());

    // Segment file carries nothing.
    let segment = SegmentWriter::segment_path(tmp.path(), session());
    let len = std::fs::metadata(&segment).map(|m| m.len()).unwrap_or(0);
    assert_eq!(len, 0);
}

/// Rollover D -> D+1 seals the D segment, opens an empty D+1 segment, and
/// truncates the mirror.
#[test]
fn rollover_seals_old_day_and_resets_session() {
    let tmp = TempDir::new().unwrap();
    let mut plant = open(PlantConfig::new(tmp.path(), session()));
    let (_id, mut rx) = plant.subscribe("trade", SymbolFilter::All).unwrap();

    plant
        .publish("trade", vec![trade("AAPL", "100", noon(0))])
        .unwrap();
    let next = plant.trigger_end_of_day().unwrap();

    assert_eq!(next, session().next());
    assert!(plant.mirror().is_empty());
    assert_eq!(plant.status().total_messages, 0);
    assert_eq!(plant.status().open_segment_id, "segment-20240217");

    let sealed = SegmentWriter::segment_path(tmp.path(), session());
    let fresh = SegmentWriter::segment_path(tmp.path(), next);
    assert!(sealed.exists());
    assert!(std::fs::metadata(&sealed).unwrap().len() > 0);
    assert_eq!(std::fs::metadata(&fresh).unwrap().len(), 0);

    // Subscriber observes the batch, then the boundary marker naming the
    // sealed segment.
    assert!(matches!(rx.try_recv().unwrap(), TickMessage::Batch { .. }));
    match rx.try_recv().unwrap() {
        TickMessage::EndOfDay { date, segment } => {
            assert_eq!(date, session());
            assert_eq!(segment, sealed);
        }
        other => panic!("Expected EndOfDay, got {:?}", other),
    }
}

/// An event dated two days ahead is a clock anomaly: no rollover, no
/// append.
#[test]
fn two_day_jump_is_rejected_without_state_change() {
    let tmp = TempDir::new().unwrap();
    let mut plant = open(PlantConfig::new(tmp.path(), session()));

    plant
        .publish("trade", vec![trade("AAPL", "100", noon(0))])
        .unwrap();

    let result = plant.publish("trade", vec![trade("AAPL", "200", noon(2))]);
    match result {
        Err(PlantError::ClockAnomaly {
            session_date,
            event_date,
        }) => {
            assert_eq!(session_date, session());
            assert_eq!(event_date, SessionDate::parse("2024-02-18").unwrap());
        }
        other => panic!("Expected ClockAnomaly, got {:?}", other),
    }

    assert_eq!(plant.session_date(), session());
    assert_eq!(plant.status().total_messages, 1);
}

/// Replay after a clean shutdown reproduces the exact in-memory state.
#[test]
fn replay_reproduces_state_after_clean_shutdown() {
    let tmp = TempDir::new().unwrap();
    let checksum;
    {
        let mut plant = open(PlantConfig::new(tmp.path(), session()));
        plant
            .publish(
                "trade",
                vec![
                    trade("AAPL", "100", noon(0)),
                    trade("MSFT", "410", noon(0) + 1),
                ],
            )
            .unwrap();
        plant
            .publish(
                "quote",
                vec![Quote::new("AAPL", dec("99.9"), dec("100.1"), 5, 5)
                    .at(noon(0) + 2)
                    .into_record()],
            )
            .unwrap();
        plant
            .publish("trade", vec![trade("AAPL", "99", noon(0) + 3)])
            .unwrap();
        checksum = plant.mirror().state_checksum();
        plant.shutdown().unwrap();
    }

    let plant = open(PlantConfig::new(tmp.path(), session()));
    assert_eq!(plant.mirror().state_checksum(), checksum);
    assert_eq!(plant.mirror().len("trade"), 3);
    assert_eq!(plant.mirror().len("quote"), 1);
    assert_eq!(plant.mirror().last_trade_price("AAPL"), Some(dec("99")));
    assert_eq!(plant.status().total_messages, 4);
}

/// A damaged segment keeps the plant out of service and reports how many
/// entries are intact.
#[test]
fn corrupt_segment_reports_valid_prefix_and_refuses_start() {
    let tmp = TempDir::new().unwrap();
    {
        let mut plant = open(PlantConfig::new(tmp.path(), session()));
        for (i, price) in ["100", "101", "102", "103"].iter().enumerate() {
            plant
                .publish("trade", vec![trade("AAPL", price, noon(0) + i as i64)])
                .unwrap();
        }
        plant.shutdown().unwrap();
    }

    let segment = SegmentWriter::segment_path(tmp.path(), session());
    let data = std::fs::read(&segment).unwrap();
    std::fs::write(&segment, &data[..data.len() - 5]).unwrap();

    let now = Arc::new(AtomicI64::new(noon(0)));
    let result = TickerPlant::open_with_time_source(
        PlantConfig::new(tmp.path(), session()),
        Box::new(SharedClock(now)),
    );
    match result {
        Err(PlantError::LogCorruption { valid_entries, .. }) => {
            assert_eq!(valid_entries, 3);
        }
        Ok(_) => panic!("Plant started on a corrupt segment"),
        Err(other) => panic!("Expected LogCorruption, got {:?}", other),
    }
}

/// Batched mode: one flush round delivers every buffered table; the
/// counters reconcile at the flush boundary.
#[test]
fn batched_round_reconciles_counters() {
    let tmp = TempDir::new().unwrap();
    let mut plant = open(
        PlantConfig::new(tmp.path(), session()).with_delivery(DeliveryPolicy::Batched {
            interval: Duration::from_millis(250),
        }),
    );
    let (_t, mut rx_trade) = plant.subscribe("trade", SymbolFilter::All).unwrap();
    let (_q, mut rx_quote) = plant.subscribe("quote", SymbolFilter::All).unwrap();

    plant
        .publish("trade", vec![trade("AAPL", "100", noon(0))])
        .unwrap();
    plant
        .publish(
            "quote",
            vec![Quote::new("AAPL", dec("99.9"), dec("100.1"), 5, 5)
                .at(noon(0) + 1)
                .into_record()],
        )
        .unwrap();

    assert_eq!(plant.buffered_records(), 2);
    assert_eq!(plant.published_records(), 0);

    plant.flush();

    assert_eq!(plant.buffered_records(), 0);
    assert_eq!(plant.published_records(), 2);
    assert!(rx_trade.try_recv().is_ok());
    assert!(rx_quote.try_recv().is_ok());
}

/// A subscriber that stops draining is dropped without disturbing the
/// WAL or the healthy subscriber.
#[test]
fn slow_subscriber_is_isolated() {
    let tmp = TempDir::new().unwrap();
    let mut plant = open(PlantConfig::new(tmp.path(), session()).with_queue_capacity(2));

    let (_slow, _rx_slow) = plant.subscribe("trade", SymbolFilter::All).unwrap();
    let (_fast, mut rx_fast) = plant.subscribe("trade", SymbolFilter::All).unwrap();
    assert_eq!(plant.subscriber_count(), 2);

    for i in 0..5 {
        plant
            .publish("trade", vec![trade("AAPL", "100", noon(0) + i)])
            .unwrap();
        // fast subscriber keeps draining
        while rx_fast.try_recv().is_ok() {}
    }

    assert_eq!(plant.subscriber_count(), 1);
    assert_eq!(plant.status().total_messages, 5);
}

/// The timer task flushes batched deliveries without explicit flush calls.
#[tokio::test]
async fn timer_drives_batched_flush() {
    let tmp = TempDir::new().unwrap();
    let config = PlantConfig::new(tmp.path(), session()).with_delivery(DeliveryPolicy::Batched {
        interval: Duration::from_millis(20),
    });
    let now = Arc::new(AtomicI64::new(noon(0)));
    let plant = Arc::new(tokio::sync::Mutex::new(
        TickerPlant::open_with_time_source(config, Box::new(SharedClock(now))).unwrap(),
    ));

    let mut rx = {
        let mut guard = plant.lock().await;
        let (_id, rx) = guard.subscribe("trade", SymbolFilter::All).unwrap();
        guard
            .publish("trade", vec![trade("AAPL", "100", noon(0))])
            .unwrap();
        rx
    };

    let timer = tokio::spawn(tickerplant::plant::run_timer(
        plant.clone(),
        Duration::from_millis(20),
    ));

    let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("flush timer never fired")
        .expect("channel closed");
    assert!(matches!(message, TickMessage::Batch { .. }));

    plant.lock().await.shutdown().unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), timer).await;
}
