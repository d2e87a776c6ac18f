//! Ticker plant engine: ingestion, durability ordering, day rollover
//!
//! The engine is the single ingestion and fan-out path. Every publish is
//! serialized through it, so WAL append order is the global event order
//! per table and no append can race a rotation.
//!
//! State machine:
//! ```text
//! Initializing -> Ready -> (publish)* -> RollingOver -> Ready -> ...
//!                                                    -> ShuttingDown
//! ```
//!
//! Publish path: validate -> stamp times -> WAL append (durability
//! point) -> mirror -> delivery policy. A batch is never visible to any
//! subscriber before it is on stable storage.

use crate::config::{ConfigError, PlantConfig};
use crate::delivery::DeliveryEngine;
use crate::mirror::RealTimeMirror;
use crate::replay::SegmentReader;
use crate::subscriptions::{
    SubscriptionId, SubscriptionRegistry, SymbolFilter, TickMessage,
};
use crate::wal::{SegmentWriter, WalConfig, WalError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use types::record::{Record, Value};
use types::schema::{SchemaError, SchemaRegistry};
use types::session::SessionDate;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PlantError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("schema validation failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("clock anomaly: session date {session_date}, incoming event date {event_date}")]
    ClockAnomaly {
        session_date: SessionDate,
        event_date: SessionDate,
    },

    #[error("log corruption: {detail} ({valid_entries} valid entries, first bad byte at offset {offset})")]
    LogCorruption {
        valid_entries: u64,
        offset: u64,
        detail: String,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] WalError),

    #[error("engine not ready: state is {state:?}")]
    NotReady { state: PlantState },
}

/// Map startup replay failures: corruption becomes the dedicated fatal
/// variant so the harness can show the operator the valid-entry count.
fn map_init_error(e: WalError) -> PlantError {
    match e {
        WalError::Corruption {
            valid_entries,
            offset,
            detail,
        } => PlantError::LogCorruption {
            valid_entries,
            offset,
            detail,
        },
        other => PlantError::Storage(other),
    }
}

// ── Time Source ─────────────────────────────────────────────────────

/// Wall-clock access for timestamp stamping and date checks, injected so
/// rollover behavior is testable without a real clock.
pub trait TimeSource: Send {
    /// Current time in Unix nanoseconds.
    fn now_nanos(&self) -> i64;
}

/// System clock (UTC).
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_nanos(&self) -> i64 {
        // Saturates past 2262, far beyond any session this serves.
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

// ── State Machine ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlantState {
    Initializing,
    Ready,
    RollingOver,
    ShuttingDown,
}

/// Snapshot of the engine for the administrative interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantStatus {
    pub session_date: SessionDate,
    /// Records logged to the open segment so far today.
    pub total_messages: u64,
    pub open_segment_id: String,
}

// ── Ticker Plant ────────────────────────────────────────────────────

/// The ingestion and fan-out engine.
pub struct TickerPlant {
    config: PlantConfig,
    schemas: SchemaRegistry,
    clock: Box<dyn TimeSource>,
    state: PlantState,
    session_date: SessionDate,
    wal: SegmentWriter,
    registry: SubscriptionRegistry,
    delivery: DeliveryEngine,
    mirror: RealTimeMirror,
    batches_accepted: u64,
    batches_rejected: u64,
}

impl TickerPlant {
    /// Open the plant with the system clock.
    pub fn open(config: PlantConfig) -> Result<Self, PlantError> {
        Self::open_with_time_source(config, Box::new(SystemTimeSource))
    }

    /// Open the plant: validate config, replay the current day's segment
    /// to rebuild the mirror, then start accepting traffic.
    ///
    /// A corrupt segment keeps the engine out of service; the error
    /// carries the valid-entry count for operator recovery.
    pub fn open_with_time_source(
        config: PlantConfig,
        clock: Box<dyn TimeSource>,
    ) -> Result<Self, PlantError> {
        config.validate()?;
        let schemas = SchemaRegistry::builtin();

        info!(
            log_dir = %config.log_dir.display(),
            session_date = %config.session_date,
            "Ticker plant initializing"
        );

        let mut reader =
            SegmentReader::open(&config.log_dir, config.session_date).map_err(map_init_error)?;
        let batches = reader.replay().map_err(map_init_error)?;
        let replayed_entries = reader.entries_read();
        let replayed_records: u64 = batches.iter().map(|(_, b)| b.len() as u64).sum();

        let mirror = RealTimeMirror::rebuild(&schemas, &batches);

        let mut wal = SegmentWriter::open(WalConfig::new(&config.log_dir), config.session_date)?;
        wal.resume(replayed_entries, replayed_records);

        let delivery = DeliveryEngine::new(config.delivery);
        let session_date = config.session_date;

        info!(
            replayed_entries,
            replayed_records,
            segment = %wal.open_segment_id(),
            "Ticker plant ready"
        );

        Ok(Self {
            config,
            schemas,
            clock,
            state: PlantState::Ready,
            session_date,
            wal,
            registry: SubscriptionRegistry::new(),
            delivery,
            mirror,
            batches_accepted: 0,
            batches_rejected: 0,
        })
    }

    /// Accept one batch for a table.
    ///
    /// Returns the WAL sequence assigned to the batch. Rejections leave
    /// no trace: nothing is logged and nothing is delivered.
    pub fn publish(&mut self, table: &str, mut batch: Vec<Record>) -> Result<u64, PlantError> {
        if self.state != PlantState::Ready {
            return Err(PlantError::NotReady { state: self.state });
        }

        let schema = match self.schemas.require(table) {
            Ok(s) => s.clone(),
            Err(e) => {
                self.batches_rejected += 1;
                return Err(PlantError::Schema(e));
            }
        };

        if let Err(e) = schema.validate_batch(&batch) {
            self.batches_rejected += 1;
            return Err(PlantError::Schema(e));
        }

        // Nothing to make durable or deliver.
        if batch.is_empty() {
            return Ok(self.wal.entries_logged());
        }

        // Stamp missing event times with engine time.
        let now = self.clock.now_nanos();
        if let Some(i) = schema.time_col {
            for record in &mut batch {
                if record.values[i].is_null() {
                    record.values[i] = Value::Timestamp(now);
                }
            }
        }

        // A batch dated past the session clock forces the day boundary
        // before it is appended; two or more days ahead is an anomaly.
        let event_date = batch
            .iter()
            .filter_map(|r| schema.time_of(r))
            .max()
            .map(SessionDate::from_nanos)
            .unwrap_or(self.session_date);

        if event_date > self.session_date {
            if self.session_date.days_until(event_date) > 1 {
                self.batches_rejected += 1;
                error!(
                    session_date = %self.session_date,
                    event_date = %event_date,
                    "Clock anomaly, refusing to roll over"
                );
                return Err(PlantError::ClockAnomaly {
                    session_date: self.session_date,
                    event_date,
                });
            }
            self.roll_over(event_date)?;
        }

        // Durability point: the append is flushed before anything fans out.
        let sequence = self.wal.append(table, &batch, now)?;

        self.mirror.apply(&schema, &batch);

        let dropped = self
            .delivery
            .offer(&self.schemas, &self.registry, table, batch);
        self.drop_subscribers(dropped);

        self.batches_accepted += 1;
        debug!(table, sequence, "Batch accepted");
        Ok(sequence)
    }

    /// Register a subscriber for a table. The receiver's queue is bounded;
    /// falling behind gets the subscription dropped, not the plant stalled.
    pub fn subscribe(
        &mut self,
        table: &str,
        filter: SymbolFilter,
    ) -> Result<(SubscriptionId, mpsc::Receiver<TickMessage>), PlantError> {
        self.schemas.require(table)?;
        Ok(self
            .registry
            .subscribe(table, filter, self.config.subscriber_queue_capacity))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.registry.unsubscribe(id);
    }

    /// Flush the delivery buffer (batched mode); no-op under zero-latency.
    pub fn flush(&mut self) {
        let dropped = self.delivery.flush(&self.schemas, &self.registry);
        self.drop_subscribers(dropped);
    }

    /// Timer tick: flush buffered deliveries and check the wall clock for
    /// a date advance. A clock more than one day ahead of the session is
    /// surfaced, never guessed around.
    pub fn tick(&mut self) -> Result<(), PlantError> {
        if self.state != PlantState::Ready {
            return Ok(());
        }

        self.flush();

        let today = SessionDate::from_nanos(self.clock.now_nanos());
        if today > self.session_date {
            if self.session_date.days_until(today) > 1 {
                error!(
                    session_date = %self.session_date,
                    wall_clock_date = %today,
                    "Clock anomaly on timer tick"
                );
                return Err(PlantError::ClockAnomaly {
                    session_date: self.session_date,
                    event_date: today,
                });
            }
            self.roll_over(today)?;
        }
        Ok(())
    }

    /// Administrative rollover (testing, early close).
    pub fn trigger_end_of_day(&mut self) -> Result<SessionDate, PlantError> {
        if self.state != PlantState::Ready {
            return Err(PlantError::NotReady { state: self.state });
        }
        let next = self.session_date.next();
        self.roll_over(next)?;
        Ok(next)
    }

    /// Drain buffers, seal the segment, and stop accepting publishes.
    pub fn shutdown(&mut self) -> Result<(), PlantError> {
        if self.state == PlantState::ShuttingDown {
            return Ok(());
        }
        self.flush();
        self.wal.sync()?;
        self.state = PlantState::ShuttingDown;
        info!(session_date = %self.session_date, "Ticker plant shut down cleanly");
        Ok(())
    }

    pub fn status(&self) -> PlantStatus {
        PlantStatus {
            session_date: self.session_date,
            total_messages: self.wal.records_logged(),
            open_segment_id: self.wal.open_segment_id(),
        }
    }

    pub fn state(&self) -> PlantState {
        self.state
    }

    pub fn session_date(&self) -> SessionDate {
        self.session_date
    }

    /// Read access to the in-memory session mirror.
    pub fn mirror(&self) -> &RealTimeMirror {
        &self.mirror
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.count()
    }

    pub fn batches_accepted(&self) -> u64 {
        self.batches_accepted
    }

    pub fn batches_rejected(&self) -> u64 {
        self.batches_rejected
    }

    /// Records buffered since the last flush boundary (batched mode).
    pub fn buffered_records(&self) -> u64 {
        self.delivery.buffered_records()
    }

    /// Records published to subscribers so far.
    pub fn published_records(&self) -> u64 {
        self.delivery.published_records()
    }

    // ── Internal ────────────────────────────────────────────────────

    /// The day boundary. Ordering matters: the final buffered batch of
    /// the old day goes out, the segment is sealed, the end-of-day marker
    /// follows the last batch, then session state resets.
    ///
    /// A rotation failure leaves the engine in `RollingOver`, refusing
    /// further publishes until the operator intervenes.
    fn roll_over(&mut self, new_date: SessionDate) -> Result<(), PlantError> {
        let old_date = self.session_date;
        self.state = PlantState::RollingOver;
        info!(from = %old_date, to = %new_date, "Day rollover started");

        let dropped = self.delivery.flush(&self.schemas, &self.registry);
        self.drop_subscribers(dropped);

        let sealed = self.wal.rotate(new_date)?;

        let dropped = self.delivery.broadcast(
            &self.registry,
            TickMessage::EndOfDay {
                date: old_date,
                segment: sealed.clone(),
            },
        );
        self.drop_subscribers(dropped);

        self.mirror.truncate();
        self.session_date = new_date;
        self.state = PlantState::Ready;

        info!(
            session_date = %new_date,
            sealed_segment = %sealed.display(),
            "Day rollover complete"
        );
        Ok(())
    }

    fn drop_subscribers(&mut self, dropped: Vec<SubscriptionId>) {
        for id in dropped {
            if self.registry.unsubscribe(id).is_some() {
                warn!(subscription = id, "Dropped subscriber (slow or disconnected)");
            }
        }
    }
}

// ── Timer Driver ────────────────────────────────────────────────────

/// Drive `tick()` on a fixed period: the batched-mode flush tick and the
/// wall-clock date check. Runs until shutdown or a fatal tick error.
pub async fn run_timer(plant: Arc<Mutex<TickerPlant>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let mut guard = plant.lock().await;
        if guard.state() == PlantState::ShuttingDown {
            break;
        }
        if let Err(e) = guard.tick() {
            error!(error = %e, "Timer tick failed, stopping timer");
            break;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
