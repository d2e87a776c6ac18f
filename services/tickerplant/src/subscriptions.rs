//! Subscription registry: who wants which table, filtered by symbol
//!
//! Subscriptions are ephemeral runtime state: a closed receiver is pruned
//! on the next delivery and nothing is persisted. A reconnecting
//! subscriber re-subscribes and either replays from the log or takes a
//! fresh snapshot from the real-time mirror.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};
use types::record::Record;
use types::session::SessionDate;

/// Unique subscriber identifier.
pub type SubscriptionId = u64;

/// Messages delivered to subscriber handles.
#[derive(Debug, Clone, PartialEq)]
pub enum TickMessage {
    /// A record batch for one table, in append order.
    Batch {
        table: String,
        records: Vec<Record>,
    },
    /// Day boundary: the named segment is sealed and ready for the
    /// historical sink; in-memory session state is about to reset.
    EndOfDay {
        date: SessionDate,
        segment: PathBuf,
    },
}

/// Symbol filter attached to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolFilter {
    /// Every record in the table.
    All,
    /// Only records whose symbol is in the set.
    Symbols(HashSet<String>),
}

impl SymbolFilter {
    /// Build an explicit symbol-set filter.
    pub fn symbols<I, S>(iter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Symbols(iter.into_iter().map(Into::into).collect())
    }

    /// Hash-set membership: O(1) amortized per record.
    pub fn matches(&self, sym: &str) -> bool {
        match self {
            SymbolFilter::All => true,
            SymbolFilter::Symbols(set) => set.contains(sym),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, SymbolFilter::All)
    }
}

/// Why a delivery to one subscriber did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Bounded queue is full: the subscriber cannot keep up.
    QueueFull,
    /// Receiver dropped: the subscriber went away.
    Disconnected,
}

/// One live subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub table: String,
    pub filter: SymbolFilter,
    sender: mpsc::Sender<TickMessage>,
}

/// Registry of live subscriptions, keyed by id.
///
/// Uses `BTreeMap` for deterministic iteration order. Mutation is
/// arbitrated by the engine's single ingestion path, so delivery never
/// races a subscribe/unsubscribe.
pub struct SubscriptionRegistry {
    subs: BTreeMap<SubscriptionId, Subscription>,
    next_id: SubscriptionId,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subs: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register a subscription and hand back the receiving end of its
    /// bounded queue.
    pub fn subscribe(
        &mut self,
        table: &str,
        filter: SymbolFilter,
        queue_capacity: usize,
    ) -> (SubscriptionId, mpsc::Receiver<TickMessage>) {
        let id = self.next_id;
        self.next_id += 1;

        let (sender, receiver) = mpsc::channel(queue_capacity);
        self.subs.insert(
            id,
            Subscription {
                id,
                table: table.to_string(),
                filter,
                sender,
            },
        );
        info!(subscription = id, table, "Subscription registered");
        (id, receiver)
    }

    /// Remove a subscription (explicit unsubscribe or engine-side drop).
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let removed = self.subs.remove(&id);
        if removed.is_some() {
            debug!(subscription = id, "Subscription removed");
        }
        removed
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subs.get(&id)
    }

    /// Ids of all subscriptions on a table, in registration order.
    pub fn subscribers_of(&self, table: &str) -> Vec<SubscriptionId> {
        self.subs
            .iter()
            .filter(|(_, sub)| sub.table == table)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids of every live subscription.
    pub fn all_ids(&self) -> Vec<SubscriptionId> {
        self.subs.keys().copied().collect()
    }

    /// Non-blocking send to one subscriber.
    pub fn try_send(
        &self,
        id: SubscriptionId,
        message: TickMessage,
    ) -> Result<(), DeliveryFailure> {
        let Some(sub) = self.subs.get(&id) else {
            return Err(DeliveryFailure::Disconnected);
        };
        sub.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Disconnected,
        })
    }

    pub fn count(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
