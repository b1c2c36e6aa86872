//! Registry of connected live-reload clients.
//!
//! Each client owns a [`Subscriber`] backed by a single-slot channel. A
//! broadcast tries every slot without waiting: a slot that is still full (the
//! client has not picked up the previous signal) or closed (the client went
//! away) gets its subscriber evicted in the same pass. There is no separate
//! cleanup task and no explicit unsubscribe.

use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Why a subscriber was dropped from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// A previous signal is still pending.
    Full,
    /// The client side has been dropped.
    Closed,
}

/// Outcome of one delivery attempt to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Evicted(EvictReason),
}

/// Summary of a [`Registry::broadcast`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// The receiving end held by one event-stream connection.
#[derive(Debug)]
pub struct Subscriber {
    rx: mpsc::Receiver<()>,
}

impl Subscriber {
    /// Waits for the next change signal.
    ///
    /// Returns `false` once the registry has evicted this subscriber and no
    /// signal is left pending; nothing will arrive after that.
    pub async fn notified(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Takes a pending signal without waiting.
    pub fn try_notified(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// The set of live subscribers.
#[derive(Debug, Default)]
pub struct Registry {
    subscribers: Mutex<Vec<mpsc::Sender<()>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new subscriber and hands its receiving end to the caller.
    pub fn register(&self) -> Subscriber {
        let (tx, rx) = mpsc::channel(1);
        let mut subscribers = self.lock();
        subscribers.push(tx);
        info!("Client subscribed ({} connected).", subscribers.len());
        Subscriber { rx }
    }

    /// Signals every subscriber once, evicting the ones that cannot take it.
    pub fn broadcast(&self) -> BroadcastReport {
        let mut subscribers = self.lock();
        let mut report = BroadcastReport::default();

        // Walk backwards so removing index `i` never shifts an unvisited entry.
        for i in (0..subscribers.len()).rev() {
            match deliver(&subscribers[i]) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Evicted(reason) => {
                    subscribers.remove(i);
                    report.evicted += 1;
                    debug!("Evicted subscriber: {:?}", reason);
                }
            }
        }

        debug!(
            "Broadcast delivered to {} subscriber(s), evicted {}.",
            report.delivered, report.evicted
        );
        report
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<()>>> {
        // Poisoning is ignored: a push or a remove never leaves the vector half-updated.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver(tx: &mpsc::Sender<()>) -> Delivery {
    match tx.try_send(()) {
        Ok(()) => Delivery::Delivered,
        Err(TrySendError::Full(())) => Delivery::Evicted(EvictReason::Full),
        Err(TrySendError::Closed(())) => Delivery::Evicted(EvictReason::Closed),
    }
}
