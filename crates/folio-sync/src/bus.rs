//! # Subscriber Bus
//!
//! Fan-out of view changes to every interested UI surface.
//!
//! Built on a broadcast channel: each subscriber sees every event published
//! after it subscribed, in publish order. A subscriber that falls more than
//! the channel capacity behind skips ahead and is told how much it missed.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use folio_core::PageResult;

use crate::transport::ConnectionState;

/// Default number of events buffered per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// A change subscribers may react to.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    /// A new page was adopted.
    PageChanged { epoch: u64, page: Arc<PageResult> },

    /// The push channel changed state.
    ConnectionChanged(ConnectionState),

    /// A background refresh failed. The previous page stays visible.
    RefreshFailed { message: String, retryable: bool },
}

/// Broadcast bus for [`CatalogEvent`]s.
#[derive(Debug, Clone)]
pub struct SubscriberBus {
    tx: broadcast::Sender<CatalogEvent>,
}

impl SubscriberBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        SubscriberBus { tx }
    }

    /// Registers a new subscriber. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Returns how many subscribers will see it (0 is fine).
    pub fn publish(&self, event: CatalogEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for catalog event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SubscriberBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
