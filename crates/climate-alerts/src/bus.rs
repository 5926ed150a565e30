//! Live dissemination of persisted alerts.
//!
//! This module provides:
//! - [`DisseminationBus`] - fan-out of every persisted alert to connected subscribers
//! - [`AlertSubscription`] - a subscriber's live feed, usable as a [`Stream`]
//!
//! Every subscriber owns a bounded buffer. Publishing never waits on a
//! subscriber: one whose buffer is full is disconnected and its feed ends
//! after the alerts already buffered.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::alert::{Alert, AlertFilter};
use crate::error::{AlertError, Result};

/// Default per-subscriber buffer size.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;
/// Default maximum number of concurrent subscribers.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 1024;

struct Subscriber {
    id: u64,
    filter: AlertFilter,
    sender: mpsc::Sender<Alert>,
}

struct BusInner {
    /// Held for the whole of a publish so every subscriber sees one order.
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    published: AtomicU64,
    disconnected: AtomicU64,
    buffer: usize,
    max_subscribers: usize,
}

impl BusInner {
    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

/// Fan-out bus for newly persisted alerts. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct DisseminationBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for DisseminationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisseminationBus")
            .field("subscribers", &self.subscriber_count())
            .field("buffer", &self.inner.buffer)
            .field("max_subscribers", &self.inner.max_subscribers)
            .finish_non_exhaustive()
    }
}

impl Default for DisseminationBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER, DEFAULT_MAX_SUBSCRIBERS)
    }
}

impl DisseminationBus {
    /// Creates a bus. A zero buffer is raised to one.
    #[must_use]
    pub fn new(buffer: usize, max_subscribers: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                disconnected: AtomicU64::new(0),
                buffer: buffer.max(1),
                max_subscribers,
            }),
        }
    }

    /// Delivers an alert to every matching subscriber without blocking.
    ///
    /// Returns the number of subscribers the alert was queued for.
    pub fn publish(&self, alert: &Alert) -> usize {
        let mut delivered = 0;
        let mut subscribers = self.inner.subscribers.lock();

        subscribers.retain(|sub| {
            if !alert.matches(&sub.filter) {
                return true;
            }
            match sub.sender.try_send(alert.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber_id = sub.id,
                        alert_id = %alert.id,
                        buffer = self.inner.buffer,
                        "disconnecting slow alert subscriber"
                    );
                    self.inner.disconnected.fetch_add(1, Ordering::Relaxed);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber_id = sub.id, "alert subscriber went away");
                    false
                }
            }
        });
        drop(subscribers);

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        debug!(alert_id = %alert.id, delivered, "published alert");
        delivered
    }

    /// Opens a live feed of alerts published from now on.
    ///
    /// With a filter, only matching alerts are queued for this subscriber.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SubscriberLimit` if the bus is full.
    pub fn subscribe(&self, filter: Option<AlertFilter>) -> Result<AlertSubscription> {
        let mut subscribers = self.inner.subscribers.lock();
        if subscribers.len() >= self.inner.max_subscribers {
            return Err(AlertError::SubscriberLimit {
                limit: self.inner.max_subscribers,
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.buffer);
        subscribers.push(Subscriber {
            id,
            filter: filter.unwrap_or_default(),
            sender,
        });
        drop(subscribers);

        debug!(subscriber_id = id, "alert subscriber connected");
        Ok(AlertSubscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Total alerts published.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Total subscribers disconnected for falling behind.
    #[must_use]
    pub fn disconnected_count(&self) -> u64 {
        self.inner.disconnected.load(Ordering::Relaxed)
    }
}

/// A subscriber's live alert feed.
///
/// Ends when the bus disconnects the subscriber or is dropped. Dropping the
/// subscription releases its buffer and detaches it from the bus.
pub struct AlertSubscription {
    id: u64,
    receiver: mpsc::Receiver<Alert>,
    bus: Weak<BusInner>,
}

impl std::fmt::Debug for AlertSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl AlertSubscription {
    /// Returns the subscriber ID.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next alert. `None` means the feed has ended.
    pub async fn recv(&mut self) -> Option<Alert> {
        self.receiver.recv().await
    }

    /// Returns the next buffered alert without waiting.
    pub fn try_recv(&mut self) -> Option<Alert> {
        self.receiver.try_recv().ok()
    }

    /// Returns true once the bus has stopped feeding this subscription,
    /// either because it fell behind or because the bus was dropped.
    /// Alerts buffered before that can still be received.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

impl Stream for AlertSubscription {
    type Item = Alert;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for AlertSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
            debug!(subscriber_id = self.id, "alert subscriber disconnected");
        }
    }
}
