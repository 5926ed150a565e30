//! Alert storage backends.
//!
//! [`AlertStore`] abstracts over where persisted alerts live. The alert sink
//! only needs the operations below; it serialises writes per
//! (rule, sensor) pair itself, so implementations only have to be
//! internally consistent.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::alert::{Alert, AlertFilter, AlertSummary, EpisodeKey};
use crate::error::{AlertError, Result};
use crate::types::{AlertId, Page};

/// Trait for alert storage backends.
pub trait AlertStore: Send + Sync {
    /// Persists a newly fired alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert cannot be durably written.
    fn insert(&self, alert: Alert) -> Result<()>;

    /// Replaces a stored alert, typically after a state transition.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if no alert has this ID, or a
    /// storage error if the change cannot be written.
    fn update(&self, alert: Alert) -> Result<()>;

    /// Gets an alert by ID.
    fn get(&self, id: AlertId) -> Option<Alert>;

    /// Returns the open (active or acknowledged) alert for a pair, if any.
    fn find_open(&self, key: &EpisodeKey) -> Option<Alert>;

    /// Returns the latest measurement time among the pair's alerts, open or
    /// resolved.
    fn last_fired(&self, key: &EpisodeKey) -> Option<DateTime<Utc>>;

    /// Queries alerts matching the filter, newest first.
    fn query(&self, filter: &AlertFilter, page: Page) -> Vec<Alert>;

    /// Counts alerts matching the filter by state.
    fn summary(&self, filter: &AlertFilter) -> AlertSummary;

    /// Returns the number of stored alerts.
    fn len(&self) -> usize;

    /// Returns true if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    alerts: HashMap<AlertId, Alert>,
    open: HashMap<EpisodeKey, AlertId>,
    latest: HashMap<EpisodeKey, DateTime<Utc>>,
}

impl MemoryInner {
    fn put(&mut self, alert: Alert) {
        if let Some(key) = alert.episode_key() {
            let latest = self.latest.entry(key.clone()).or_insert(alert.measured_at);
            *latest = (*latest).max(alert.measured_at);
            if alert.is_open() {
                self.open.insert(key, alert.id);
            } else if self.open.get(&key) == Some(&alert.id) {
                self.open.remove(&key);
            }
        }
        self.alerts.insert(alert.id, alert);
    }
}

/// In-memory alert store.
///
/// Keeps an index of open alerts by (rule, sensor) so the dedup check does
/// not scan history.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryAlertStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an alert without existence checks.
    pub(crate) fn restore(&self, alert: Alert) {
        self.inner.write().put(alert);
    }

    /// Number of open alerts.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.read().open.len()
    }
}

/// Newest first; ties broken by ID for a stable order.
fn newest_first(a: &Alert, b: &Alert) -> std::cmp::Ordering {
    b.fired_at.cmp(&a.fired_at).then_with(|| a.id.cmp(&b.id))
}

impl AlertStore for MemoryAlertStore {
    fn insert(&self, alert: Alert) -> Result<()> {
        self.inner.write().put(alert);
        Ok(())
    }

    fn update(&self, alert: Alert) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.alerts.contains_key(&alert.id) {
            return Err(AlertError::AlertNotFound {
                id: alert.id.to_string(),
            });
        }
        inner.put(alert);
        Ok(())
    }

    fn get(&self, id: AlertId) -> Option<Alert> {
        self.inner.read().alerts.get(&id).cloned()
    }

    fn find_open(&self, key: &EpisodeKey) -> Option<Alert> {
        let inner = self.inner.read();
        inner
            .open
            .get(key)
            .and_then(|id| inner.alerts.get(id))
            .cloned()
    }

    fn last_fired(&self, key: &EpisodeKey) -> Option<DateTime<Utc>> {
        self.inner.read().latest.get(key).copied()
    }

    fn query(&self, filter: &AlertFilter, page: Page) -> Vec<Alert> {
        let mut matching: Vec<Alert> = self
            .inner
            .read()
            .alerts
            .values()
            .filter(|a| a.matches(filter))
            .cloned()
            .collect();
        matching.sort_by(newest_first);
        page.apply(matching)
    }

    fn summary(&self, filter: &AlertFilter) -> AlertSummary {
        let inner = self.inner.read();
        let mut summary = AlertSummary::default();
        inner
            .alerts
            .values()
            .filter(|a| a.matches(filter))
            .for_each(|a| summary.add(a.state));
        summary
    }

    fn len(&self) -> usize {
        self.inner.read().alerts.len()
    }
}
