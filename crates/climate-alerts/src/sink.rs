//! The alert sink.
//!
//! [`AlertSink`] is the only writer of alerts. Writes for the same
//! (rule, sensor) pair are serialised by a per-pair lock so the dedup check,
//! the durable write and the publication happen as one step; unrelated pairs
//! never wait on each other here. The store may still serialise them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertDraft, AlertState, EpisodeKey};
use crate::bus::DisseminationBus;
use crate::error::{AlertError, Result};
use crate::policy::{Admission, admit};
use crate::store::AlertStore;
use crate::types::AlertId;

/// What happened to a draft handed to [`AlertSink::persist`].
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    /// A new alert was written and published.
    Fired(Alert),
    /// An alert for the pair is still open.
    Suppressed {
        /// The open alert that absorbed the violation.
        open_alert: AlertId,
    },
    /// The measurement is older than the pair's last fired alert.
    Stale,
}

impl PersistOutcome {
    /// Returns the fired alert, if any.
    #[must_use]
    pub fn into_fired(self) -> Option<Alert> {
        match self {
            Self::Fired(alert) => Some(alert),
            Self::Suppressed { .. } | Self::Stale => None,
        }
    }
}

/// Lock serialising work on one (rule, sensor) pair.
type PairLock = Arc<Mutex<()>>;

/// Serialised, deduplicating writer in front of an [`AlertStore`].
///
/// Pair locks exist only while some caller is working on the pair; the
/// stale watermark is read back from the store.
pub struct AlertSink {
    store: Arc<dyn AlertStore>,
    bus: DisseminationBus,
    pairs: Mutex<HashMap<EpisodeKey, PairLock>>,
}

impl std::fmt::Debug for AlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSink")
            .field("alerts", &self.store.len())
            .field("pairs", &self.pair_count())
            .field("bus", &self.bus)
            .finish()
    }
}

impl AlertSink {
    /// Creates a sink writing to `store` and publishing on `bus`.
    pub fn new(store: Arc<dyn AlertStore>, bus: DisseminationBus) -> Self {
        Self {
            store,
            bus,
            pairs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Returns the bus alerts are published on.
    #[must_use]
    pub const fn bus(&self) -> &DisseminationBus {
        &self.bus
    }

    /// Number of pairs currently holding a lock entry.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.pairs.lock().len()
    }

    /// Runs `f` holding the pair's lock, then drops the entry if no other
    /// caller is waiting on it.
    fn with_pair<T>(&self, key: &EpisodeKey, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.pairs.lock().entry(key.clone()).or_default());
        let result = {
            let _guard = lock.lock();
            f()
        };

        // clones are only taken under the map lock, so two holders means the
        // map and us
        let mut pairs = self.pairs.lock();
        if Arc::strong_count(&lock) == 2 {
            pairs.remove(key);
        }
        result
    }

    /// Persists a draft unless an alert for its pair is already open.
    ///
    /// On success the alert has been durably written and published before
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::TransientStorage` if the write fails. Nothing is
    /// published in that case and a retry re-runs the dedup check cleanly.
    pub fn persist(&self, draft: AlertDraft) -> Result<PersistOutcome> {
        let Some(key) = draft.episode_key() else {
            return self.write(draft).map(PersistOutcome::Fired);
        };

        self.with_pair(&key, || self.admit_and_write(&key, draft))
    }

    fn admit_and_write(&self, key: &EpisodeKey, draft: AlertDraft) -> Result<PersistOutcome> {
        let open = self.store.find_open(key);
        let last_fired = self.store.last_fired(key);

        match admit(&draft, open.as_ref(), last_fired) {
            Admission::Duplicate(open_alert) => {
                debug!(
                    pair = %key,
                    open_alert = %open_alert,
                    "suppressed violation while alert is open"
                );
                Ok(PersistOutcome::Suppressed { open_alert })
            }
            Admission::Stale => {
                warn!(
                    pair = %key,
                    measured_at = %draft.measured_at,
                    "dropped violation older than last fired alert"
                );
                Ok(PersistOutcome::Stale)
            }
            Admission::Fire => self.write(draft).map(PersistOutcome::Fired),
        }
    }

    fn write(&self, draft: AlertDraft) -> Result<Alert> {
        let alert = Alert::from_draft(draft, Utc::now());
        if let Err(e) = self.store.insert(alert.clone()) {
            warn!(sensor_id = %alert.sensor_id, error = %e, "failed to persist alert");
            return Err(e);
        }

        info!(
            alert_id = %alert.id,
            sensor_id = %alert.sensor_id,
            rule_name = alert.rule_name.as_deref().unwrap_or_default(),
            priority = alert.priority.get(),
            bound = ?alert.violated_bound,
            "alert fired"
        );
        self.bus.publish(&alert);
        Ok(alert)
    }

    /// Moves an alert through its lifecycle.
    ///
    /// Re-applying the current state is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound`, `AlertError::InvalidTransition`,
    /// or a storage error if the change cannot be written.
    pub fn transition(&self, id: AlertId, state: AlertState) -> Result<Alert> {
        let found = self
            .store
            .get(id)
            .ok_or_else(|| AlertError::AlertNotFound { id: id.to_string() })?;

        match found.episode_key() {
            Some(key) => self.with_pair(&key, || self.apply_transition(id, state)),
            None => self.apply_transition(id, state),
        }
    }

    fn apply_transition(&self, id: AlertId, state: AlertState) -> Result<Alert> {
        // re-read under the pair lock
        let mut alert = self
            .store
            .get(id)
            .ok_or_else(|| AlertError::AlertNotFound { id: id.to_string() })?;
        let from = alert.state;

        if !alert.transition(state, Utc::now()) {
            return Err(AlertError::InvalidTransition {
                id: id.to_string(),
                from: from.to_string(),
                to: state.to_string(),
            });
        }
        if from == state {
            return Ok(alert);
        }

        self.store.update(alert.clone())?;
        info!(alert_id = %id, from = %from, to = %state, "alert state changed");
        Ok(alert)
    }
}
