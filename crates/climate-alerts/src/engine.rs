//! The alert engine.
//!
//! [`AlertEngine`] wires the rule store, evaluator, dedup policy, sink and
//! dissemination bus together and is the entry point for ingestion
//! ([`AlertEngine::evaluate_measurement`]), rule administration, the alert
//! read path and live subscriptions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alert::{Alert, AlertFilter, AlertState, AlertSummary};
use crate::bus::{AlertSubscription, DisseminationBus};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::evaluator::evaluate;
use crate::file_store::FileAlertStore;
use crate::policy::draft_alert;
use crate::rule::{Rule, RuleDraft, RulePatch, RuleStatus};
use crate::rules::{RuleFilter, RuleStore, RuleSummary};
use crate::sink::{AlertSink, PersistOutcome};
use crate::store::{AlertStore, MemoryAlertStore};
use crate::types::{AlertId, Location, Measurement, Page, RuleId};

/// Outcome of evaluating one measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Alerts persisted and published by this evaluation, highest priority first.
    pub fired: Vec<Alert>,
    /// Violations absorbed by an alert already open for the same rule and sensor.
    pub suppressed: usize,
    /// Violations dropped because a newer measurement already fired for the pair.
    pub stale: usize,
    /// Rules that applied to the measurement.
    pub rules_matched: usize,
}

impl EvaluationResult {
    /// The single most important fired alert: highest priority, then earliest fired.
    #[must_use]
    pub fn primary(&self) -> Option<&Alert> {
        self.fired.iter().reduce(|best, a| {
            if a.priority > best.priority || (a.priority == best.priority && a.fired_at < best.fired_at) {
                a
            } else {
                best
            }
        })
    }

    /// Returns true if nothing fired.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.fired.is_empty()
    }
}

/// The rule-scoped alert evaluation and dissemination engine.
#[derive(Debug)]
pub struct AlertEngine {
    config: EngineConfig,
    rules: RuleStore,
    sink: AlertSink,
}

impl AlertEngine {
    /// Builds an engine from configuration, opening durable stores when configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a configured
    /// store cannot be opened.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn AlertStore> = match &config.alert_log_path {
            Some(path) => Arc::new(FileAlertStore::open(path)?),
            None => Arc::new(MemoryAlertStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Builds an engine on a caller-supplied alert store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the rule snapshot
    /// cannot be loaded.
    pub fn with_store(config: EngineConfig, store: Arc<dyn AlertStore>) -> Result<Self> {
        config.validate()?;
        let rules = match &config.rule_snapshot_path {
            Some(path) => RuleStore::open(path)?,
            None => RuleStore::new(),
        };
        let bus = DisseminationBus::new(config.subscriber_buffer, config.max_subscribers);

        Ok(Self {
            config,
            rules,
            sink: AlertSink::new(store, bus),
        })
    }

    /// An engine with default settings and in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        let config = EngineConfig::default();
        let bus = DisseminationBus::new(config.subscriber_buffer, config.max_subscribers);
        Self {
            config,
            rules: RuleStore::new(),
            sink: AlertSink::new(Arc::new(MemoryAlertStore::new()), bus),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the rule store.
    #[must_use]
    pub const fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Returns the alert sink.
    #[must_use]
    pub const fn sink(&self) -> &AlertSink {
        &self.sink
    }

    // ---- ingestion ------------------------------------------------------

    /// Evaluates one measurement against every applicable rule.
    ///
    /// Each rule yields at most one alert, carrying its most severe violated
    /// bound. Alerts are persisted and published before this returns.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::TransientStorage` if an alert cannot be written.
    /// The whole call may be retried: alerts already persisted by the failed
    /// attempt are deduplicated rather than fired twice.
    pub fn evaluate_measurement(&self, measurement: &Measurement) -> Result<EvaluationResult> {
        let location = measurement.location();
        let applicable = self.rules.get_applicable(&location, measurement.timestamp);

        let mut result = EvaluationResult {
            rules_matched: applicable.len(),
            ..EvaluationResult::default()
        };

        for rule in &applicable {
            let violations = evaluate(measurement, rule);
            let Some(draft) = draft_alert(rule, measurement, &violations) else {
                continue;
            };
            match self.sink.persist(draft)? {
                PersistOutcome::Fired(alert) => result.fired.push(alert),
                PersistOutcome::Suppressed { .. } => result.suppressed += 1,
                PersistOutcome::Stale => result.stale += 1,
            }
        }

        debug!(
            sensor_id = %measurement.sensor_id,
            location = %location,
            rules = result.rules_matched,
            fired = result.fired.len(),
            suppressed = result.suppressed,
            "evaluated measurement"
        );
        Ok(result)
    }

    // ---- rules ----------------------------------------------------------

    /// Creates a rule.
    ///
    /// # Errors
    ///
    /// See [`RuleStore::create`].
    pub fn create_rule(&self, draft: RuleDraft, created_by: &str) -> Result<Rule> {
        self.rules.create(draft, created_by)
    }

    /// Partially updates a rule.
    ///
    /// # Errors
    ///
    /// See [`RuleStore::update`].
    pub fn update_rule(&self, id: RuleId, patch: &RulePatch) -> Result<Rule> {
        self.rules.update(id, patch)
    }

    /// Activates or deactivates a rule.
    ///
    /// # Errors
    ///
    /// See [`RuleStore::set_status`].
    pub fn set_rule_status(&self, id: RuleId, status: RuleStatus) -> Result<Rule> {
        self.rules.set_status(id, status)
    }

    /// Deletes a rule.
    ///
    /// # Errors
    ///
    /// See [`RuleStore::delete`].
    pub fn delete_rule(&self, id: RuleId) -> Result<()> {
        self.rules.delete(id)
    }

    /// Gets a rule by ID.
    #[must_use]
    pub fn get_rule(&self, id: RuleId) -> Option<Rule> {
        self.rules.get(id)
    }

    /// Lists rules, applying the configured page limits.
    #[must_use]
    pub fn list_rules(&self, filter: &RuleFilter, page: Page) -> Vec<Rule> {
        self.rules.list(filter, self.resolve(page))
    }

    /// Rules that would be evaluated for a measurement at `location` and `at`.
    #[must_use]
    pub fn applicable_rules(&self, location: &Location, at: DateTime<Utc>) -> Vec<Arc<Rule>> {
        self.rules.get_applicable(location, at)
    }

    /// Counts rules by status.
    #[must_use]
    pub fn rule_summary(&self) -> RuleSummary {
        self.rules.summary()
    }

    // ---- alerts ---------------------------------------------------------

    /// Gets an alert by ID.
    #[must_use]
    pub fn get_alert(&self, id: AlertId) -> Option<Alert> {
        self.sink.store().get(id)
    }

    /// Lists alerts newest first, applying the configured page limits.
    #[must_use]
    pub fn list_alerts(&self, filter: &AlertFilter, page: Page) -> Vec<Alert> {
        self.sink.store().query(filter, self.resolve(page))
    }

    /// Counts all alerts by state.
    #[must_use]
    pub fn alert_summary(&self) -> AlertSummary {
        self.sink.store().summary(&AlertFilter::default())
    }

    /// Marks an alert as seen by an operator. It keeps suppressing repeats.
    ///
    /// # Errors
    ///
    /// See [`AlertSink::transition`].
    pub fn acknowledge_alert(&self, id: AlertId) -> Result<Alert> {
        self.sink.transition(id, AlertState::Acknowledged)
    }

    /// Resolves an alert, ending its episode.
    ///
    /// # Errors
    ///
    /// See [`AlertSink::transition`].
    pub fn resolve_alert(&self, id: AlertId) -> Result<Alert> {
        self.sink.transition(id, AlertState::Resolved)
    }

    /// Moves an alert to any state its lifecycle allows.
    ///
    /// # Errors
    ///
    /// See [`AlertSink::transition`].
    pub fn set_alert_state(&self, id: AlertId, state: AlertState) -> Result<Alert> {
        self.sink.transition(id, state)
    }

    // ---- dissemination --------------------------------------------------

    /// Opens a live feed of alerts fired from now on.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SubscriberLimit` if too many feeds are open.
    pub fn subscribe(&self, filter: Option<AlertFilter>) -> Result<AlertSubscription> {
        self.sink.bus().subscribe(filter)
    }

    /// Returns the dissemination bus.
    #[must_use]
    pub const fn bus(&self) -> &DisseminationBus {
        self.sink.bus()
    }

    fn resolve(&self, page: Page) -> Page {
        page.resolved(self.config.default_page_limit, self.config.max_page_limit)
    }
}
