//! Alert records produced by the engine.
//!
//! - [`AlertKind`] / [`AlertState`]: classification and lifecycle
//! - [`AlertDraft`]: what the policy hands to the sink
//! - [`Alert`]: the persisted, canonical record
//! - [`EpisodeKey`]: the (rule, sensor) pair deduplication is keyed on
//! - [`AlertFilter`]: shared by the read path and live subscriptions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluator::BoundKind;
use crate::types::{AlertId, Location, Priority, RuleId, same_place};

/// Where an alert came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A sensor reported a hardware fault.
    SensorFault,
    /// A climate event reported from outside the rule engine.
    Climatic,
    /// A rule threshold was crossed.
    Threshold,
}

impl AlertKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SensorFault => "sensor_fault",
            Self::Climatic => "climatic",
            Self::Threshold => "threshold",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of an alert. Transitions are driven by operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// Newly fired.
    #[default]
    Active,
    /// Seen by an operator, still open.
    Acknowledged,
    /// Closed; the pair may fire again.
    Resolved,
}

impl AlertState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    /// Returns true while the alert blocks new alerts for its pair.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Acknowledged)
    }

    /// Returns true if an operator may move an alert from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, _)
                | (Self::Acknowledged, Self::Acknowledged | Self::Resolved)
                | (Self::Resolved, Self::Resolved)
        )
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The deduplication key: one open alert per rule and sensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpisodeKey {
    /// Originating rule.
    pub rule_id: RuleId,
    /// Reporting sensor.
    pub sensor_id: String,
}

impl EpisodeKey {
    /// Creates a key.
    pub fn new(rule_id: RuleId, sensor_id: impl Into<String>) -> Self {
        Self {
            rule_id,
            sensor_id: sensor_id.into(),
        }
    }
}

impl fmt::Display for EpisodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rule_id, self.sensor_id)
    }
}

/// An alert that has been decided on but not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    /// Alert classification.
    pub kind: AlertKind,
    /// Reporting sensor.
    pub sensor_id: String,
    /// Timestamp of the measurement that caused the alert.
    pub measured_at: DateTime<Utc>,
    /// Human-readable summary.
    pub description: String,
    /// Reading that crossed the bound.
    pub measured_value: Option<f64>,
    /// The most severe crossed bound.
    pub violated_bound: Option<BoundKind>,
    /// Value of that bound.
    pub bound_value: Option<f64>,
    /// Originating rule.
    pub rule_id: Option<RuleId>,
    /// Rule name at fire time; survives rule deletion.
    pub rule_name: Option<String>,
    /// Copied from the rule.
    pub priority: Priority,
    /// Where the measurement was taken.
    pub location: Location,
}

impl AlertDraft {
    /// Returns the deduplication key, if the draft comes from a rule.
    #[must_use]
    pub fn episode_key(&self) -> Option<EpisodeKey> {
        self.rule_id
            .map(|rule_id| EpisodeKey::new(rule_id, self.sensor_id.clone()))
    }
}

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Assigned at persistence time.
    pub id: AlertId,
    /// Alert classification.
    pub kind: AlertKind,
    /// Reporting sensor.
    pub sensor_id: String,
    /// When the alert was persisted.
    pub fired_at: DateTime<Utc>,
    /// Timestamp of the measurement that caused the alert.
    pub measured_at: DateTime<Utc>,
    /// Human-readable summary.
    pub description: String,
    /// Reading that crossed the bound.
    pub measured_value: Option<f64>,
    /// The most severe crossed bound.
    pub violated_bound: Option<BoundKind>,
    /// Value of that bound.
    pub bound_value: Option<f64>,
    /// Originating rule.
    pub rule_id: Option<RuleId>,
    /// Rule name at fire time.
    pub rule_name: Option<String>,
    /// Copied from the rule.
    pub priority: Priority,
    /// Current lifecycle state.
    pub state: AlertState,
    /// Where the measurement was taken.
    pub location: Location,
    /// When an operator acknowledged the alert.
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// When the alert was resolved.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Materialises a draft as a new active alert.
    #[must_use]
    pub fn from_draft(draft: AlertDraft, fired_at: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new(),
            kind: draft.kind,
            sensor_id: draft.sensor_id,
            fired_at,
            measured_at: draft.measured_at,
            description: draft.description,
            measured_value: draft.measured_value,
            violated_bound: draft.violated_bound,
            bound_value: draft.bound_value,
            rule_id: draft.rule_id,
            rule_name: draft.rule_name,
            priority: draft.priority,
            state: AlertState::Active,
            location: draft.location,
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    /// Returns the deduplication key, if the alert comes from a rule.
    #[must_use]
    pub fn episode_key(&self) -> Option<EpisodeKey> {
        self.rule_id
            .map(|rule_id| EpisodeKey::new(rule_id, self.sensor_id.clone()))
    }

    /// Returns true while the alert blocks new alerts for its pair.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Moves the alert to `state`, stamping the transition time.
    ///
    /// Returns false, leaving the alert untouched, if the lifecycle forbids it.
    pub fn transition(&mut self, state: AlertState, at: DateTime<Utc>) -> bool {
        if !self.state.can_transition_to(state) {
            return false;
        }
        if self.state == state {
            return true;
        }
        match state {
            AlertState::Acknowledged => self.acknowledged_at = Some(at),
            AlertState::Resolved => self.resolved_at = Some(at),
            AlertState::Active => {}
        }
        self.state = state;
        true
    }

    /// Checks if this alert matches the given filter.
    #[must_use]
    pub fn matches(&self, filter: &AlertFilter) -> bool {
        if !filter.states.is_empty() && !filter.states.contains(&self.state) {
            return false;
        }
        if !filter.kinds.is_empty() && !filter.kinds.contains(&self.kind) {
            return false;
        }
        if filter
            .sensor_id
            .as_ref()
            .is_some_and(|s| *s != self.sensor_id)
        {
            return false;
        }
        if filter.rule_id.is_some() && filter.rule_id != self.rule_id {
            return false;
        }
        if filter.min_priority.is_some_and(|p| self.priority < p) {
            return false;
        }
        if filter
            .country
            .as_deref()
            .is_some_and(|c| !same_place(c, &self.location.country))
        {
            return false;
        }
        if let Some(city) = filter.city.as_deref() {
            if !self
                .location
                .city
                .as_deref()
                .is_some_and(|c| same_place(c, city))
            {
                return false;
            }
        }
        if filter.fired_from.is_some_and(|from| self.fired_at < from) {
            return false;
        }
        if filter.fired_until.is_some_and(|until| self.fired_at >= until) {
            return false;
        }
        true
    }
}

/// Filter criteria for alerts, used by queries and live subscriptions.
///
/// Empty lists and `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    /// Only these states.
    #[serde(default)]
    pub states: Vec<AlertState>,
    /// Only these kinds.
    #[serde(default)]
    pub kinds: Vec<AlertKind>,
    /// Only this sensor.
    #[serde(default)]
    pub sensor_id: Option<String>,
    /// Only this rule.
    #[serde(default)]
    pub rule_id: Option<RuleId>,
    /// Only alerts at or above this priority.
    #[serde(default)]
    pub min_priority: Option<Priority>,
    /// Only this country.
    #[serde(default)]
    pub country: Option<String>,
    /// Only this city.
    #[serde(default)]
    pub city: Option<String>,
    /// Fired at or after this instant.
    #[serde(default)]
    pub fired_from: Option<DateTime<Utc>>,
    /// Fired strictly before this instant.
    #[serde(default)]
    pub fired_until: Option<DateTime<Utc>>,
}

impl AlertFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state to match.
    #[must_use]
    pub fn with_state(mut self, state: AlertState) -> Self {
        self.states.push(state);
        self
    }

    /// Adds a kind to match.
    #[must_use]
    pub fn with_kind(mut self, kind: AlertKind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Restricts to one sensor.
    #[must_use]
    pub fn with_sensor(mut self, sensor_id: impl Into<String>) -> Self {
        self.sensor_id = Some(sensor_id.into());
        self
    }

    /// Restricts to one rule.
    #[must_use]
    pub const fn with_rule(mut self, rule_id: RuleId) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    /// Restricts to a minimum priority.
    #[must_use]
    pub const fn with_min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Restricts to a country.
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Restricts to a city.
    #[must_use]
    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Restricts to `[from, until)` on the fire time.
    #[must_use]
    pub const fn with_fired_between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.fired_from = Some(from);
        self.fired_until = Some(until);
        self
    }
}

/// Alert counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    /// All alerts.
    pub total: usize,
    /// Active alerts.
    pub active: usize,
    /// Acknowledged alerts.
    pub acknowledged: usize,
    /// Resolved alerts.
    pub resolved: usize,
}

impl AlertSummary {
    /// Counts one alert.
    pub fn add(&mut self, state: AlertState) {
        self.total += 1;
        match state {
            AlertState::Active => self.active += 1,
            AlertState::Acknowledged => self.acknowledged += 1,
            AlertState::Resolved => self.resolved += 1,
        }
    }
}
