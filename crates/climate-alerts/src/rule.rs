//! Alert rule definitions and their invariants.
//!
//! A [`Rule`] is created from a [`RuleDraft`] and changed through a
//! [`RulePatch`]. Both paths end in [`Rule::validate`], so a partial update
//! can never produce a rule that creation would have rejected.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AlertError, Result};
use crate::types::{Location, Priority, RuleId, same_place};

/// Whether a rule takes part in evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// The rule is evaluated against incoming measurements.
    #[default]
    Active,
    /// The rule is kept but never fires.
    Inactive,
}

impl RuleStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Geographic breadth at which a rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum RuleScope {
    /// Any location within the country.
    Country {
        /// Country name.
        country: String,
    },
    /// Any city within the region.
    Region {
        /// Country name.
        country: String,
        /// Region name.
        region: String,
    },
    /// Exactly one city.
    City {
        /// Country name.
        country: String,
        /// City name.
        city: String,
    },
}

impl RuleScope {
    /// Country-wide scope.
    pub fn country(country: impl Into<String>) -> Self {
        Self::Country {
            country: country.into(),
        }
    }

    /// Region scope.
    pub fn region(country: impl Into<String>, region: impl Into<String>) -> Self {
        Self::Region {
            country: country.into(),
            region: region.into(),
        }
    }

    /// City scope.
    pub fn city(country: impl Into<String>, city: impl Into<String>) -> Self {
        Self::City {
            country: country.into(),
            city: city.into(),
        }
    }

    /// Returns the country the scope lives in.
    #[must_use]
    pub fn country_name(&self) -> &str {
        match self {
            Self::Country { country } | Self::Region { country, .. } | Self::City { country, .. } => {
                country
            }
        }
    }

    /// Returns the scope level as a string.
    #[must_use]
    pub const fn level(&self) -> &'static str {
        match self {
            Self::Country { .. } => "country",
            Self::Region { .. } => "region",
            Self::City { .. } => "city",
        }
    }

    /// Returns true if a measurement taken at `location` falls inside this scope.
    #[must_use]
    pub fn matches(&self, location: &Location) -> bool {
        if location.country.trim().is_empty() || !same_place(self.country_name(), &location.country) {
            return false;
        }
        match self {
            Self::Country { .. } => true,
            Self::Region { region, .. } => location
                .region
                .as_deref()
                .is_some_and(|r| same_place(r, region)),
            Self::City { city, .. } => location
                .city
                .as_deref()
                .is_some_and(|c| same_place(c, city)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.country_name().trim().chars().count() < 2 {
            return Err(AlertError::invalid_rule(
                "country must be at least 2 characters",
            ));
        }
        match self {
            Self::Country { .. } => Ok(()),
            Self::Region { region, .. } if region.trim().is_empty() => Err(
                AlertError::invalid_rule("region is required when scope is 'region'"),
            ),
            Self::City { city, .. } if city.trim().is_empty() => Err(AlertError::invalid_rule(
                "city is required when scope is 'city'",
            )),
            Self::Region { .. } | Self::City { .. } => Ok(()),
        }
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Country { country } => write!(f, "{country}"),
            Self::Region { country, region } => write!(f, "{region}, {country}"),
            Self::City { country, city } => write!(f, "{city}, {country}"),
        }
    }
}

/// Temperature and humidity bounds. At least one must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Fires when temperature drops below this value (°C).
    #[serde(default)]
    pub temperature_min: Option<f64>,
    /// Fires when temperature rises above this value (°C).
    #[serde(default)]
    pub temperature_max: Option<f64>,
    /// Fires when humidity drops below this value (%).
    #[serde(default)]
    pub humidity_min: Option<f64>,
    /// Fires when humidity rises above this value (%).
    #[serde(default)]
    pub humidity_max: Option<f64>,
}

impl Thresholds {
    /// Returns true if no bound is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.temperature_min.is_none()
            && self.temperature_max.is_none()
            && self.humidity_min.is_none()
            && self.humidity_max.is_none()
    }

    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(AlertError::invalid_rule(
                "at least one temperature or humidity bound is required",
            ));
        }

        let bounds = [
            ("temperature_min", self.temperature_min),
            ("temperature_max", self.temperature_max),
            ("humidity_min", self.humidity_min),
            ("humidity_max", self.humidity_max),
        ];
        for (name, value) in bounds {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(AlertError::invalid_rule(format!("{name} must be finite")));
                }
            }
        }

        for (name, value) in [("humidity_min", self.humidity_min), ("humidity_max", self.humidity_max)] {
            if let Some(v) = value {
                if !(0.0..=100.0).contains(&v) {
                    return Err(AlertError::invalid_rule(format!(
                        "{name} must be between 0 and 100"
                    )));
                }
            }
        }

        if let (Some(min), Some(max)) = (self.temperature_min, self.temperature_max) {
            if min > max {
                return Err(AlertError::invalid_rule(
                    "temperature_min cannot be greater than temperature_max",
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.humidity_min, self.humidity_max) {
            if min > max {
                return Err(AlertError::invalid_rule(
                    "humidity_min cannot be greater than humidity_max",
                ));
            }
        }
        Ok(())
    }
}

/// Optional validity window. Open ends contain everything on their side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    /// First instant the rule may fire.
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// Last instant the rule may fire.
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    /// A window that is always valid.
    pub const ALWAYS: Self = Self {
        valid_from: None,
        valid_until: None,
    };

    /// Creates a closed window.
    #[must_use]
    pub const fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            valid_from: Some(from),
            valid_until: Some(until),
        }
    }

    /// Returns true if `at` lies inside the window (both ends inclusive).
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.is_none_or(|from| from <= at)
            && self.valid_until.is_none_or(|until| at <= until)
    }

    fn validate(&self) -> Result<()> {
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if from > until {
                return Err(AlertError::invalid_rule(
                    "valid_from cannot be after valid_until",
                ));
            }
        }
        Ok(())
    }
}

/// Input for creating a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDraft {
    /// Human-readable name.
    pub name: String,
    /// What the rule detects.
    #[serde(default)]
    pub description: String,
    /// Bounds to check.
    #[serde(flatten)]
    pub thresholds: Thresholds,
    /// Where the rule applies.
    pub scope: RuleScope,
    /// When the rule applies.
    #[serde(flatten)]
    pub window: ValidityWindow,
    /// Priority copied onto fired alerts.
    #[serde(default)]
    pub priority: Priority,
    /// Initial status.
    #[serde(default)]
    pub status: RuleStatus,
}

impl RuleDraft {
    /// Creates a draft with the given name and scope and no bounds.
    pub fn new(name: impl Into<String>, scope: RuleScope) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            thresholds: Thresholds::default(),
            scope,
            window: ValidityWindow::ALWAYS,
            priority: Priority::default(),
            status: RuleStatus::Active,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the minimum temperature.
    #[must_use]
    pub const fn temperature_min(mut self, value: f64) -> Self {
        self.thresholds.temperature_min = Some(value);
        self
    }

    /// Sets the maximum temperature.
    #[must_use]
    pub const fn temperature_max(mut self, value: f64) -> Self {
        self.thresholds.temperature_max = Some(value);
        self
    }

    /// Sets the minimum humidity.
    #[must_use]
    pub const fn humidity_min(mut self, value: f64) -> Self {
        self.thresholds.humidity_min = Some(value);
        self
    }

    /// Sets the maximum humidity.
    #[must_use]
    pub const fn humidity_max(mut self, value: f64) -> Self {
        self.thresholds.humidity_max = Some(value);
        self
    }

    /// Sets the validity window.
    #[must_use]
    pub const fn window(mut self, window: ValidityWindow) -> Self {
        self.window = window;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub const fn status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }
}

/// Deserializes a present-but-null field as `Some(None)` so patches can clear values.
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial update. `None` leaves a field untouched; for optional fields
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulePatch {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New or cleared minimum temperature.
    #[serde(default, deserialize_with = "double_option")]
    pub temperature_min: Option<Option<f64>>,
    /// New or cleared maximum temperature.
    #[serde(default, deserialize_with = "double_option")]
    pub temperature_max: Option<Option<f64>>,
    /// New or cleared minimum humidity.
    #[serde(default, deserialize_with = "double_option")]
    pub humidity_min: Option<Option<f64>>,
    /// New or cleared maximum humidity.
    #[serde(default, deserialize_with = "double_option")]
    pub humidity_max: Option<Option<f64>>,
    /// New scope.
    #[serde(default)]
    pub scope: Option<RuleScope>,
    /// New or cleared start of validity.
    #[serde(default, deserialize_with = "double_option")]
    pub valid_from: Option<Option<DateTime<Utc>>>,
    /// New or cleared end of validity.
    #[serde(default, deserialize_with = "double_option")]
    pub valid_until: Option<Option<DateTime<Utc>>>,
    /// New priority.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// New status.
    #[serde(default)]
    pub status: Option<RuleStatus>,
}

impl RulePatch {
    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// An administrator-defined alerting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier.
    pub id: RuleId,
    /// Human-readable name.
    pub name: String,
    /// What the rule detects.
    pub description: String,
    /// Bounds to check.
    #[serde(flatten)]
    pub thresholds: Thresholds,
    /// Where the rule applies.
    pub scope: RuleScope,
    /// When the rule applies.
    #[serde(flatten)]
    pub window: ValidityWindow,
    /// Priority copied onto fired alerts.
    pub priority: Priority,
    /// Whether the rule is evaluated.
    pub status: RuleStatus,
    /// Administrator who created the rule.
    pub created_by: String,
    /// Set by the rule store on creation.
    pub created_at: DateTime<Utc>,
    /// Set by the rule store on every change.
    pub modified_at: Option<DateTime<Utc>>,
}

impl Rule {
    /// Minimum length of a rule name.
    pub const MIN_NAME_LENGTH: usize = 3;
    /// Maximum length of a rule name.
    pub const MAX_NAME_LENGTH: usize = 200;
    /// Maximum length of a rule description.
    pub const MAX_DESCRIPTION_LENGTH: usize = 500;

    /// Builds and validates a new rule from a draft.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the draft breaks any rule invariant.
    pub fn from_draft(
        draft: RuleDraft,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let rule = Self {
            id: RuleId::new(),
            name: draft.name.trim().to_string(),
            description: draft.description,
            thresholds: draft.thresholds,
            scope: draft.scope,
            window: draft.window,
            priority: draft.priority,
            status: draft.status,
            created_by: created_by.into(),
            created_at: now,
            modified_at: None,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Returns a copy of this rule with the patch merged in, validated as if newly created.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the merged rule breaks any invariant.
    pub fn patched(&self, patch: &RulePatch, now: DateTime<Utc>) -> Result<Self> {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(description) = &patch.description {
            next.description.clone_from(description);
        }
        if let Some(v) = patch.temperature_min {
            next.thresholds.temperature_min = v;
        }
        if let Some(v) = patch.temperature_max {
            next.thresholds.temperature_max = v;
        }
        if let Some(v) = patch.humidity_min {
            next.thresholds.humidity_min = v;
        }
        if let Some(v) = patch.humidity_max {
            next.thresholds.humidity_max = v;
        }
        if let Some(scope) = &patch.scope {
            next.scope = scope.clone();
        }
        if let Some(v) = patch.valid_from {
            next.window.valid_from = v;
        }
        if let Some(v) = patch.valid_until {
            next.window.valid_until = v;
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        next.modified_at = Some(now);
        next.validate()?;
        Ok(next)
    }

    /// Checks every rule invariant.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` describing the first broken invariant.
    pub fn validate(&self) -> Result<()> {
        let name_len = self.name.chars().count();
        if name_len < Self::MIN_NAME_LENGTH || name_len > Self::MAX_NAME_LENGTH {
            return Err(AlertError::invalid_rule(format!(
                "rule name must be between {} and {} characters",
                Self::MIN_NAME_LENGTH,
                Self::MAX_NAME_LENGTH
            )));
        }
        if self.description.chars().count() > Self::MAX_DESCRIPTION_LENGTH {
            return Err(AlertError::invalid_rule(format!(
                "rule description exceeds {} characters",
                Self::MAX_DESCRIPTION_LENGTH
            )));
        }
        self.thresholds.validate()?;
        self.scope.validate()?;
        self.window.validate()
    }

    /// Returns true if the rule is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    /// Returns true if the rule is active, covers `location` and is valid at `at`.
    #[must_use]
    pub fn applies_to(&self, location: &Location, at: DateTime<Utc>) -> bool {
        self.is_active() && self.scope.matches(location) && self.window.contains(at)
    }
}
