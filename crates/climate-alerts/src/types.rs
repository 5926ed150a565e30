//! Shared value types for the alerting engine.
//!
//! This module provides:
//! - [`RuleId`] / [`AlertId`] - stable identifiers
//! - [`Priority`] - rule and alert priority (1 = lowest, 5 = critical)
//! - [`Location`] - a (country, region, city) tuple with normalised matching
//! - [`Measurement`] - one sensor reading, the engine's input
//! - [`Page`] - offset + limit pagination

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};

/// Unique identifier for a rule. Assigned at creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a persisted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub Uuid);

impl AlertId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority of a rule, copied verbatim onto the alerts it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority.
    pub const LOWEST: Self = Self(1);
    /// Highest (critical) priority.
    pub const CRITICAL: Self = Self(5);

    /// Creates a priority, rejecting values outside `1..=5`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the value is out of range.
    pub fn new(value: u8) -> Result<Self> {
        if (Self::LOWEST.0..=Self::CRITICAL.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(AlertError::invalid_rule(format!(
                "priority must be between 1 and 5, got {value}"
            )))
        }
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOWEST
    }
}

impl TryFrom<u8> for Priority {
    type Error = AlertError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalises a location component for matching and indexing.
pub(crate) fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Returns true if two location components name the same place.
pub(crate) fn same_place(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// A geographic location: country plus optional region and city.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Country name.
    pub country: String,
    /// Region or zone, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// City, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl Location {
    /// Creates a country-only location.
    #[must_use]
    pub fn country(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            region: None,
            city: None,
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the city.
    #[must_use]
    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.city, &self.region) {
            (Some(city), _) => write!(f, "{city}, {}", self.country),
            (None, Some(region)) => write!(f, "{region}, {}", self.country),
            (None, None) => write!(f, "{}", self.country),
        }
    }
}

/// A single climate reading reported by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Reporting sensor.
    pub sensor_id: String,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
    /// Temperature in °C, if the sensor reported one.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Relative humidity in %, if the sensor reported one.
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Country of the sensor.
    pub country: String,
    /// City of the sensor.
    #[serde(default)]
    pub city: Option<String>,
    /// Region of the sensor, derived upstream when available.
    #[serde(default)]
    pub region: Option<String>,
}

impl Measurement {
    /// Creates a measurement with no readings for the given sensor and location.
    #[must_use]
    pub fn new(sensor_id: impl Into<String>, timestamp: DateTime<Utc>, location: Location) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp,
            temperature: None,
            humidity: None,
            country: location.country,
            city: location.city,
            region: location.region,
        }
    }

    /// Sets the temperature reading.
    #[must_use]
    pub const fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature = Some(celsius);
        self
    }

    /// Sets the humidity reading.
    #[must_use]
    pub const fn with_humidity(mut self, percent: f64) -> Self {
        self.humidity = Some(percent);
        self
    }

    /// Returns the location the measurement was taken at.
    #[must_use]
    pub fn location(&self) -> Location {
        Location {
            country: self.country.clone(),
            region: self.region.clone(),
            city: self.city.clone(),
        }
    }
}

/// Offset + limit pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Number of records to skip.
    #[serde(default)]
    pub offset: usize,
    /// Maximum number of records to return; `None` leaves the choice to the caller.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Page {
    /// Creates a page.
    #[must_use]
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Resolves the effective limit against a default and a hard cap.
    #[must_use]
    pub fn effective_limit(&self, default_limit: usize, max_limit: usize) -> usize {
        self.limit.unwrap_or(default_limit).min(max_limit)
    }

    /// Returns this page with its limit resolved against a default and a hard cap.
    #[must_use]
    pub fn resolved(self, default_limit: usize, max_limit: usize) -> Self {
        Self::new(self.offset, self.effective_limit(default_limit, max_limit))
    }

    /// Applies the page to an already ordered sequence. An unset limit takes everything.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}
