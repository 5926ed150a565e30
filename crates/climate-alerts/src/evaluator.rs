//! Threshold evaluation.
//!
//! [`evaluate`] is a pure function: it checks one measurement against one
//! rule that is already known to be in scope and temporally valid, and
//! reports every violated bound.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rule::Rule;
use crate::types::Measurement;

/// Which bound of a rule was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundKind {
    /// Temperature below `temperature_min`.
    TempMin,
    /// Temperature above `temperature_max`.
    TempMax,
    /// Humidity below `humidity_min`.
    HumMin,
    /// Humidity above `humidity_max`.
    HumMax,
}

impl BoundKind {
    /// Returns the bound kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TempMin => "temp_min",
            Self::TempMax => "temp_max",
            Self::HumMin => "hum_min",
            Self::HumMax => "hum_max",
        }
    }

    /// Tie-break rank: temperature before humidity, max before min.
    const fn rank(self) -> u8 {
        match self {
            Self::TempMax => 0,
            Self::TempMin => 1,
            Self::HumMax => 2,
            Self::HumMin => 3,
        }
    }

    const fn is_temperature(self) -> bool {
        matches!(self, Self::TempMin | Self::TempMax)
    }

    const fn is_max(self) -> bool {
        matches!(self, Self::TempMax | Self::HumMax)
    }
}

impl fmt::Display for BoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single crossed bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// The bound that was crossed.
    pub bound: BoundKind,
    /// The reading that crossed it.
    pub measured_value: f64,
    /// The configured bound.
    pub bound_value: f64,
}

impl Violation {
    /// Distance past the bound, in the axis' unit.
    #[must_use]
    pub fn excursion(&self) -> f64 {
        (self.measured_value - self.bound_value).abs()
    }

    /// Orders violations from most to least severe.
    ///
    /// Excursions are compared as raw numbers across axes, so 2 points of
    /// humidity outrank 1 °C of temperature. Ties fall back to the bound
    /// order: temperature before humidity, maximum before minimum.
    fn severity_cmp(&self, other: &Self) -> Ordering {
        other
            .excursion()
            .total_cmp(&self.excursion())
            .then_with(|| self.bound.rank().cmp(&other.bound.rank()))
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (axis, unit) = if self.bound.is_temperature() {
            ("Temperature", "°C")
        } else {
            ("Humidity", "%")
        };
        let side = if self.bound.is_max() {
            "above maximum"
        } else {
            "below minimum"
        };
        write!(
            f,
            "{axis} {}{unit} {side} ({}{unit})",
            self.measured_value, self.bound_value
        )
    }
}

/// Checks a measurement against a rule's bounds.
///
/// A missing reading skips the axis. The result is ordered most severe first
/// and is empty when nothing was violated.
#[must_use]
pub fn evaluate(measurement: &Measurement, rule: &Rule) -> Vec<Violation> {
    let t = &rule.thresholds;
    let mut violations = Vec::new();

    if let Some(temp) = measurement.temperature {
        if let Some(min) = t.temperature_min.filter(|min| temp < *min) {
            violations.push(Violation {
                bound: BoundKind::TempMin,
                measured_value: temp,
                bound_value: min,
            });
        }
        if let Some(max) = t.temperature_max.filter(|max| temp > *max) {
            violations.push(Violation {
                bound: BoundKind::TempMax,
                measured_value: temp,
                bound_value: max,
            });
        }
    }

    if let Some(hum) = measurement.humidity {
        if let Some(min) = t.humidity_min.filter(|min| hum < *min) {
            violations.push(Violation {
                bound: BoundKind::HumMin,
                measured_value: hum,
                bound_value: min,
            });
        }
        if let Some(max) = t.humidity_max.filter(|max| hum > *max) {
            violations.push(Violation {
                bound: BoundKind::HumMax,
                measured_value: hum,
                bound_value: max,
            });
        }
    }

    violations.sort_by(Violation::severity_cmp);
    violations
}

/// Returns the single most severe violation, if any.
///
/// Severity is the raw excursion with no unit conversion between °C and
/// relative humidity %.
#[must_use]
pub fn most_severe(violations: &[Violation]) -> Option<Violation> {
    violations.iter().min_by(|a, b| a.severity_cmp(b)).copied()
}
