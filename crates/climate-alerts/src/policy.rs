//! Deduplication and priority policy.
//!
//! Turns the violations of one rule into at most one [`AlertDraft`] and
//! decides, given what is already open for the (rule, sensor) pair, whether
//! that draft may become a new alert.

use chrono::{DateTime, Utc};

use crate::alert::{Alert, AlertDraft, AlertKind};
use crate::evaluator::{Violation, most_severe};
use crate::rule::Rule;
use crate::types::{AlertId, Measurement};

/// Builds the single alert draft for one measurement against one rule.
///
/// The draft carries the most severe violation; the description lists all of
/// them. Priority is copied from the rule unchanged. Returns `None` when
/// there is nothing to report.
#[must_use]
pub fn draft_alert(rule: &Rule, measurement: &Measurement, violations: &[Violation]) -> Option<AlertDraft> {
    let worst = most_severe(violations)?;

    Some(AlertDraft {
        kind: AlertKind::Threshold,
        sensor_id: measurement.sensor_id.clone(),
        measured_at: measurement.timestamp,
        description: describe(rule, violations),
        measured_value: Some(worst.measured_value),
        violated_bound: Some(worst.bound),
        bound_value: Some(worst.bound_value),
        rule_id: Some(rule.id),
        rule_name: Some(rule.name.clone()),
        priority: rule.priority,
        location: measurement.location(),
    })
}

/// Formats the human-readable alert text.
fn describe(rule: &Rule, violations: &[Violation]) -> String {
    let details = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ");

    let description = rule.description.trim();
    if description.is_empty() {
        format!("{}. Location: {}. {details}", rule.name, rule.scope)
    } else {
        format!(
            "{} - {}. Location: {}. {details}",
            rule.name,
            description.trim_end_matches('.'),
            rule.scope
        )
    }
}

/// Outcome of the dedup check for one draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No open alert for the pair: persist a new one.
    Fire,
    /// An alert for the pair is still open; the violation is swallowed.
    Duplicate(AlertId),
    /// The measurement predates the pair's last fired alert.
    Stale,
}

/// Decides whether a draft opens a new alert episode.
///
/// `open` is the pair's unresolved alert, if any; `last_fired` is the
/// measurement time of the most recent alert fired for the pair.
#[must_use]
pub fn admit(
    draft: &AlertDraft,
    open: Option<&Alert>,
    last_fired: Option<DateTime<Utc>>,
) -> Admission {
    if let Some(open) = open.filter(|a| a.is_open()) {
        return Admission::Duplicate(open.id);
    }
    if last_fired.is_some_and(|last| draft.measured_at < last) {
        return Admission::Stale;
    }
    Admission::Fire
}
