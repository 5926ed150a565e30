//! The rule store.
//!
//! [`RuleStore`] owns the authoritative set of rules and keeps the derived
//! [`ScopeIndex`] current: every successful mutation has been applied to the
//! index before the call returns, so a caller's next evaluation observes it.
//! When configured with a snapshot path the full rule set is written to disk
//! (write-to-temp, then rename) on every mutation and reloaded on open.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AlertError, Result};
use crate::index::{ScopeIndex, ScopeSnapshot};
use crate::rule::{Rule, RuleDraft, RulePatch, RuleScope, RuleStatus};
use crate::types::{Location, Page, RuleId, same_place};

/// Filter criteria for listing rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilter {
    /// Only rules with this status.
    #[serde(default)]
    pub status: Option<RuleStatus>,
    /// Only rules in this country.
    #[serde(default)]
    pub country: Option<String>,
    /// Only city-scoped rules for this city.
    #[serde(default)]
    pub city: Option<String>,
}

impl RuleFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to a status.
    #[must_use]
    pub const fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = Some(status);
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

    /// Checks if a rule matches the filter.
    #[must_use]
    pub fn matches(&self, rule: &Rule) -> bool {
        if self.status.is_some_and(|s| s != rule.status) {
            return false;
        }
        if self
            .country
            .as_deref()
            .is_some_and(|c| !same_place(c, rule.scope.country_name()))
        {
            return false;
        }
        if let Some(city) = self.city.as_deref() {
            match &rule.scope {
                RuleScope::City { city: rule_city, .. } if same_place(city, rule_city) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Rule counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSummary {
    /// All rules.
    pub total: usize,
    /// Active rules.
    pub active: usize,
    /// Inactive rules.
    pub inactive: usize,
}

/// Listing order: priority descending, then creation time, then id.
fn listing_order(a: &Rule, b: &Rule) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Thread-safe rule store with a derived scope index.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: RwLock<HashMap<RuleId, Rule>>,
    index: ScopeIndex,
    snapshot_path: Option<PathBuf>,
}

impl RuleStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by a JSON snapshot, loading it if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read or parsed,
    /// or contains a rule that fails validation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut rules = HashMap::new();

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let loaded: Vec<Rule> = serde_json::from_str(&content)?;
            for rule in loaded {
                rule.validate()?;
                rules.insert(rule.id, rule);
            }
        }
        info!(path = %path.display(), count = rules.len(), "loaded rule snapshot");

        let index = ScopeIndex::new();
        index.rebuild(rules.values().cloned());

        Ok(Self {
            rules: RwLock::new(rules),
            index,
            snapshot_path: Some(path),
        })
    }

    /// Creates a rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if the draft is invalid, or
    /// `AlertError::TransientStorage` if the snapshot cannot be written.
    pub fn create(&self, draft: RuleDraft, created_by: &str) -> Result<Rule> {
        let rule = Rule::from_draft(draft, created_by, Utc::now())?;

        let mut rules = self.rules.write();
        rules.insert(rule.id, rule.clone());
        if let Err(e) = self.save(&rules) {
            rules.remove(&rule.id);
            return Err(e);
        }
        self.index.upsert(rule.clone());
        drop(rules);

        info!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            scope = %rule.scope,
            created_by = %rule.created_by,
            "created alert rule"
        );
        Ok(rule)
    }

    /// Applies a partial update, re-validating the merged rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound`, `AlertError::InvalidRule`, or
    /// `AlertError::TransientStorage`.
    pub fn update(&self, id: RuleId, patch: &RulePatch) -> Result<Rule> {
        let mut rules = self.rules.write();
        let current = rules
            .get(&id)
            .cloned()
            .ok_or_else(|| AlertError::RuleNotFound { id: id.to_string() })?;

        if patch.is_empty() {
            return Ok(current);
        }

        let next = current.patched(patch, Utc::now())?;
        self.replace(&mut rules, current, next.clone())?;
        drop(rules);

        info!(rule_id = %id, rule_name = %next.name, "updated alert rule");
        Ok(next)
    }

    /// Activates or deactivates a rule. Setting the current status is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` or `AlertError::TransientStorage`.
    pub fn set_status(&self, id: RuleId, status: RuleStatus) -> Result<Rule> {
        let mut rules = self.rules.write();
        let current = rules
            .get(&id)
            .cloned()
            .ok_or_else(|| AlertError::RuleNotFound { id: id.to_string() })?;

        if current.status == status {
            debug!(rule_id = %id, status = %status, "rule status unchanged");
            return Ok(current);
        }

        let mut next = current.clone();
        next.status = status;
        next.modified_at = Some(Utc::now());
        self.replace(&mut rules, current, next.clone())?;
        drop(rules);

        info!(rule_id = %id, status = %status, "changed alert rule status");
        Ok(next)
    }

    /// Permanently deletes a rule. Alerts it fired keep their rule name.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::RuleNotFound` or `AlertError::TransientStorage`.
    pub fn delete(&self, id: RuleId) -> Result<()> {
        let mut rules = self.rules.write();
        let removed = rules
            .remove(&id)
            .ok_or_else(|| AlertError::RuleNotFound { id: id.to_string() })?;

        if let Err(e) = self.save(&rules) {
            rules.insert(id, removed);
            return Err(e);
        }
        self.index.remove(id);
        drop(rules);

        info!(rule_id = %id, rule_name = %removed.name, "deleted alert rule");
        Ok(())
    }

    /// Gets a rule by ID.
    #[must_use]
    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.rules.read().get(&id).cloned()
    }

    /// Lists rules matching the filter, ordered by priority (highest first).
    #[must_use]
    pub fn list(&self, filter: &RuleFilter, page: Page) -> Vec<Rule> {
        let mut matching: Vec<Rule> = self
            .rules
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(listing_order);
        page.apply(matching)
    }

    /// Active rules covering `location` whose validity window contains `at`.
    ///
    /// Answered from the scope index; ordered by priority (highest first), then id.
    #[must_use]
    pub fn get_applicable(&self, location: &Location, at: DateTime<Utc>) -> Vec<Arc<Rule>> {
        let snapshot = self.index.snapshot();
        let mut applicable: Vec<Arc<Rule>> = snapshot
            .candidates(location)
            .into_iter()
            .filter(|r| r.applies_to(location, at))
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        applicable
    }

    /// Counts rules by status.
    #[must_use]
    pub fn summary(&self) -> RuleSummary {
        let rules = self.rules.read();
        let active = rules.values().filter(|r| r.is_active()).count();
        RuleSummary {
            total: rules.len(),
            active,
            inactive: rules.len() - active,
        }
    }

    /// Number of stored rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if no rule is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Returns the latest scope index snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ScopeSnapshot> {
        self.index.snapshot()
    }

    /// Returns the snapshot file path, if the store is durable.
    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    fn replace(&self, rules: &mut HashMap<RuleId, Rule>, current: Rule, next: Rule) -> Result<()> {
        let id = current.id;
        rules.insert(id, next.clone());
        if let Err(e) = self.save(rules) {
            rules.insert(id, current);
            return Err(e);
        }
        self.index.upsert(next);
        Ok(())
    }

    fn save(&self, rules: &HashMap<RuleId, Rule>) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut ordered: Vec<&Rule> = rules.values().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let result = write_atomically(path, &ordered);
        if let Err(e) = &result {
            warn!(path = %path.display(), error = %e, "failed to write rule snapshot");
        }
        result
    }
}

fn write_atomically(path: &Path, rules: &[&Rule]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, rules)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ValidityWindow;
    use crate::types::Priority;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn heat(scope: RuleScope) -> RuleDraft {
        RuleDraft::new("Heat wave", scope).temperature_max(35.0)
    }

    fn create(store: &RuleStore, draft: RuleDraft) -> Rule {
        match store.create(draft, "admin@example.com") {
            Ok(r) => r,
            Err(e) => panic!("create failed: {e}"),
        }
    }

    fn rosario() -> Location {
        Location::country("Argentina").with_city("Rosario")
    }

    mod crud_tests {
        use super::*;

        #[test]
        fn create_assigns_identity_and_indexes() {
            let store = RuleStore::new();
            let rule = create(&store, heat(RuleScope::country("Argentina")));
            assert_eq!(store.len(), 1);
            assert_eq!(store.get(rule.id), Some(rule.clone()));
            assert!(store.snapshot().contains(rule.id));
        }

        #[test]
        fn invalid_create_is_not_applied() {
            let store = RuleStore::new();
            let result = store.create(
                RuleDraft::new("No bounds", RuleScope::country("Argentina")),
                "admin",
            );
            assert!(matches!(result, Err(AlertError::InvalidRule { .. })));
            assert!(store.is_empty());
            assert!(store.snapshot().is_empty());
        }

        #[test]
        fn update_revalidates_and_reindexes() {
            let store = RuleStore::new();
            let rule = create(&store, heat(RuleScope::city("Argentina", "Rosario")));

            let bad = RulePatch {
                temperature_min: Some(Some(40.0)),
                ..RulePatch::default()
            };
            assert!(matches!(store.update(rule.id, &bad), Err(AlertError::InvalidRule { .. })));
            assert_eq!(store.get(rule.id), Some(rule.clone()));

            let move_city = RulePatch {
                scope: Some(RuleScope::city("Argentina", "Cordoba")),
                ..RulePatch::default()
            };
            assert!(store.update(rule.id, &move_city).is_ok());
            assert!(store.get_applicable(&rosario(), Utc::now()).is_empty());
            let cordoba = Location::country("Argentina").with_city("Cordoba");
            assert_eq!(store.get_applicable(&cordoba, Utc::now()).len(), 1);
        }

        #[test]
        fn update_unknown_rule_is_not_found() {
            let store = RuleStore::new();
            let result = store.update(RuleId::new(), &RulePatch::default());
            assert!(matches!(result, Err(AlertError::RuleNotFound { .. })));
        }

        #[test]
        fn set_status_is_idempotent() {
            let store = RuleStore::new();
            let rule = create(&store, heat(RuleScope::country("Argentina")));

            let first = store.set_status(rule.id, RuleStatus::Inactive);
            assert!(matches!(&first, Ok(r) if r.status == RuleStatus::Inactive));
            let second = store.set_status(rule.id, RuleStatus::Inactive);
            assert!(second.is_ok());
            if let (Ok(a), Ok(b)) = (first, second) {
                assert_eq!(a.modified_at, b.modified_at);
            }
            assert!(matches!(
                store.set_status(RuleId::new(), RuleStatus::Active),
                Err(AlertError::RuleNotFound { .. })
            ));
        }

        #[test]
        fn delete_removes_from_index_before_returning() {
            let store = RuleStore::new();
            let rule = create(&store, heat(RuleScope::country("Argentina")));
            assert!(store.delete(rule.id).is_ok());
            assert!(store.get(rule.id).is_none());
            assert!(!store.snapshot().contains(rule.id));
            assert!(store.get_applicable(&rosario(), Utc::now()).is_empty());
            assert!(matches!(store.delete(rule.id), Err(AlertError::RuleNotFound { .. })));
        }
    }

    mod applicable_tests {
        use super::*;

        #[test]
        fn inactive_rules_are_not_applicable() {
            let store = RuleStore::new();
            let rule = create(&store, heat(RuleScope::country("Argentina")));
            assert_eq!(store.get_applicable(&rosario(), Utc::now()).len(), 1);
            assert!(store.set_status(rule.id, RuleStatus::Inactive).is_ok());
            assert!(store.get_applicable(&rosario(), Utc::now()).is_empty());
        }

        #[test]
        fn validity_window_is_checked_at_read_time() {
            let store = RuleStore::new();
            create(
                &store,
                heat(RuleScope::country("Argentina"))
                    .window(ValidityWindow::between(ts(2025, 6, 1), ts(2025, 9, 30))),
            );
            assert!(store.get_applicable(&rosario(), ts(2025, 3, 1)).is_empty());
            assert_eq!(store.get_applicable(&rosario(), ts(2025, 7, 15)).len(), 1);
        }

        #[test]
        fn applicable_rules_ordered_by_priority() {
            let store = RuleStore::new();
            let low = create(&store, heat(RuleScope::country("Argentina")));
            let high = create(
                &store,
                heat(RuleScope::city("Argentina", "Rosario")).priority(Priority::CRITICAL),
            );
            let got: Vec<RuleId> = store
                .get_applicable(&rosario(), Utc::now())
                .iter()
                .map(|r| r.id)
                .collect();
            assert_eq!(got, vec![high.id, low.id]);
        }
    }

    mod list_tests {
        use super::*;

        #[test]
        fn list_filters_by_status_country_and_city() {
            let store = RuleStore::new();
            let ar = create(&store, heat(RuleScope::country("Argentina")));
            let city = create(&store, heat(RuleScope::city("Argentina", "Rosario")));
            let cl = create(&store, heat(RuleScope::country("Chile")));
            assert!(store.set_status(cl.id, RuleStatus::Inactive).is_ok());

            let all = store.list(&RuleFilter::new(), Page::default());
            assert_eq!(all.len(), 3);

            let active = store.list(&RuleFilter::new().with_status(RuleStatus::Active), Page::default());
            assert_eq!(active.len(), 2);

            let argentina = store.list(&RuleFilter::new().with_country("argentina"), Page::default());
            let mut got: Vec<RuleId> = argentina.iter().map(|r| r.id).collect();
            got.sort();
            let mut want = vec![ar.id, city.id];
            want.sort();
            assert_eq!(got, want);

            let rosario = store.list(&RuleFilter::new().with_city("Rosario"), Page::default());
            assert_eq!(rosario.len(), 1);
            assert_eq!(rosario[0].id, city.id);
        }

        #[test]
        fn list_paginates_stably() {
            let store = RuleStore::new();
            for _ in 0..7 {
                create(&store, heat(RuleScope::country("Argentina")));
            }
            let all = store.list(&RuleFilter::new(), Page::default());
            let first = store.list(&RuleFilter::new(), Page::new(0, 3));
            let second = store.list(&RuleFilter::new(), Page::new(3, 3));
            let third = store.list(&RuleFilter::new(), Page::new(6, 3));
            assert_eq!(first.len(), 3);
            assert_eq!(second.len(), 3);
            assert_eq!(third.len(), 1);

            let paged: Vec<RuleId> = first
                .iter()
                .chain(&second)
                .chain(&third)
                .map(|r| r.id)
                .collect();
            let whole: Vec<RuleId> = all.iter().map(|r| r.id).collect();
            assert_eq!(paged, whole);
        }

        #[test]
        fn summary_counts_statuses() {
            let store = RuleStore::new();
            let a = create(&store, heat(RuleScope::country("Argentina")));
            create(&store, heat(RuleScope::country("Chile")));
            assert!(store.set_status(a.id, RuleStatus::Inactive).is_ok());
            assert_eq!(
                store.summary(),
                RuleSummary {
                    total: 2,
                    active: 1,
                    inactive: 1
                }
            );
        }
    }

    mod snapshot_tests {
        use super::*;

        #[test]
        fn snapshot_survives_reopen() {
            let dir = tempfile::tempdir().expect("dir");
            let path = dir.path().join("rules.json");

            let (kept, deleted) = {
                let store = RuleStore::open(&path).expect("store");
                let kept = create(&store, heat(RuleScope::city("Argentina", "Rosario")));
                let deleted = create(&store, heat(RuleScope::country("Chile")));
                assert!(store.delete(deleted.id).is_ok());
                (kept, deleted)
            };

            let store = RuleStore::open(&path).expect("reopened");
            assert_eq!(store.len(), 1);
            assert_eq!(store.get(kept.id), Some(kept));
            assert!(store.get(deleted.id).is_none());
            assert_eq!(store.get_applicable(&rosario(), Utc::now()).len(), 1);
        }

        #[test]
        fn corrupt_snapshot_is_an_error() {
            let dir = tempfile::tempdir().expect("dir");
            let path = dir.path().join("rules.json");
            assert!(fs::write(&path, "not json").is_ok());
            assert!(RuleStore::open(&path).is_err());
        }
    }
}
