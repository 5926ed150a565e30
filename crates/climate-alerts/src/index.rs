//! Scope index for fast rule lookups.
//!
//! This module provides:
//! - [`ScopeIndex`] - the derived, in-memory index the rule store keeps current
//! - [`ScopeSnapshot`] - an immutable view readers evaluate against
//!
//! Three layers map normalised location keys to rule IDs: by country, by
//! (country, region) and by (country, city). A rule lives in exactly one
//! layer, chosen by its scope level. Writers build a new snapshot and swap
//! it in; readers only clone an `Arc`, so a mutation never stalls evaluation
//! beyond that swap.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::rule::{Rule, RuleScope};
use crate::types::{Location, RuleId, normalize};

type PairKey = (String, String);

/// An immutable, internally consistent view of the indexed rules.
#[derive(Debug, Clone, Default)]
pub struct ScopeSnapshot {
    version: u64,
    rules: HashMap<RuleId, Arc<Rule>>,
    by_country: HashMap<String, Vec<RuleId>>,
    by_region: HashMap<PairKey, Vec<RuleId>>,
    by_city: HashMap<PairKey, Vec<RuleId>>,
}

impl ScopeSnapshot {
    /// Monotonic version, bumped by every applied mutation.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Number of indexed rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rule is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns true if the rule is present in this snapshot.
    #[must_use]
    pub fn contains(&self, id: RuleId) -> bool {
        self.rules.contains_key(&id)
    }

    /// Gets an indexed rule.
    #[must_use]
    pub fn get(&self, id: RuleId) -> Option<Arc<Rule>> {
        self.rules.get(&id).cloned()
    }

    /// Rules whose scope could cover `location`, regardless of status or validity.
    ///
    /// Unions the country layer with the region and city layers for the
    /// location's own region and city.
    #[must_use]
    pub fn candidates(&self, location: &Location) -> Vec<Arc<Rule>> {
        let country = normalize(&location.country);
        if country.is_empty() {
            return Vec::new();
        }

        let mut ids: Vec<RuleId> = Vec::new();
        if let Some(found) = self.by_country.get(&country) {
            ids.extend(found);
        }
        if let Some(region) = location.region.as_deref().map(normalize) {
            if let Some(found) = self.by_region.get(&(country.clone(), region)) {
                ids.extend(found);
            }
        }
        if let Some(city) = location.city.as_deref().map(normalize) {
            if let Some(found) = self.by_city.get(&(country, city)) {
                ids.extend(found);
            }
        }

        ids.iter().filter_map(|id| self.rules.get(id).cloned()).collect()
    }

    fn insert(&mut self, rule: Arc<Rule>) {
        let id = rule.id;
        match &rule.scope {
            RuleScope::Country { country } => {
                self.by_country.entry(normalize(country)).or_default().push(id);
            }
            RuleScope::Region { country, region } => {
                self.by_region
                    .entry((normalize(country), normalize(region)))
                    .or_default()
                    .push(id);
            }
            RuleScope::City { country, city } => {
                self.by_city
                    .entry((normalize(country), normalize(city)))
                    .or_default()
                    .push(id);
            }
        }
        self.rules.insert(id, rule);
    }

    fn remove(&mut self, id: RuleId) -> bool {
        let Some(rule) = self.rules.remove(&id) else {
            return false;
        };
        match &rule.scope {
            RuleScope::Country { country } => {
                Self::remove_from(&mut self.by_country, &normalize(country), id);
            }
            RuleScope::Region { country, region } => {
                Self::remove_from(&mut self.by_region, &(normalize(country), normalize(region)), id);
            }
            RuleScope::City { country, city } => {
                Self::remove_from(&mut self.by_city, &(normalize(country), normalize(city)), id);
            }
        }
        true
    }

    fn remove_from<K>(layer: &mut HashMap<K, Vec<RuleId>>, key: &K, id: RuleId)
    where
        K: std::hash::Hash + Eq,
    {
        let now_empty = layer.get_mut(key).is_some_and(|ids| {
            ids.retain(|i| *i != id);
            ids.is_empty()
        });
        if now_empty {
            layer.remove(key);
        }
    }

    /// Total keys across all three layers.
    fn key_count(&self) -> usize {
        self.by_country.len() + self.by_region.len() + self.by_city.len()
    }
}

/// Copy-on-write scope index.
///
/// Reads take the latest snapshot; writes are serialized among themselves
/// and become visible atomically once [`ScopeIndex::upsert`],
/// [`ScopeIndex::remove`] or [`ScopeIndex::rebuild`] returns.
#[derive(Debug, Default)]
pub struct ScopeIndex {
    current: RwLock<Arc<ScopeSnapshot>>,
    writer: Mutex<()>,
}

impl ScopeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ScopeSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Inserts or replaces a rule.
    pub fn upsert(&self, rule: Rule) {
        let id = rule.id;
        self.apply(|next| {
            next.remove(id);
            next.insert(Arc::new(rule));
        });
    }

    /// Removes a rule. Returns true if it was indexed.
    pub fn remove(&self, id: RuleId) -> bool {
        let mut removed = false;
        self.apply(|next| removed = next.remove(id));
        removed
    }

    /// Replaces the whole index with the given rules.
    pub fn rebuild<I>(&self, rules: I)
    where
        I: IntoIterator<Item = Rule>,
    {
        self.apply(|next| {
            let version = next.version;
            *next = ScopeSnapshot {
                version,
                ..ScopeSnapshot::default()
            };
            for rule in rules {
                next.insert(Arc::new(rule));
            }
        });
    }

    /// Number of indexed rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Returns true if no rule is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    #[allow(clippy::significant_drop_tightening)]
    fn apply<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ScopeSnapshot),
    {
        let _guard = self.writer.lock();
        let mut next = ScopeSnapshot::clone(&self.snapshot());
        mutate(&mut next);
        next.version += 1;
        debug!(
            version = next.version,
            rules = next.len(),
            keys = next.key_count(),
            "swapping scope index snapshot"
        );
        *self.current.write() = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleDraft;
    use chrono::Utc;

    fn rule(name: &str, scope: RuleScope) -> Rule {
        match Rule::from_draft(RuleDraft::new(name, scope).temperature_max(30.0), "admin", Utc::now()) {
            Ok(r) => r,
            Err(e) => panic!("test rule should be valid: {e}"),
        }
    }

    fn ids(rules: &[Arc<Rule>]) -> Vec<RuleId> {
        let mut ids: Vec<RuleId> = rules.iter().map(|r| r.id).collect();
        ids.sort();
        ids
    }

    fn sorted(mut v: Vec<RuleId>) -> Vec<RuleId> {
        v.sort();
        v
    }

    #[test]
    fn empty_index_has_no_candidates() {
        let index = ScopeIndex::new();
        assert!(index.is_empty());
        assert!(index.snapshot().candidates(&Location::country("Argentina")).is_empty());
    }

    #[test]
    fn layers_are_unioned_for_a_location() {
        let index = ScopeIndex::new();
        let country = rule("Country wide", RuleScope::country("Argentina"));
        let region = rule("Pampa region", RuleScope::region("Argentina", "Pampa"));
        let city = rule("Rosario city", RuleScope::city("Argentina", "Rosario"));
        let other_city = rule("Cordoba city", RuleScope::city("Argentina", "Cordoba"));
        let other_country = rule("Chile wide", RuleScope::country("Chile"));
        for r in [&country, &region, &city, &other_city, &other_country] {
            index.upsert(r.clone());
        }

        let snap = index.snapshot();
        let loc = Location::country("Argentina")
            .with_region("Pampa")
            .with_city("Rosario");
        assert_eq!(ids(&snap.candidates(&loc)), sorted(vec![country.id, region.id, city.id]));

        // Without a region the region layer is not consulted.
        let loc = Location::country("Argentina").with_city("Rosario");
        assert_eq!(ids(&snap.candidates(&loc)), sorted(vec![country.id, city.id]));

        let loc = Location::country("Argentina").with_city("Mendoza");
        assert_eq!(ids(&snap.candidates(&loc)), vec![country.id]);
    }

    #[test]
    fn keys_are_normalised() {
        let index = ScopeIndex::new();
        let city = rule("Spaced city", RuleScope::city(" ARGENTINA ", "Buenos  Aires"));
        index.upsert(city.clone());

        let snap = index.snapshot();
        let hit = Location::country("argentina").with_city("buenos  aires ");
        assert_eq!(ids(&snap.candidates(&hit)), vec![city.id]);
    }

    #[test]
    fn city_with_same_name_in_other_country_is_not_matched() {
        let index = ScopeIndex::new();
        let r = rule("Cordoba AR", RuleScope::city("Argentina", "Cordoba"));
        index.upsert(r);
        let loc = Location::country("Spain").with_city("Cordoba");
        assert!(index.snapshot().candidates(&loc).is_empty());
    }

    #[test]
    fn upsert_moves_rule_between_layers() {
        let index = ScopeIndex::new();
        let mut r = rule("Moving rule", RuleScope::city("Argentina", "Rosario"));
        index.upsert(r.clone());

        r.scope = RuleScope::city("Argentina", "Cordoba");
        index.upsert(r.clone());

        let snap = index.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap
            .candidates(&Location::country("Argentina").with_city("Rosario"))
            .is_empty());
        assert_eq!(
            ids(&snap.candidates(&Location::country("Argentina").with_city("Cordoba"))),
            vec![r.id]
        );
    }

    #[test]
    fn remove_drops_rule_and_empty_keys() {
        let index = ScopeIndex::new();
        let r = rule("Removable", RuleScope::region("Argentina", "Cuyo"));
        index.upsert(r.clone());
        assert!(index.remove(r.id));
        assert!(!index.remove(r.id));

        let snap = index.snapshot();
        assert!(!snap.contains(r.id));
        assert_eq!(snap.key_count(), 0);
    }

    #[test]
    fn old_snapshots_are_unaffected_by_writes() {
        let index = ScopeIndex::new();
        let r = rule("Snapshot rule", RuleScope::country("Argentina"));
        index.upsert(r.clone());

        let before = index.snapshot();
        assert!(index.remove(r.id));
        let after = index.snapshot();

        assert!(before.contains(r.id));
        assert!(!after.contains(r.id));
        assert!(after.version() > before.version());
    }

    #[test]
    fn rebuild_replaces_contents() {
        let index = ScopeIndex::new();
        let a = rule("Rule A", RuleScope::country("Argentina"));
        let b = rule("Rule B", RuleScope::country("Chile"));
        index.upsert(a.clone());

        index.rebuild(vec![b.clone()]);
        let snap = index.snapshot();
        assert!(!snap.contains(a.id));
        assert!(snap.contains(b.id));
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn concurrent_readers_see_consistent_snapshots() {
        let index = Arc::new(ScopeIndex::new());
        let loc = Location::country("Argentina");
        let writer = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let r = rule(&format!("Rule {i}"), RuleScope::country("Argentina"));
                    let id = r.id;
                    index.upsert(r);
                    if i % 2 == 0 {
                        index.remove(id);
                    }
                }
            })
        };

        for _ in 0..200 {
            let snap = index.snapshot();
            // every candidate id resolves inside the same snapshot
            let candidates = snap.candidates(&loc);
            assert!(candidates.len() <= snap.len());
            assert!(candidates.iter().all(|r| snap.contains(r.id)));
        }
        assert!(writer.join().is_ok());
        assert_eq!(index.len(), 100);
    }
}
