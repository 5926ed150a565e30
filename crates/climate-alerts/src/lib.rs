//! # climate-alerts
//!
//! Rule-scoped threshold alerting for climate sensor networks.
//!
//! Administrators define [`Rule`]s that bound temperature and humidity for a
//! country, region, or city, optionally within a validity window. Every
//! incoming [`Measurement`] is checked against the rules that apply to its
//! location; violations become [`Alert`]s that are persisted once per
//! episode and pushed live to every subscriber.
//!
//! This crate provides:
//!
//! - [`RuleStore`] - rule CRUD with a derived [`ScopeIndex`] for sublinear lookups
//! - [`evaluate`] - the pure threshold check of one measurement against one rule
//! - [`policy`] - one alert per rule and measurement, one open alert per rule and sensor
//! - [`AlertSink`] - per-pair serialised, deduplicating persistence
//! - [`MemoryAlertStore`] / [`FileAlertStore`] - alert storage backends behind [`AlertStore`]
//! - [`DisseminationBus`] - live fan-out with bounded per-subscriber buffers
//! - [`AlertEngine`] - the facade tying it all together
//!
//! ## Example
//!
//! ```rust
//! use climate_alerts::{AlertEngine, Location, Measurement, RuleDraft, RuleScope};
//! use chrono::Utc;
//!
//! # fn main() -> climate_alerts::Result<()> {
//! let engine = AlertEngine::in_memory();
//!
//! engine.create_rule(
//!     RuleDraft::new("Heat wave", RuleScope::city("Argentina", "Buenos Aires"))
//!         .temperature_max(35.0),
//!     "admin@example.com",
//! )?;
//!
//! let mut feed = engine.subscribe(None)?;
//!
//! let reading = Measurement::new(
//!     "sensor-42",
//!     Utc::now(),
//!     Location::country("Argentina").with_city("Buenos Aires"),
//! )
//! .with_temperature(38.5);
//!
//! let result = engine.evaluate_measurement(&reading)?;
//! assert_eq!(result.fired.len(), 1);
//! assert_eq!(feed.try_recv().map(|a| a.id), result.primary().map(|a| a.id));
//!
//! // a sustained breach does not open a second alert
//! let again = engine.evaluate_measurement(&reading.clone().with_temperature(39.0))?;
//! assert!(again.is_quiet());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alert;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod file_store;
pub mod index;
pub mod policy;
pub mod rule;
pub mod rules;
pub mod sink;
pub mod store;
pub mod types;


// Re-export main types at crate root
pub use alert::{Alert, AlertDraft, AlertFilter, AlertKind, AlertState, AlertSummary, EpisodeKey};
pub use bus::{AlertSubscription, DisseminationBus};
pub use config::EngineConfig;
pub use engine::{AlertEngine, EvaluationResult};
pub use error::{AlertError, Result};
pub use evaluator::{BoundKind, Violation, evaluate, most_severe};
pub use file_store::FileAlertStore;
pub use index::{ScopeIndex, ScopeSnapshot};
pub use policy::{Admission, admit, draft_alert};
pub use rule::{Rule, RuleDraft, RulePatch, RuleScope, RuleStatus, Thresholds, ValidityWindow};
pub use rules::{RuleFilter, RuleStore, RuleSummary};
pub use sink::{AlertSink, PersistOutcome};
pub use store::{AlertStore, MemoryAlertStore};
pub use types::{AlertId, Location, Measurement, Page, Priority, RuleId};
