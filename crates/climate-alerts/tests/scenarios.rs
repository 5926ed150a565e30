//! End-to-end scenarios through the public engine API.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use climate_alerts::{
    AlertEngine, AlertFilter, AlertKind, AlertState, BoundKind, EngineConfig, Location,
    Measurement, Priority, Rule, RuleDraft, RuleScope, RuleStatus, ValidityWindow,
};
use futures::StreamExt;

fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
        .single()
        .expect("valid date")
}

fn create(engine: &AlertEngine, draft: RuleDraft) -> Rule {
    engine
        .create_rule(draft, "admin@example.com")
        .expect("rule should be valid")
}

fn buenos_aires_heat() -> RuleDraft {
    RuleDraft::new("Heat wave", RuleScope::city("Argentina", "Buenos Aires"))
        .description("Extreme summer temperatures")
        .temperature_max(35.0)
        .priority(Priority::new(4).expect("valid priority"))
        .status(RuleStatus::Active)
}

fn buenos_aires(sensor: &str, at: DateTime<Utc>) -> Measurement {
    Measurement::new(
        sensor,
        at,
        Location::country("Argentina").with_city("Buenos Aires"),
    )
}

#[test]
fn scenario_hot_reading_fires_threshold_alert() {
    let engine = AlertEngine::in_memory();
    let rule = create(&engine, buenos_aires_heat());

    let result = engine
        .evaluate_measurement(&buenos_aires("sensor-1", Utc::now()).with_temperature(38.5))
        .expect("evaluation succeeds");

    assert_eq!(result.fired.len(), 1);
    let alert = &result.fired[0];
    assert_eq!(alert.kind, AlertKind::Threshold);
    assert_eq!(alert.violated_bound, Some(BoundKind::TempMax));
    assert_eq!(alert.priority.get(), 4);
    assert_eq!(alert.measured_value, Some(38.5));
    assert_eq!(alert.bound_value, Some(35.0));
    assert_eq!(alert.rule_id, Some(rule.id));
    assert_eq!(alert.state, AlertState::Active);
    assert_eq!(engine.get_alert(alert.id).as_ref(), Some(alert));
}

#[test]
fn scenario_reading_within_bounds_is_quiet() {
    let engine = AlertEngine::in_memory();
    create(&engine, buenos_aires_heat());

    let result = engine
        .evaluate_measurement(&buenos_aires("sensor-1", Utc::now()).with_temperature(30.0))
        .expect("evaluation succeeds");

    assert!(result.is_quiet());
    assert_eq!(result.rules_matched, 1);
    assert_eq!(engine.alert_summary().total, 0);
}

#[test]
fn scenario_country_rule_covers_every_city() {
    let engine = AlertEngine::in_memory();
    create(
        &engine,
        RuleDraft::new("Humid country", RuleScope::country("Argentina")).humidity_min(90.0),
    );

    // 95% is above the minimum, so nothing fires ...
    let quiet = engine
        .evaluate_measurement(
            &Measurement::new("s-ros", Utc::now(), Location::country("Argentina").with_city("Rosario"))
                .with_humidity(95.0),
        )
        .expect("evaluation succeeds");
    assert_eq!(quiet.rules_matched, 1);
    assert!(quiet.is_quiet());

    // ... while a dry reading in the same city does
    let fired = engine
        .evaluate_measurement(
            &Measurement::new("s-ros", Utc::now(), Location::country("argentina").with_city("Rosario"))
                .with_humidity(40.0),
        )
        .expect("evaluation succeeds");
    assert_eq!(fired.fired.len(), 1);
    assert_eq!(fired.fired[0].violated_bound, Some(BoundKind::HumMin));
}

#[test]
fn scenario_country_rule_matches_any_city_with_max_bound() {
    let engine = AlertEngine::in_memory();
    create(
        &engine,
        RuleDraft::new("Very humid", RuleScope::country("Argentina")).humidity_max(90.0),
    );

    let result = engine
        .evaluate_measurement(
            &Measurement::new("s-ros", Utc::now(), Location::country("Argentina").with_city("Rosario"))
                .with_humidity(95.0),
        )
        .expect("evaluation succeeds");
    assert_eq!(result.fired.len(), 1);
    assert_eq!(result.fired[0].violated_bound, Some(BoundKind::HumMax));
}

#[test]
fn scenario_outside_validity_window_is_quiet() {
    let engine = AlertEngine::in_memory();
    create(
        &engine,
        buenos_aires_heat().window(ValidityWindow::between(ts(2025, 6, 1), ts(2025, 9, 30))),
    );

    let march = engine
        .evaluate_measurement(&buenos_aires("sensor-1", ts(2025, 3, 1)).with_temperature(40.0))
        .expect("evaluation succeeds");
    assert_eq!(march.rules_matched, 0);
    assert!(march.is_quiet());

    let july = engine
        .evaluate_measurement(&buenos_aires("sensor-1", ts(2025, 7, 1)).with_temperature(40.0))
        .expect("evaluation succeeds");
    assert_eq!(july.fired.len(), 1);
}

#[test]
fn scenario_consecutive_violations_fire_once() {
    let engine = AlertEngine::in_memory();
    create(&engine, buenos_aires_heat());

    let start = Utc::now();
    let first = engine
        .evaluate_measurement(&buenos_aires("sensor-1", start).with_temperature(38.0))
        .expect("evaluation succeeds");
    let second = engine
        .evaluate_measurement(
            &buenos_aires("sensor-1", start + Duration::seconds(5)).with_temperature(39.0),
        )
        .expect("evaluation succeeds");

    assert_eq!(first.fired.len(), 1);
    assert!(second.is_quiet());
    assert_eq!(second.suppressed, 1);
    assert_eq!(engine.alert_summary().total, 1);
}

#[test]
fn scenario_deactivation_stops_new_alerts_and_keeps_history() {
    let engine = AlertEngine::in_memory();
    let rule = create(&engine, buenos_aires_heat());

    let fired = engine
        .evaluate_measurement(&buenos_aires("sensor-1", Utc::now()).with_temperature(38.0))
        .expect("evaluation succeeds");
    assert_eq!(fired.fired.len(), 1);

    engine
        .set_rule_status(rule.id, RuleStatus::Inactive)
        .expect("rule exists");

    let after = engine
        .evaluate_measurement(&buenos_aires("sensor-2", Utc::now()).with_temperature(40.0))
        .expect("evaluation succeeds");
    assert_eq!(after.rules_matched, 0);
    assert!(after.is_quiet());

    let history = engine.list_alerts(&AlertFilter::new().with_rule(rule.id), Default::default());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, fired.fired[0].id);
}

#[test]
fn retried_evaluation_is_idempotent() {
    let engine = AlertEngine::in_memory();
    create(&engine, buenos_aires_heat());

    let reading = buenos_aires("sensor-1", Utc::now()).with_temperature(38.0);
    let first = engine.evaluate_measurement(&reading).expect("evaluation succeeds");
    let retry = engine.evaluate_measurement(&reading).expect("evaluation succeeds");

    assert_eq!(first.fired.len(), 1);
    assert!(retry.is_quiet());
    assert_eq!(engine.alert_summary().total, 1);
}

#[tokio::test]
async fn subscriber_sees_pair_alerts_in_measurement_order() {
    let engine = Arc::new(AlertEngine::in_memory());
    create(&engine, buenos_aires_heat());
    let mut feed = engine.subscribe(None).expect("subscribe");

    let t10 = Utc::now();
    let a1 = engine
        .evaluate_measurement(&buenos_aires("sensor-1", t10).with_temperature(38.0))
        .expect("evaluation succeeds");
    let a1 = a1.fired[0].clone();
    engine.resolve_alert(a1.id).expect("alert exists");

    let t20 = t10 + Duration::seconds(10);
    let a2 = engine
        .evaluate_measurement(&buenos_aires("sensor-1", t20).with_temperature(39.0))
        .expect("evaluation succeeds");
    let a2 = a2.fired[0].clone();

    let first = feed.next().await.expect("first alert");
    let second = feed.next().await.expect("second alert");
    assert_eq!(first.id, a1.id);
    assert_eq!(second.id, a2.id);
    assert!(first.measured_at < second.measured_at);
}

#[tokio::test]
async fn live_feed_is_filtered_and_concurrent_ingestion_is_safe() {
    let engine = Arc::new(AlertEngine::in_memory());
    create(&engine, buenos_aires_heat());
    let mut hot_sensor = engine
        .subscribe(Some(AlertFilter::new().with_sensor("sensor-3")))
        .expect("subscribe");

    let start = Utc::now();
    let mut tasks = Vec::new();
    for sensor in 0..8 {
        for tick in 0..5 {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                let m = buenos_aires(&format!("sensor-{sensor}"), start + Duration::seconds(tick))
                    .with_temperature(40.0);
                engine.evaluate_measurement(&m).map(|r| r.fired.len())
            }));
        }
    }

    let mut fired = 0;
    for task in tasks {
        fired += task.await.expect("task completes").expect("evaluation succeeds");
    }
    assert_eq!(fired, 8);
    assert_eq!(engine.alert_summary().active, 8);

    let only = hot_sensor.next().await.expect("alert for sensor-3");
    assert_eq!(only.sensor_id, "sensor-3");
    assert!(hot_sensor.try_recv().is_none());
}

#[test]
fn durable_engine_survives_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = EngineConfig::new()
        .with_alert_log(dir.path().join("alerts.jsonl"))
        .with_rule_snapshot(dir.path().join("rules.json"));

    let fired_id = {
        let engine = AlertEngine::new(config.clone()).expect("engine");
        create(&engine, buenos_aires_heat());
        let result = engine
            .evaluate_measurement(&buenos_aires("sensor-1", Utc::now()).with_temperature(38.0))
            .expect("evaluation succeeds");
        result.fired[0].id
    };

    let engine = AlertEngine::new(config).expect("engine");
    assert_eq!(engine.rule_summary().total, 1);
    assert_eq!(engine.get_alert(fired_id).map(|a| a.state), Some(AlertState::Active));

    // the open alert still suppresses after restart
    let again = engine
        .evaluate_measurement(&buenos_aires("sensor-1", Utc::now()).with_temperature(39.0))
        .expect("evaluation succeeds");
    assert!(again.is_quiet());
    assert_eq!(again.suppressed, 1);
}
