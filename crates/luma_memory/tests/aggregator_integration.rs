//! Integration tests for StateAggregator
//!
//! Runs against the in-memory store, wrapped in FaultyTelemetry where a test
//! needs a rollup to fail or stall. Timeouts run on paused tokio time.

use chrono::{DateTime, Duration, TimeZone, Utc};
use luma_core::{
    ArousalBand, DeficitKind, LumaError, ReadinessLayer, Rollup, RollupKind, SignalEvent,
    SignalValues, StrategyConfig, TelemetryStore,
};
use luma_memory::{
    Fault, FaultyTelemetry, InMemoryTelemetry, InteractionRecord, ServeRecord, SessionFixture,
    StateAggregator,
};
use std::io::Write;
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn flooded() -> SignalValues {
    SignalValues {
        fusion: 5.0,
        resistance: 7.0,
        choice_access: 5.0,
        shame_threat: 8.0,
        connection: 1.0,
    }
}

fn record(minutes_ago: i64, values: SignalValues) -> InteractionRecord {
    InteractionRecord {
        event: SignalEvent::new("u1", "nc.1", now() - Duration::minutes(minutes_ago), values).unwrap(),
        topic: "shame".to_string(),
        family: "grip_scan".to_string(),
        lens: Some("witness".to_string()),
        process: None,
        layer: ReadinessLayer::Knowing,
        completed: true,
        hesitation_ms: 1_500,
    }
}

async fn seeded_store() -> Arc<InMemoryTelemetry> {
    let store = Arc::new(InMemoryTelemetry::new());
    store.pin_clock(now()).await;
    for i in 0..3 {
        store.record_interaction(record(5 + i * 5, flooded())).await;
    }
    store
        .record_serve(ServeRecord {
            user_id: "u1".to_string(),
            intervention_id: "nc.1".to_string(),
            family: "grip_scan".to_string(),
            topic: "shame".to_string(),
            served_at: now() - Duration::minutes(5),
        })
        .await;
    store
}

async fn faulty(fault_on: RollupKind, fault: Fault) -> Arc<FaultyTelemetry<InMemoryTelemetry>> {
    let store = Arc::new(FaultyTelemetry::new(seeded_store().await));
    store.inject(fault_on, fault).await;
    store
}

fn aggregator<S: TelemetryStore + ?Sized>(store: Arc<S>) -> StateAggregator<S> {
    StateAggregator::with_timeout(store, std::time::Duration::from_millis(200))
}

/// Test 1: A user with no history gets a cold-start state, not an error
#[tokio::test]
async fn test_cold_start_user() {
    let store = Arc::new(InMemoryTelemetry::new());
    store.pin_clock(now()).await;

    let state = aggregator(store)
        .compute("new_user", &StrategyConfig::default(), now())
        .await
        .unwrap();

    assert!(state.topic_heat.is_empty());
    assert!(state.readiness.is_empty());
    assert_eq!(state.family_effectiveness, Rollup::ColdStart);
    assert_eq!(state.lens_effectiveness, Rollup::ColdStart);
    assert_eq!(state.arousal.band, ArousalBand::Green);
    assert_eq!(state.arousal.confidence, 0.0);
    assert_eq!(state.computed_at, now());
}

/// Test 2: Rollups and arousal flow into the state unchanged
#[tokio::test]
async fn test_populated_state() {
    let state = aggregator(seeded_store().await)
        .compute("u1", &StrategyConfig::default(), now())
        .await
        .unwrap();

    assert_eq!(state.arousal.band, ArousalBand::Red);
    assert!(state.arousal.confidence > 0.0);
    assert_eq!(state.topic_heat.len(), 1);
    assert_eq!(state.readiness[0].layer, ReadinessLayer::Knowing);
    assert!(state.family_effectiveness.find("grip_scan").is_some());
    assert!(state.lens_effectiveness.find("witness").is_some());
    assert_eq!(state.process_effectiveness, Rollup::ColdStart);
    assert_eq!(state.recent_serves.len(), 1);
    assert_eq!(state.last_served("nc.1"), Some(now() - Duration::minutes(5)));
}

/// Test 3: A failing required rollup aborts and names its source
#[tokio::test]
async fn test_required_failure_is_fatal() {
    let store = faulty(RollupKind::TopicHeat, Fault::Fail("connection reset".into())).await;
    let err = aggregator(store)
        .compute("u1", &StrategyConfig::default(), now())
        .await
        .unwrap_err();

    assert_eq!(err.failed_rollup(), Some(RollupKind::TopicHeat));
    assert!(err.to_string().contains("connection reset"), "got: {}", err);
}

/// Test 4: A stalled required rollup times out instead of hanging
#[tokio::test(start_paused = true)]
async fn test_required_timeout_is_fatal() {
    let store = faulty(
        RollupKind::RecentServes,
        Fault::Delay(std::time::Duration::from_secs(30)),
    )
    .await;
    let err = aggregator(store)
        .compute("u1", &StrategyConfig::default(), now())
        .await
        .unwrap_err();

    match err {
        LumaError::StateComputation { rollup, reason } => {
            assert_eq!(rollup, RollupKind::RecentServes);
            assert!(reason.contains("timed out"), "got: {}", reason);
        }
        other => panic!("expected StateComputation, got {:?}", other),
    }
}

/// Test 5: Optional rollups degrade rather than fail the call
#[tokio::test(start_paused = true)]
async fn test_optional_failures_degrade() {
    let store = faulty(RollupKind::LensEffectiveness, Fault::Fail("boom".into())).await;
    store
        .inject(
            RollupKind::FamilyEffectiveness,
            Fault::Delay(std::time::Duration::from_secs(30)),
        )
        .await;
    store
        .inject(RollupKind::RotationDeficits, Fault::Fail("boom".into()))
        .await;

    let state = aggregator(store)
        .compute("u1", &StrategyConfig::default(), now())
        .await
        .unwrap();

    assert!(state.lens_effectiveness.is_degraded());
    assert!(state.family_effectiveness.is_degraded());
    assert_eq!(state.process_effectiveness, Rollup::ColdStart);
    assert!(state.rotation_deficits.is_empty());
    // Required data still present
    assert_eq!(state.topic_heat.len(), 1);
}

/// Test 5b: Clearing a fault restores the rollup on the next compute
#[tokio::test]
async fn test_cleared_fault_recovers() {
    let store = faulty(RollupKind::TopicHeat, Fault::Fail("connection reset".into())).await;
    let agg = aggregator(store.clone());
    let config = StrategyConfig::default();
    assert!(agg.compute("u1", &config, now()).await.is_err());

    store.clear(RollupKind::TopicHeat).await;
    let state = agg.compute("u1", &config, now()).await.unwrap();
    assert_eq!(state.topic_heat.len(), 1);

    store.inject(RollupKind::Readiness, Fault::Fail("gone".into())).await;
    store.inject(RollupKind::LensEffectiveness, Fault::Fail("gone".into())).await;
    assert!(agg.compute("u1", &config, now()).await.is_err());

    store.clear_all().await;
    let state = agg.compute("u1", &config, now()).await.unwrap();
    assert!(!state.lens_effectiveness.is_degraded());
}

/// Test 6: Slow-but-in-time reads do not change the result
#[tokio::test(start_paused = true)]
async fn test_completion_order_irrelevant() {
    let baseline = aggregator(seeded_store().await)
        .compute("u1", &StrategyConfig::default(), now())
        .await
        .unwrap();

    let store = faulty(
        RollupKind::SignalWindow,
        Fault::Delay(std::time::Duration::from_millis(150)),
    )
    .await;
    store
        .inject(
            RollupKind::Readiness,
            Fault::Delay(std::time::Duration::from_millis(50)),
        )
        .await;
    let delayed = aggregator(store)
        .compute("u1", &StrategyConfig::default(), now())
        .await
        .unwrap();

    assert_eq!(baseline, delayed);
}

/// Test 7: A fixture on disk replays into a usable state
#[tokio::test]
async fn test_fixture_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "now": "2026-03-01T12:00:00Z",
            "catalog": [
                {{ "id": "nc.1", "topic": "shame", "target_layer": "knowing",
                   "safety_band": "red", "family": "grip_scan" }},
                {{ "id": "nc.2", "topic": "shame", "target_layer": "knowing",
                   "safety_band": "green", "family": "sangha_ping" }}
            ],
            "serves": [
                {{ "user_id": "u1", "intervention_id": "nc.1", "family": "grip_scan",
                   "topic": "shame", "served_at": "2026-03-01T11:00:00Z" }}
            ]
        }}"#
    )
    .unwrap();

    let fixture = SessionFixture::load(file.path()).unwrap();
    let store = Arc::new(fixture.to_store().await);
    let state = aggregator(store)
        .compute("u1", &StrategyConfig::default(), fixture.now)
        .await
        .unwrap();

    assert_eq!(state.recent_serves.len(), 0, "served an hour ago is outside the window");
    assert_eq!(state.deficit_urgency(DeficitKind::Family, "sangha_ping"), 1.0);
    assert_eq!(state.deficit_urgency(DeficitKind::Family, "grip_scan"), 0.0);
}
