//! Property-based tests for luma_core.
//!
//! Validation must accept every in-range event and reject every out-of-range
//! one, whatever the other fields hold.

use chrono::{DateTime, TimeZone, Utc};
use luma_core::{
    ArousalBand, Candidate, RawSignalEvent, ReadinessLayer, SignalError, SignalEvent, SignalKind,
    SignalValues, StrategyConfig, SubScoreKind, SubScoreWeights,
};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn arb_signal() -> impl Strategy<Value = f32> {
    0.0f32..=10.0
}

fn arb_values() -> impl Strategy<Value = SignalValues> {
    (arb_signal(), arb_signal(), arb_signal(), arb_signal(), arb_signal()).prop_map(
        |(fusion, resistance, choice_access, shame_threat, connection)| SignalValues {
            fusion,
            resistance,
            choice_access,
            shame_threat,
            connection,
        },
    )
}

fn arb_band() -> impl Strategy<Value = ArousalBand> {
    prop_oneof![
        Just(ArousalBand::Green),
        Just(ArousalBand::Amber),
        Just(ArousalBand::Red),
    ]
}

fn arb_weights() -> impl Strategy<Value = SubScoreWeights> {
    (0.01f32..=1.0, 0.0f32..=1.0, 0.0f32..=1.0, 0.0f32..=1.0, 0.0f32..=1.0).prop_map(
        |(heat_fit, readiness_fit, family_effectiveness, novelty, rotation_urgency)| {
            SubScoreWeights {
                heat_fit,
                readiness_fit,
                family_effectiveness,
                novelty,
                rotation_urgency,
            }
        },
    )
}

/// Finite values outside [0, 10], plus the non-finite ones.
fn arb_out_of_range() -> impl Strategy<Value = f32> {
    prop_oneof![
        -1000.0f32..-0.001,
        10.001f32..1000.0,
        Just(f32::NAN),
        Just(f32::INFINITY),
        Just(f32::NEG_INFINITY),
    ]
}

fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn raw_from(values: SignalValues) -> RawSignalEvent {
    RawSignalEvent {
        user_id: Some("u1".to_string()),
        intervention_id: Some("nc.1".to_string()),
        timestamp: Some(ts()),
        fusion: Some(values.fusion),
        resistance: Some(values.resistance),
        choice_access: Some(values.choice_access),
        shame_threat: Some(values.shame_threat),
        connection: Some(values.connection),
    }
}

// ============================================================================
// Signal validation
// ============================================================================

proptest! {
    #[test]
    fn in_range_events_always_validate(values in arb_values()) {
        let event = SignalEvent::try_from(raw_from(values)).unwrap();
        prop_assert_eq!(*event.signals(), values);
    }

    #[test]
    fn out_of_range_signal_is_rejected_and_named(
        values in arb_values(),
        bad in arb_out_of_range(),
        idx in 0usize..5,
    ) {
        let kind = SignalKind::ALL[idx];
        let mut raw = raw_from(values);
        let slot = match kind {
            SignalKind::Fusion => &mut raw.fusion,
            SignalKind::Resistance => &mut raw.resistance,
            SignalKind::ChoiceAccess => &mut raw.choice_access,
            SignalKind::ShameThreat => &mut raw.shame_threat,
            SignalKind::Connection => &mut raw.connection,
        };
        *slot = Some(bad);
        match raw.validate() {
            Err(SignalError::InvalidSignalRange { signal, .. }) => prop_assert_eq!(signal, kind),
            other => prop_assert!(false, "expected range error, got {:?}", other),
        }
    }

    #[test]
    fn missing_signal_is_rejected(values in arb_values(), idx in 0usize..5) {
        let kind = SignalKind::ALL[idx];
        let mut raw = raw_from(values);
        match kind {
            SignalKind::Fusion => raw.fusion = None,
            SignalKind::Resistance => raw.resistance = None,
            SignalKind::ChoiceAccess => raw.choice_access = None,
            SignalKind::ShameThreat => raw.shame_threat = None,
            SignalKind::Connection => raw.connection = None,
        }
        prop_assert_eq!(raw.validate(), Err(SignalError::MissingField(kind.as_str())));
    }

    #[test]
    fn mean_stays_within_scale(all in prop::collection::vec(arb_values(), 1..30)) {
        let mean = SignalValues::mean(all.iter()).unwrap();
        for kind in SignalKind::ALL {
            let v = mean.get(kind);
            prop_assert!((0.0..=10.0).contains(&v), "{} mean out of range: {}", kind, v);
        }
    }
}

// ============================================================================
// Config
// ============================================================================

proptest! {
    #[test]
    fn normalized_weights_sum_to_one(
        weights in arb_weights(),
        idx in 0usize..5,
        factor in 1.0f32..3.0,
    ) {
        let w = weights.emphasize(SubScoreKind::ALL[idx], factor).normalized();
        let total: f32 = SubScoreKind::ALL.iter().map(|k| w.get(*k)).sum();
        prop_assert!((total - 1.0).abs() < 1e-4, "sum = {}", total);
        for kind in SubScoreKind::ALL {
            prop_assert!(w.get(kind) >= 0.0);
        }
    }

    #[test]
    fn weights_for_every_band_are_valid(band in arb_band()) {
        let cfg = StrategyConfig::default();
        let w = cfg.weights_for(band).normalized();
        let total: f32 = SubScoreKind::ALL.iter().map(|k| w.get(*k)).sum();
        prop_assert!((total - 1.0).abs() < 1e-4);
    }
}

// ============================================================================
// Safety tolerance
// ============================================================================

proptest! {
    /// A candidate is tolerated exactly when the user's band is no more
    /// severe than the candidate's safety band.
    #[test]
    fn tolerance_matches_band_order(state in arb_band(), safety in arb_band()) {
        let c = Candidate::new("nc.1", "shame", "grip_scan", ReadinessLayer::Knowing, safety);
        prop_assert_eq!(c.tolerates(state), state <= safety);
    }
}
