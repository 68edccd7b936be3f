//! Property-based tests for the arousal classifier.
//!
//! Whatever the window holds, the reading must stay within its documented
//! bounds and must not depend on the order events arrive in.

use chrono::{DateTime, Duration, TimeZone, Utc};
use luma_core::{ArousalBand, ArousalTrend, SignalEvent, SignalValues, StrategyConfig};
use luma_limbic::ArousalClassifier;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn arb_values() -> impl Strategy<Value = SignalValues> {
    (0.0f32..=10.0, 0.0f32..=10.0, 0.0f32..=10.0, 0.0f32..=10.0, 0.0f32..=10.0).prop_map(
        |(fusion, resistance, choice_access, shame_threat, connection)| SignalValues {
            fusion,
            resistance,
            choice_access,
            shame_threat,
            connection,
        },
    )
}

/// Events spread over the last hour, so some fall outside the default
/// 30-minute window.
fn arb_event() -> impl Strategy<Value = SignalEvent> {
    (0i64..3600, arb_values()).prop_map(|(secs_ago, values)| {
        SignalEvent::new("u1", "nc.1", now() - Duration::seconds(secs_ago), values).unwrap()
    })
}

fn arb_window() -> impl Strategy<Value = Vec<SignalEvent>> {
    prop::collection::vec(arb_event(), 0..40)
}

// ============================================================================
// Bounds
// ============================================================================

proptest! {
    /// **Core invariant**: confidence in [0, 1], composite in [0, 10], and
    /// confidence is zero whenever the window holds fewer than the minimum.
    #[test]
    fn reading_always_within_bounds(events in arb_window()) {
        let config = StrategyConfig::default();
        let reading = ArousalClassifier::new(&config).classify(&events, now());

        prop_assert!((0.0..=1.0).contains(&reading.confidence));
        prop_assert!((0.0..=10.0).contains(&reading.composite));
        if reading.signal_count < config.min_signals_for_confidence {
            prop_assert_eq!(reading.confidence, 0.0);
        } else {
            prop_assert!(reading.confidence > 0.0);
        }
    }

    #[test]
    fn only_windowed_events_count(events in arb_window()) {
        let reading = ArousalClassifier::default().classify(&events, now());
        let expected = events
            .iter()
            .filter(|e| e.timestamp() >= now() - Duration::minutes(30))
            .count();
        prop_assert_eq!(reading.signal_count, expected);
    }

    #[test]
    fn band_is_monotone_in_composite(a in 0.0f32..=10.0, b in 0.0f32..=10.0) {
        let c = ArousalClassifier::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(c.band_for(lo) <= c.band_for(hi));
    }
}

// ============================================================================
// Determinism
// ============================================================================

proptest! {
    #[test]
    fn input_order_does_not_matter(events in arb_window()) {
        let c = ArousalClassifier::default();
        let forward = c.classify(&events, now());
        let mut reversed = events.clone();
        reversed.reverse();
        let backward = c.classify(&reversed, now());

        prop_assert_eq!(forward.band, backward.band);
        prop_assert_eq!(forward.signal_count, backward.signal_count);
        prop_assert_eq!(forward.confidence, backward.confidence);
        prop_assert!((forward.composite - backward.composite).abs() < 1e-4);
    }

    #[test]
    fn constant_window_is_stable(values in arb_values(), n in 2usize..20) {
        let events: Vec<SignalEvent> = (0..n)
            .map(|i| SignalEvent::new("u1", "nc.1", now() - Duration::minutes(i as i64), values).unwrap())
            .collect();
        let reading = ArousalClassifier::default().classify(&events, now());
        prop_assert_eq!(reading.trend, ArousalTrend::Stable);
    }

    #[test]
    fn empty_window_is_green_unknown(offset in 31i64..600) {
        let values = SignalValues::default();
        let events = vec![
            SignalEvent::new("u1", "nc.1", now() - Duration::minutes(offset), values).unwrap(),
        ];
        let reading = ArousalClassifier::default().classify(&events, now());
        prop_assert_eq!(reading.band, ArousalBand::Green);
        prop_assert_eq!(reading.confidence, 0.0);
        prop_assert_eq!(reading.signal_count, 0);
    }
}
