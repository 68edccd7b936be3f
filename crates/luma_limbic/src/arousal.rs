//! Arousal classification over a sliding window of signal events.
//!
//! The composite activation score folds the five signals into one 0-10
//! number. `shame_threat`, `resistance` and `fusion` push it up; `choice_access`
//! and `connection` pull it down (they enter inverted as `10 - v`).

use chrono::{DateTime, Duration, Utc};
use luma_core::config::{ActivationWeights, ArousalThresholds, StrategyConfig};
use luma_core::signal::{SignalEvent, SignalKind, SignalValues, SIGNAL_MAX, SIGNAL_MIN};
use luma_core::state::{ArousalBand, ArousalReading, ArousalTrend};

/// Classifies a user's recent signal window into a band, trend and confidence.
#[derive(Debug, Clone)]
pub struct ArousalClassifier {
    thresholds: ArousalThresholds,
    weights: ActivationWeights,
    trend_epsilon: f32,
    min_signals: usize,
    saturation: usize,
    lookback: Duration,
}

impl Default for ArousalClassifier {
    fn default() -> Self {
        Self::new(&StrategyConfig::default())
    }
}

impl ArousalClassifier {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            thresholds: config.arousal_thresholds,
            weights: config.activation_weights,
            trend_epsilon: config.trend_epsilon,
            min_signals: config.min_signals_for_confidence,
            saturation: config.confidence_saturation.max(1),
            lookback: config.lookback(),
        }
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Classify the events that fall inside `[now - lookback, now]`.
    ///
    /// An empty window is not an error: it yields the least escalated band
    /// with zero confidence, which callers must read as "unknown".
    pub fn classify(&self, events: &[SignalEvent], now: DateTime<Utc>) -> ArousalReading {
        let since = now - self.lookback;
        let mut window: Vec<&SignalEvent> = events
            .iter()
            .filter(|e| e.timestamp() >= since && e.timestamp() <= now)
            .collect();
        window.sort_by_key(|e| e.timestamp());

        let Some(averages) = SignalValues::mean(window.iter().map(|e| e.signals())) else {
            return ArousalReading::unknown();
        };

        let composite = self.composite(&averages);
        let n = window.len();
        let reading = ArousalReading {
            band: self.band_for(composite),
            trend: self.trend(&window),
            confidence: self.confidence(n),
            composite,
            signal_count: n,
            averages: Some(averages),
        };

        tracing::debug!(
            "Arousal: band={} trend={:?} composite={:.2} n={} confidence={:.2}",
            reading.band,
            reading.trend,
            composite,
            n,
            reading.confidence
        );
        reading
    }

    /// Weighted activation on the 0-10 scale.
    pub fn composite(&self, values: &SignalValues) -> f32 {
        let weights = self.weights.as_array();
        let total: f32 = weights.iter().sum();
        if total <= 0.0 {
            return SIGNAL_MIN;
        }

        let weighted: f32 = SignalKind::ALL
            .iter()
            .zip(weights)
            .map(|(kind, w)| {
                let v = values.get(*kind);
                let activation = if kind.is_regulating() { SIGNAL_MAX - v } else { v };
                w * activation
            })
            .sum();

        (weighted / total).clamp(SIGNAL_MIN, SIGNAL_MAX)
    }

    /// Threshold ties resolve to the less severe band.
    pub fn band_for(&self, composite: f32) -> ArousalBand {
        if composite <= self.thresholds.green_max {
            ArousalBand::Green
        } else if composite <= self.thresholds.amber_max {
            ArousalBand::Amber
        } else {
            ArousalBand::Red
        }
    }

    fn confidence(&self, n: usize) -> f32 {
        if n < self.min_signals {
            return 0.0;
        }
        (n as f32 / self.saturation as f32).min(1.0)
    }

    /// Compare the earlier half of the window with the recent half.
    /// With an odd count the recent half takes the extra event.
    fn trend(&self, sorted: &[&SignalEvent]) -> ArousalTrend {
        if sorted.len() < 2 {
            return ArousalTrend::Stable;
        }
        let (earlier, recent) = sorted.split_at(sorted.len() / 2);

        let half_composite = |half: &[&SignalEvent]| {
            SignalValues::mean(half.iter().map(|e| e.signals())).map(|v| self.composite(&v))
        };
        let (Some(before), Some(after)) = (half_composite(earlier), half_composite(recent)) else {
            return ArousalTrend::Stable;
        };

        let delta = after - before;
        if delta > self.trend_epsilon {
            ArousalTrend::Escalating
        } else if delta < -self.trend_epsilon {
            ArousalTrend::Deescalating
        } else {
            ArousalTrend::Stable
        }
    }
}
