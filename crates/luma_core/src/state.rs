//! Per-user therapeutic state
//!
//! A `TherapeuticState` is a snapshot assembled fresh on every request from
//! the telemetry rollups plus the arousal classification. It is never stored
//! as ground truth; once older than the staleness window it must be
//! recomputed instead of reused.

use crate::signal::SignalValues;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Arousal
// =============================================================================

/// Coarse regulation band. Ordered by severity: `Green < Amber < Red`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArousalBand {
    Green,
    Amber,
    Red,
}

impl ArousalBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArousalBand::Green => "green",
            ArousalBand::Amber => "amber",
            ArousalBand::Red => "red",
        }
    }
}

impl std::fmt::Display for ArousalBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArousalTrend {
    Escalating,
    Stable,
    Deescalating,
}

/// Output of the arousal classifier for one signal window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArousalReading {
    pub band: ArousalBand,
    pub trend: ArousalTrend,
    /// 0.0 means "unknown", never "calm".
    pub confidence: f32,
    /// Composite activation score on the 0-10 signal scale.
    pub composite: f32,
    /// Number of signal events inside the window.
    pub signal_count: usize,
    /// Window means; `None` when the window was empty.
    pub averages: Option<SignalValues>,
}

impl ArousalReading {
    /// The reading for an empty window: least escalated band, zero confidence.
    pub fn unknown() -> Self {
        Self {
            band: ArousalBand::Green,
            trend: ArousalTrend::Stable,
            confidence: 0.0,
            composite: 0.0,
            signal_count: 0,
            averages: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.confidence > 0.0
    }
}

// =============================================================================
// Readiness (KBE layers)
// =============================================================================

/// Knowing → Believing → Embodying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessLayer {
    Knowing,
    Believing,
    Embodying,
}

impl ReadinessLayer {
    pub fn index(&self) -> i8 {
        match self {
            ReadinessLayer::Knowing => 0,
            ReadinessLayer::Believing => 1,
            ReadinessLayer::Embodying => 2,
        }
    }

    /// Signed distance from `self` to `target`; positive means `target` is ahead.
    pub fn steps_to(&self, target: ReadinessLayer) -> i8 {
        target.index() - self.index()
    }

    pub fn next(&self) -> Option<ReadinessLayer> {
        match self {
            ReadinessLayer::Knowing => Some(ReadinessLayer::Believing),
            ReadinessLayer::Believing => Some(ReadinessLayer::Embodying),
            ReadinessLayer::Embodying => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessLayer::Knowing => "knowing",
            ReadinessLayer::Believing => "believing",
            ReadinessLayer::Embodying => "embodying",
        }
    }
}

impl std::fmt::Display for ReadinessLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicReadiness {
    pub topic: String,
    pub layer: ReadinessLayer,
    pub ready_for_next: bool,
    /// Readiness confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl TopicReadiness {
    /// Assumed readiness for a topic with no history.
    pub fn fresh(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            layer: ReadinessLayer::Knowing,
            ready_for_next: false,
            confidence: 0.0,
        }
    }
}

// =============================================================================
// Rollup rows
// =============================================================================

/// Topic "heat": recency-weighted engagement intensity, already decayed upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicHeat {
    pub topic: String,
    /// Heat (0.0 - 100.0)
    pub heat: f32,
    pub last_hit: DateTime<Utc>,
    pub hits_7d: u32,
}

/// Historical performance of one family, lens or process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effectiveness {
    pub key: String,
    /// Engagement (0.0 - 100.0): completion and hesitation
    pub engagement: f32,
    /// Resonance (0.0 - 100.0): low resistance, high choice access
    pub resonance: f32,
    pub serve_count: u32,
    pub last_served: Option<DateTime<Utc>>,
    pub avg_signals: Option<SignalValues>,
}

/// An optional rollup. Distinguishes real data from "nothing yet" and from
/// "the fetch failed", so scoring can tell neutral from missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "rows", rename_all = "snake_case")]
pub enum Rollup<T> {
    Present(Vec<T>),
    /// The store answered, but has no history for this user.
    ColdStart,
    /// The fetch failed or timed out; treated as missing with low confidence.
    Degraded,
}

impl<T> Default for Rollup<T> {
    fn default() -> Self {
        Rollup::ColdStart
    }
}

impl<T> Rollup<T> {
    /// `Present` for a non-empty list, `ColdStart` otherwise.
    pub fn from_rows(rows: Vec<T>) -> Self {
        if rows.is_empty() {
            Rollup::ColdStart
        } else {
            Rollup::Present(rows)
        }
    }

    pub fn rows(&self) -> &[T] {
        match self {
            Rollup::Present(rows) => rows,
            _ => &[],
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Rollup::Degraded)
    }
}

impl Rollup<Effectiveness> {
    pub fn find(&self, key: &str) -> Option<&Effectiveness> {
        self.rows().iter().find(|e| e.key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentServe {
    pub intervention_id: String,
    pub family: String,
    pub topic: String,
    pub served_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeficitKind {
    Family,
    Topic,
}

/// A family or topic overdue for exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationDeficit {
    pub kind: DeficitKind,
    pub key: String,
    /// Urgency (0.0 - 1.0)
    pub urgency: f32,
}

// =============================================================================
// Composite state
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapeuticState {
    pub user_id: String,
    pub computed_at: DateTime<Utc>,
    pub topic_heat: Vec<TopicHeat>,
    pub readiness: Vec<TopicReadiness>,
    pub family_effectiveness: Rollup<Effectiveness>,
    pub lens_effectiveness: Rollup<Effectiveness>,
    pub process_effectiveness: Rollup<Effectiveness>,
    pub arousal: ArousalReading,
    pub recent_serves: Vec<RecentServe>,
    pub rotation_deficits: Vec<RotationDeficit>,
}

impl TherapeuticState {
    /// State for a user with no history at all.
    pub fn cold_start(user_id: impl Into<String>, computed_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            computed_at,
            topic_heat: Vec::new(),
            readiness: Vec::new(),
            family_effectiveness: Rollup::ColdStart,
            lens_effectiveness: Rollup::ColdStart,
            process_effectiveness: Rollup::ColdStart,
            arousal: ArousalReading::unknown(),
            recent_serves: Vec::new(),
            rotation_deficits: Vec::new(),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        now - self.computed_at > staleness
    }

    pub fn heat_for(&self, topic: &str) -> Option<&TopicHeat> {
        self.topic_heat.iter().find(|h| h.topic == topic)
    }

    pub fn readiness_for(&self, topic: &str) -> Option<&TopicReadiness> {
        self.readiness.iter().find(|r| r.topic == topic)
    }

    /// Most recent serve of this exact intervention.
    pub fn last_served(&self, intervention_id: &str) -> Option<DateTime<Utc>> {
        self.recent_serves
            .iter()
            .filter(|s| s.intervention_id == intervention_id)
            .map(|s| s.served_at)
            .max()
    }

    /// Most recent serve of any intervention in this family, from the recent
    /// window or, failing that, the family rollup.
    pub fn family_last_served(&self, family: &str) -> Option<DateTime<Utc>> {
        let recent = self
            .recent_serves
            .iter()
            .filter(|s| s.family == family)
            .map(|s| s.served_at)
            .max();
        let rolled = self
            .family_effectiveness
            .find(family)
            .and_then(|e| e.last_served);
        recent.max(rolled)
    }

    pub fn deficit_urgency(&self, kind: DeficitKind, key: &str) -> f32 {
        self.rotation_deficits
            .iter()
            .filter(|d| d.kind == kind && d.key == key)
            .map(|d| d.urgency.clamp(0.0, 1.0))
            .fold(0.0, f32::max)
    }
}
