//! The narrow read interface the engine needs from its telemetry store.
//!
//! The engine never writes telemetry. Persisting the "serve" event is the
//! caller's job once it has acted on a selection.

use crate::signal::SignalEvent;
use crate::state::{Effectiveness, RecentServe, RotationDeficit, TopicHeat, TopicReadiness};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which effectiveness rollup to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectivenessDimension {
    Family,
    Lens,
    Process,
}

/// Named rollup sources, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupKind {
    SignalWindow,
    TopicHeat,
    Readiness,
    FamilyEffectiveness,
    LensEffectiveness,
    ProcessEffectiveness,
    RecentServes,
    RotationDeficits,
}

impl RollupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollupKind::SignalWindow => "signal_window",
            RollupKind::TopicHeat => "topic_heat",
            RollupKind::Readiness => "readiness",
            RollupKind::FamilyEffectiveness => "family_effectiveness",
            RollupKind::LensEffectiveness => "lens_effectiveness",
            RollupKind::ProcessEffectiveness => "process_effectiveness",
            RollupKind::RecentServes => "recent_serves",
            RollupKind::RotationDeficits => "rotation_deficits",
        }
    }

    /// A failure on a required rollup aborts the selection call.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            RollupKind::SignalWindow
                | RollupKind::TopicHeat
                | RollupKind::Readiness
                | RollupKind::RecentServes
        )
    }
}

impl From<EffectivenessDimension> for RollupKind {
    fn from(dimension: EffectivenessDimension) -> Self {
        match dimension {
            EffectivenessDimension::Family => RollupKind::FamilyEffectiveness,
            EffectivenessDimension::Lens => RollupKind::LensEffectiveness,
            EffectivenessDimension::Process => RollupKind::ProcessEffectiveness,
        }
    }
}

impl std::fmt::Display for RollupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view over per-user rollups. Rollups may lag the raw log by a
/// bounded amount; the engine only relies on their shape.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Signal events for `user_id` recorded at or after `since`.
    async fn signal_window(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SignalEvent>>;

    /// Recency-weighted topic heat.
    async fn topic_heat(&self, user_id: &str) -> anyhow::Result<Vec<TopicHeat>>;

    /// Current KBE layer per topic.
    async fn readiness(&self, user_id: &str) -> anyhow::Result<Vec<TopicReadiness>>;

    async fn effectiveness(
        &self,
        user_id: &str,
        dimension: EffectivenessDimension,
    ) -> anyhow::Result<Vec<Effectiveness>>;

    /// Serves at or after `since`.
    async fn recent_serves(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<RecentServe>>;

    async fn rotation_deficits(&self, user_id: &str) -> anyhow::Result<Vec<RotationDeficit>>;
}
