//! State Aggregator - one fresh `TherapeuticState` per request
//!
//! All rollups are fetched concurrently, each under its own timeout. Required
//! rollups (signal window, topic heat, readiness, recent serves) abort the
//! computation on failure; the optional ones degrade and are logged.
//!
//! No scoring happens here. Rows are converted into the state's shape and
//! nothing else: heat arrives already decayed and is not touched again.

use chrono::{DateTime, Utc};
use luma_core::config::{EngineConfig, StrategyConfig};
use luma_core::error::{LumaError, LumaResult};
use luma_core::state::{Effectiveness, Rollup, TherapeuticState};
use luma_core::telemetry::{EffectivenessDimension, RollupKind, TelemetryStore};
use luma_limbic::ArousalClassifier;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct StateAggregator<S: ?Sized> {
    store: Arc<S>,
    rollup_timeout: Duration,
}

impl<S: ?Sized> Clone for StateAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            rollup_timeout: self.rollup_timeout,
        }
    }
}

impl<S: TelemetryStore + ?Sized> StateAggregator<S> {
    pub fn new(store: Arc<S>, engine: &EngineConfig) -> Self {
        Self::with_timeout(store, engine.rollup_timeout())
    }

    pub fn with_timeout(store: Arc<S>, rollup_timeout: Duration) -> Self {
        Self {
            store,
            rollup_timeout,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Compute the user's state as of `now`.
    ///
    /// Dropping the returned future cancels every in-flight read.
    pub async fn compute(
        &self,
        user_id: &str,
        config: &StrategyConfig,
        now: DateTime<Utc>,
    ) -> LumaResult<TherapeuticState> {
        let signals_since = now - config.lookback();
        // Cooldown may reach further back than the recent window.
        let serves_since = now - config.recent_window().max(config.cooldown());
        let t = self.rollup_timeout;
        let store = &self.store;

        let (signals, heat, readiness, serves, family, lens, process, deficits) = tokio::join!(
            fetch(t, store.signal_window(user_id, signals_since)),
            fetch(t, store.topic_heat(user_id)),
            fetch(t, store.readiness(user_id)),
            fetch(t, store.recent_serves(user_id, serves_since)),
            fetch(t, store.effectiveness(user_id, EffectivenessDimension::Family)),
            fetch(t, store.effectiveness(user_id, EffectivenessDimension::Lens)),
            fetch(t, store.effectiveness(user_id, EffectivenessDimension::Process)),
            fetch(t, store.rotation_deficits(user_id)),
        );

        // Required rollups are checked in a fixed order so the reported
        // source does not depend on which read finished first.
        let signals = required(RollupKind::SignalWindow, signals)?;
        let topic_heat = required(RollupKind::TopicHeat, heat)?;
        let readiness = required(RollupKind::Readiness, readiness)?;
        let recent_serves = required(RollupKind::RecentServes, serves)?;

        let family_effectiveness = optional(user_id, RollupKind::FamilyEffectiveness, family);
        let lens_effectiveness = optional(user_id, RollupKind::LensEffectiveness, lens);
        let process_effectiveness = optional(user_id, RollupKind::ProcessEffectiveness, process);
        let rotation_deficits = match deficits {
            Ok(rows) => rows,
            Err(reason) => {
                tracing::warn!(
                    "Rollup {} degraded for {}: {}; treating as no deficits",
                    RollupKind::RotationDeficits,
                    user_id,
                    reason
                );
                Vec::new()
            }
        };

        let arousal = ArousalClassifier::new(config).classify(&signals, now);

        tracing::debug!(
            "State for {}: {} topics, {} serves, band={}",
            user_id,
            topic_heat.len(),
            recent_serves.len(),
            arousal.band
        );

        Ok(TherapeuticState {
            user_id: user_id.to_string(),
            computed_at: now,
            topic_heat,
            readiness,
            family_effectiveness,
            lens_effectiveness,
            process_effectiveness,
            arousal,
            recent_serves,
            rotation_deficits,
        })
    }
}

async fn fetch<T, F>(timeout: Duration, read: F) -> Result<T, String>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, read).await {
        Ok(Ok(rows)) => Ok(rows),
        Ok(Err(e)) => Err(format!("failed: {:#}", e)),
        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
    }
}

fn required<T>(rollup: RollupKind, result: Result<T, String>) -> LumaResult<T> {
    result.map_err(|reason| LumaError::StateComputation { rollup, reason })
}

fn optional(
    user_id: &str,
    rollup: RollupKind,
    result: Result<Vec<Effectiveness>, String>,
) -> Rollup<Effectiveness> {
    match result {
        Ok(rows) => Rollup::from_rows(rows),
        Err(reason) => {
            tracing::warn!("Rollup {} degraded for {}: {}", rollup, user_id, reason);
            Rollup::Degraded
        }
    }
}
