//! Fault injection around any `TelemetryStore`.
//!
//! Lets tests and simulations make individual rollups fail or stall without
//! touching the wrapped store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use luma_core::signal::SignalEvent;
use luma_core::state::{Effectiveness, RecentServe, RotationDeficit, TopicHeat, TopicReadiness};
use luma_core::telemetry::{EffectivenessDimension, RollupKind, TelemetryStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// The read returns an error immediately.
    Fail(String),
    /// The read sleeps before delegating. Long enough delays trip timeouts.
    Delay(Duration),
}

pub struct FaultyTelemetry<S: ?Sized> {
    inner: Arc<S>,
    faults: RwLock<HashMap<RollupKind, Fault>>,
}

impl<S: TelemetryStore + ?Sized> FaultyTelemetry<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            faults: RwLock::new(HashMap::new()),
        }
    }

    pub async fn inject(&self, rollup: RollupKind, fault: Fault) {
        self.faults.write().await.insert(rollup, fault);
    }

    pub async fn clear(&self, rollup: RollupKind) {
        self.faults.write().await.remove(&rollup);
    }

    pub async fn clear_all(&self) {
        self.faults.write().await.clear();
    }

    async fn apply(&self, rollup: RollupKind) -> anyhow::Result<()> {
        let fault = self.faults.read().await.get(&rollup).cloned();
        match fault {
            Some(Fault::Fail(msg)) => anyhow::bail!("injected fault on {}: {}", rollup, msg),
            Some(Fault::Delay(d)) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<S: TelemetryStore + ?Sized> TelemetryStore for FaultyTelemetry<S> {
    async fn signal_window(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SignalEvent>> {
        self.apply(RollupKind::SignalWindow).await?;
        self.inner.signal_window(user_id, since).await
    }

    async fn topic_heat(&self, user_id: &str) -> anyhow::Result<Vec<TopicHeat>> {
        self.apply(RollupKind::TopicHeat).await?;
        self.inner.topic_heat(user_id).await
    }

    async fn readiness(&self, user_id: &str) -> anyhow::Result<Vec<TopicReadiness>> {
        self.apply(RollupKind::Readiness).await?;
        self.inner.readiness(user_id).await
    }

    async fn effectiveness(
        &self,
        user_id: &str,
        dimension: EffectivenessDimension,
    ) -> anyhow::Result<Vec<Effectiveness>> {
        self.apply(dimension.into()).await?;
        self.inner.effectiveness(user_id, dimension).await
    }

    async fn recent_serves(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<RecentServe>> {
        self.apply(RollupKind::RecentServes).await?;
        self.inner.recent_serves(user_id, since).await
    }

    async fn rotation_deficits(&self, user_id: &str) -> anyhow::Result<Vec<RotationDeficit>> {
        self.apply(RollupKind::RotationDeficits).await?;
        self.inner.rotation_deficits(user_id).await
    }
}
