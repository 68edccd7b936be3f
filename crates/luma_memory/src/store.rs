//! In-process telemetry store
//!
//! Keeps an append-only log of interactions and serves and derives every
//! rollup the engine reads from it on demand. Used by the CLI, the session
//! simulator and tests; production deployments put a real store behind the
//! same trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use luma_core::signal::{SignalEvent, SignalValues};
use luma_core::state::{
    DeficitKind, Effectiveness, ReadinessLayer, RecentServe, RotationDeficit, TopicHeat,
    TopicReadiness,
};
use luma_core::telemetry::{EffectivenessDimension, TelemetryStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// One completed (or abandoned) micro-intervention, with its signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    #[serde(flatten)]
    pub event: SignalEvent,
    pub topic: String,
    pub family: String,
    #[serde(default)]
    pub lens: Option<String>,
    #[serde(default)]
    pub process: Option<String>,
    /// Layer the intervention targeted.
    pub layer: ReadinessLayer,
    #[serde(default)]
    pub completed: bool,
    /// Time to first response.
    #[serde(default)]
    pub hesitation_ms: u64,
}

impl InteractionRecord {
    fn key(&self, dimension: EffectivenessDimension) -> Option<&str> {
        match dimension {
            EffectivenessDimension::Family => Some(&self.family),
            EffectivenessDimension::Lens => self.lens.as_deref(),
            EffectivenessDimension::Process => self.process.as_deref(),
        }
    }
}

/// A serve decision the caller acted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeRecord {
    pub user_id: String,
    pub intervention_id: String,
    pub family: String,
    pub topic: String,
    pub served_at: DateTime<Utc>,
}

/// Rollup derivation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub heat_half_life_hours: f64,
    pub heat_horizon_days: i64,
    pub min_knowing_interactions: usize,
    pub min_believing_interactions: usize,
    /// Completed interactions on the current layer before `ready_for_next`.
    pub ready_min_completed: usize,
    pub ready_max_resistance: f32,
    pub ready_min_choice_access: f32,
    /// Hesitation at or beyond this counts as fully disengaged.
    pub hesitation_cap_ms: u64,
    pub rotation_overdue_hours: i64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            heat_half_life_hours: 24.0,
            heat_horizon_days: 7,
            min_knowing_interactions: 3,
            min_believing_interactions: 5,
            ready_min_completed: 2,
            ready_max_resistance: 4.0,
            ready_min_choice_access: 6.0,
            hesitation_cap_ms: 10_000,
            rotation_overdue_hours: 24,
        }
    }
}

#[derive(Debug, Default)]
struct Log {
    interactions: Vec<InteractionRecord>,
    serves: Vec<ServeRecord>,
    tracked_families: BTreeSet<String>,
    tracked_topics: BTreeSet<String>,
    pinned_now: Option<DateTime<Utc>>,
}

impl Log {
    fn now(&self) -> DateTime<Utc> {
        self.pinned_now.unwrap_or_else(Utc::now)
    }

    fn interactions_for<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a InteractionRecord> + 'a {
        let now = self.now();
        self.interactions
            .iter()
            .filter(move |r| r.event.user_id() == user_id && r.event.timestamp() <= now)
    }

    fn serves_for<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a ServeRecord> + 'a {
        let now = self.now();
        self.serves
            .iter()
            .filter(move |s| s.user_id == user_id && s.served_at <= now)
    }
}

pub struct InMemoryTelemetry {
    config: TelemetryConfig,
    log: RwLock<Log>,
}

impl Default for InMemoryTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::with_config(TelemetryConfig::default())
    }

    pub fn with_config(config: TelemetryConfig) -> Self {
        Self {
            config,
            log: RwLock::new(Log::default()),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Freeze the store's clock. Rollups are derived relative to this instant
    /// and records stamped later are invisible until the clock moves.
    pub async fn pin_clock(&self, now: DateTime<Utc>) {
        self.log.write().await.pinned_now = Some(now);
    }

    pub async fn record_interaction(&self, record: InteractionRecord) {
        let mut log = self.log.write().await;
        log.tracked_topics.insert(record.topic.clone());
        log.tracked_families.insert(record.family.clone());
        log.interactions.push(record);
    }

    pub async fn record_serve(&self, serve: ServeRecord) {
        tracing::debug!(
            "Serve recorded: {} -> {} ({})",
            serve.user_id,
            serve.intervention_id,
            serve.family
        );
        self.log.write().await.serves.push(serve);
    }

    /// Families that should show up as deficits when neglected.
    pub async fn track_families<I, T>(&self, families: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut log = self.log.write().await;
        log.tracked_families.extend(families.into_iter().map(Into::into));
    }

    pub async fn track_topics<I, T>(&self, topics: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut log = self.log.write().await;
        log.tracked_topics.extend(topics.into_iter().map(Into::into));
    }

    pub async fn interaction_count(&self) -> usize {
        self.log.read().await.interactions.len()
    }

    fn heat_rows(&self, log: &Log, user_id: &str) -> Vec<TopicHeat> {
        let now = log.now();
        let horizon = now - Duration::days(self.config.heat_horizon_days);
        let half_life = self.config.heat_half_life_hours.max(f64::EPSILON);

        let mut by_topic: BTreeMap<&str, (f64, DateTime<Utc>, u32)> = BTreeMap::new();
        for r in log.interactions_for(user_id).filter(|r| r.event.timestamp() >= horizon) {
            let age_h = (now - r.event.timestamp()).num_seconds() as f64 / 3600.0;
            let decay = 0.5f64.powf(age_h / half_life);
            let s = r.event.signals();
            let intensity = (s.shame_threat + s.resistance + s.fusion) as f64 / 30.0;

            let entry = by_topic
                .entry(r.topic.as_str())
                .or_insert((0.0, r.event.timestamp(), 0));
            entry.0 += decay * intensity;
            entry.1 = entry.1.max(r.event.timestamp());
            entry.2 += 1;
        }

        by_topic
            .into_iter()
            .map(|(topic, (load, last_hit, hits))| TopicHeat {
                topic: topic.to_string(),
                heat: (100.0 * (1.0 - (-load).exp())) as f32,
                last_hit,
                hits_7d: hits,
            })
            .collect()
    }

    fn readiness_rows(&self, log: &Log, user_id: &str) -> Vec<TopicReadiness> {
        let mut by_topic: BTreeMap<&str, Vec<&InteractionRecord>> = BTreeMap::new();
        for r in log.interactions_for(user_id) {
            by_topic.entry(r.topic.as_str()).or_default().push(r);
        }

        by_topic
            .into_iter()
            .map(|(topic, records)| self.readiness_for(topic, &records))
            .collect()
    }

    fn readiness_for(&self, topic: &str, records: &[&InteractionRecord]) -> TopicReadiness {
        let count_at = |layer: ReadinessLayer| records.iter().filter(|r| r.layer == layer).count();
        let knowing = count_at(ReadinessLayer::Knowing);
        let believing = count_at(ReadinessLayer::Believing);
        let highest = records
            .iter()
            .map(|r| r.layer)
            .max()
            .unwrap_or(ReadinessLayer::Knowing);

        let mut layer = ReadinessLayer::Knowing;
        if highest >= ReadinessLayer::Believing && knowing >= self.config.min_knowing_interactions {
            layer = ReadinessLayer::Believing;
            if highest == ReadinessLayer::Embodying
                && believing >= self.config.min_believing_interactions
            {
                layer = ReadinessLayer::Embodying;
            }
        }

        let progress = |count: usize, needed: usize| {
            if needed == 0 {
                1.0
            } else {
                (count as f32 / needed as f32).min(1.0)
            }
        };
        let confidence = match layer {
            ReadinessLayer::Knowing => progress(knowing, self.config.min_knowing_interactions),
            ReadinessLayer::Believing => progress(believing, self.config.min_believing_interactions),
            ReadinessLayer::Embodying => 1.0,
        };

        let completed: Vec<&SignalValues> = records
            .iter()
            .filter(|r| r.layer == layer && r.completed)
            .map(|r| r.event.signals())
            .collect();
        let ready_for_next = layer.next().is_some()
            && completed.len() >= self.config.ready_min_completed
            && SignalValues::mean(completed.iter().copied()).is_some_and(|m| {
                m.resistance <= self.config.ready_max_resistance
                    && m.choice_access >= self.config.ready_min_choice_access
            });

        TopicReadiness {
            topic: topic.to_string(),
            layer,
            ready_for_next,
            confidence,
        }
    }

    fn effectiveness_rows(
        &self,
        log: &Log,
        user_id: &str,
        dimension: EffectivenessDimension,
    ) -> Vec<Effectiveness> {
        let mut by_key: BTreeMap<&str, Vec<&InteractionRecord>> = BTreeMap::new();
        for r in log.interactions_for(user_id) {
            if let Some(key) = r.key(dimension) {
                by_key.entry(key).or_default().push(r);
            }
        }

        let cap = self.config.hesitation_cap_ms.max(1) as f32;
        by_key
            .into_iter()
            .map(|(key, records)| {
                let n = records.len() as f32;
                let completion = records.iter().filter(|r| r.completed).count() as f32 / n;
                let hesitation = records
                    .iter()
                    .map(|r| r.hesitation_ms.min(self.config.hesitation_cap_ms) as f32 / cap)
                    .sum::<f32>()
                    / n;
                let avg_signals = SignalValues::mean(records.iter().map(|r| r.event.signals()));
                let resonance = avg_signals
                    .map(|m| 100.0 * ((10.0 - m.resistance) / 10.0 + m.choice_access / 10.0) / 2.0)
                    .unwrap_or(50.0);

                let mut last_served = records.iter().map(|r| r.event.timestamp()).max();
                if dimension == EffectivenessDimension::Family {
                    let served = log
                        .serves_for(user_id)
                        .filter(|s| s.family == key)
                        .map(|s| s.served_at)
                        .max();
                    last_served = last_served.max(served);
                }

                Effectiveness {
                    key: key.to_string(),
                    engagement: 100.0 * (0.6 * completion + 0.4 * (1.0 - hesitation)),
                    resonance,
                    serve_count: records.len() as u32,
                    last_served,
                    avg_signals,
                }
            })
            .collect()
    }

    fn deficit_rows(&self, log: &Log, user_id: &str) -> Vec<RotationDeficit> {
        let now = log.now();
        let overdue = Duration::hours(self.config.rotation_overdue_hours.max(1));

        let urgency = |last: Option<DateTime<Utc>>| -> Option<f32> {
            match last {
                None => Some(1.0),
                Some(at) if now - at > overdue => {
                    let ratio = (now - at).num_seconds() as f32 / (2 * overdue.num_seconds()) as f32;
                    Some(ratio.min(1.0))
                }
                Some(_) => None,
            }
        };

        let mut deficits = Vec::new();
        for family in &log.tracked_families {
            let last = log
                .serves_for(user_id)
                .filter(|s| &s.family == family)
                .map(|s| s.served_at)
                .max();
            if let Some(u) = urgency(last) {
                deficits.push(RotationDeficit {
                    kind: DeficitKind::Family,
                    key: family.clone(),
                    urgency: u,
                });
            }
        }
        for topic in &log.tracked_topics {
            let last = log
                .serves_for(user_id)
                .filter(|s| &s.topic == topic)
                .map(|s| s.served_at)
                .max();
            if let Some(u) = urgency(last) {
                deficits.push(RotationDeficit {
                    kind: DeficitKind::Topic,
                    key: topic.clone(),
                    urgency: u,
                });
            }
        }
        deficits
    }
}

#[async_trait]
impl TelemetryStore for InMemoryTelemetry {
    async fn signal_window(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SignalEvent>> {
        let log = self.log.read().await;
        Ok(log
            .interactions_for(user_id)
            .filter(|r| r.event.timestamp() >= since)
            .map(|r| r.event.clone())
            .collect())
    }

    async fn topic_heat(&self, user_id: &str) -> anyhow::Result<Vec<TopicHeat>> {
        let log = self.log.read().await;
        Ok(self.heat_rows(&log, user_id))
    }

    async fn readiness(&self, user_id: &str) -> anyhow::Result<Vec<TopicReadiness>> {
        let log = self.log.read().await;
        Ok(self.readiness_rows(&log, user_id))
    }

    async fn effectiveness(
        &self,
        user_id: &str,
        dimension: EffectivenessDimension,
    ) -> anyhow::Result<Vec<Effectiveness>> {
        let log = self.log.read().await;
        Ok(self.effectiveness_rows(&log, user_id, dimension))
    }

    async fn recent_serves(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<RecentServe>> {
        let log = self.log.read().await;
        let mut serves: Vec<RecentServe> = log
            .serves_for(user_id)
            .filter(|s| s.served_at >= since)
            .map(|s| RecentServe {
                intervention_id: s.intervention_id.clone(),
                family: s.family.clone(),
                topic: s.topic.clone(),
                served_at: s.served_at,
            })
            .collect();
        serves.sort_by_key(|s| s.served_at);
        Ok(serves)
    }

    async fn rotation_deficits(&self, user_id: &str) -> anyhow::Result<Vec<RotationDeficit>> {
        let log = self.log.read().await;
        Ok(self.deficit_rows(&log, user_id))
    }
}
