//! luma_bench: multi-step session simulations.
//!
//! Drives the orchestrator through a simulated session: select, serve,
//! record the user's response, move the clock, repeat. The tests check
//! behaviour that only shows up across steps:
//! - family rotation without starvation
//! - cooldown holding across consecutive selections
//! - de-escalation from the red band back to green content

use chrono::{DateTime, Duration, Utc};
use luma_core::{ArousalBand, Candidate, EngineConfig, LumaResult, SignalEvent, SignalValues, StrategyConfig};
use luma_memory::{InMemoryTelemetry, InteractionRecord, ServeRecord};
use luma_reasoning::{Orchestrator, Selection, SelectionRequest};
use std::sync::Arc;

/// One simulated selection.
#[derive(Debug, Clone)]
pub struct StepTrace {
    pub at: DateTime<Utc>,
    pub band: ArousalBand,
    pub chosen: Option<Candidate>,
}

pub struct SessionSim {
    user_id: String,
    pool: Vec<Candidate>,
    config: StrategyConfig,
    store: Arc<InMemoryTelemetry>,
    orchestrator: Orchestrator<InMemoryTelemetry>,
    now: DateTime<Utc>,
}

impl SessionSim {
    pub async fn new(user_id: impl Into<String>, pool: Vec<Candidate>, start: DateTime<Utc>) -> Self {
        let store = Arc::new(InMemoryTelemetry::new());
        store.pin_clock(start).await;
        store
            .track_families(pool.iter().map(|c| c.family.clone()))
            .await;
        store.track_topics(pool.iter().map(|c| c.topic.clone())).await;
        let orchestrator = Orchestrator::new(store.clone(), &EngineConfig::default());
        Self {
            user_id: user_id.into(),
            pool,
            config: StrategyConfig::default(),
            store,
            orchestrator,
            now: start,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub async fn advance(&mut self, by: Duration) {
        self.now += by;
        self.store.pin_clock(self.now).await;
    }

    /// Select once at the current instant. A chosen candidate is served and
    /// the user's response to it is recorded at the same instant.
    pub async fn step(&mut self, response: SignalValues) -> LumaResult<StepTrace> {
        let state = self
            .orchestrator
            .aggregator()
            .compute(&self.user_id, &self.config, self.now)
            .await?;
        let request = SelectionRequest::new(self.user_id.clone(), self.pool.clone())
            .with_config(self.config.clone());
        let selection = self.orchestrator.decide(&state, &request, self.now)?;

        let chosen = match selection {
            Selection::Selected(result) => Some(result.chosen),
            Selection::NoEligibleCandidate(_) => None,
        };
        if let Some(candidate) = &chosen {
            self.serve(candidate, response).await?;
        }

        Ok(StepTrace {
            at: self.now,
            band: state.arousal.band,
            chosen,
        })
    }

    /// Run `steps` selections `interval` apart. `response` maps the step
    /// index to the signals the user reports for that step's intervention.
    pub async fn run<F>(&mut self, steps: usize, interval: Duration, response: F) -> LumaResult<Vec<StepTrace>>
    where
        F: Fn(usize) -> SignalValues,
    {
        let mut trace = Vec::with_capacity(steps);
        for i in 0..steps {
            trace.push(self.step(response(i)).await?);
            self.advance(interval).await;
        }
        Ok(trace)
    }

    async fn serve(&self, candidate: &Candidate, response: SignalValues) -> LumaResult<()> {
        self.store
            .record_serve(ServeRecord {
                user_id: self.user_id.clone(),
                intervention_id: candidate.id.clone(),
                family: candidate.family.clone(),
                topic: candidate.topic.clone(),
                served_at: self.now,
            })
            .await;
        let event = SignalEvent::new(self.user_id.as_str(), candidate.id.as_str(), self.now, response)?;
        self.store
            .record_interaction(InteractionRecord {
                event,
                topic: candidate.topic.clone(),
                family: candidate.family.clone(),
                lens: candidate.lens.clone(),
                process: candidate.process.clone(),
                layer: candidate.target_layer,
                completed: true,
                hesitation_ms: 1_200,
            })
            .await;
        tracing::debug!("{} served {} at {}", self.user_id, candidate.id, self.now);
        Ok(())
    }
}

pub fn calm() -> SignalValues {
    SignalValues {
        fusion: 2.0,
        resistance: 2.0,
        choice_access: 8.0,
        shame_threat: 1.0,
        connection: 8.0,
    }
}

pub fn flooded() -> SignalValues {
    SignalValues {
        fusion: 8.0,
        resistance: 8.0,
        choice_access: 2.0,
        shame_threat: 9.0,
        connection: 1.0,
    }
}
