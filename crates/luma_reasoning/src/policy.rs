//! Orchestration Policy
//!
//! Picks one candidate for one user: compute state, choose a strategy,
//! filter and score, then explain. An empty survivor list is reported as
//! `Selection::NoEligibleCandidate`; substituting a fallback is the caller's
//! decision, never the engine's.

use crate::scorer::{CandidateScorer, Constraints, Exclusion, FilterContext, ScoredCandidate, SubScores};
use chrono::{DateTime, Utc};
use luma_core::candidate::Candidate;
use luma_core::config::{EngineConfig, StrategyConfig, SubScoreKind, SubScoreWeights};
use luma_core::error::{LumaError, LumaResult};
use luma_core::state::{ArousalBand, ArousalTrend, TherapeuticState};
use luma_core::telemetry::TelemetryStore;
use luma_memory::StateAggregator;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Modes & strategies
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationMode {
    /// Strategy follows the user's state.
    #[default]
    Adaptive,
    /// Stay on the hottest topics.
    Targeted,
    /// Favour content the user has not seen.
    Exploratory,
}

impl std::str::FromStr for OrchestrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adaptive" => Ok(OrchestrationMode::Adaptive),
            "targeted" => Ok(OrchestrationMode::Targeted),
            "exploratory" => Ok(OrchestrationMode::Exploratory),
            other => Err(format!("unknown orchestration mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Rescue,
    HeatRegulation,
    TopicClustering,
    ReadinessProgression,
    LensAmplification,
    FamilyRotation,
    ExploratoryProbe,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Rescue => "rescue",
            Strategy::HeatRegulation => "heat_regulation",
            Strategy::TopicClustering => "topic_clustering",
            Strategy::ReadinessProgression => "readiness_progression",
            Strategy::LensAmplification => "lens_amplification",
            Strategy::FamilyRotation => "family_rotation",
            Strategy::ExploratoryProbe => "exploratory_probe",
        }
    }

    /// The sub-score this strategy leans on.
    pub fn emphasis(&self) -> SubScoreKind {
        match self {
            Strategy::Rescue | Strategy::HeatRegulation | Strategy::LensAmplification => {
                SubScoreKind::FamilyEffectiveness
            }
            Strategy::TopicClustering => SubScoreKind::HeatFit,
            Strategy::ReadinessProgression => SubScoreKind::ReadinessFit,
            Strategy::FamilyRotation => SubScoreKind::RotationUrgency,
            Strategy::ExploratoryProbe => SubScoreKind::Novelty,
        }
    }

    /// Band weights with this strategy's emphasis applied, normalised.
    pub fn weights(&self, band: ArousalBand, config: &StrategyConfig) -> SubScoreWeights {
        config
            .weights_for(band)
            .emphasize(self.emphasis(), config.strategy_emphasis)
            .normalized()
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resonance above which a lens counts as strongly working.
const LENS_RESONANCE_STRONG: f32 = 70.0;
/// Deficit count above which rotation becomes the strategy.
const ROTATION_DEFICIT_COUNT: usize = 2;

/// First matching rule wins. Rescue overrides any explicit mode.
pub fn choose_strategy(
    state: &TherapeuticState,
    mode: OrchestrationMode,
    config: &StrategyConfig,
) -> Strategy {
    let arousal = &state.arousal;
    if arousal.is_known() {
        let resisting = arousal
            .averages
            .is_some_and(|a| a.resistance >= config.rescue_resistance);
        if arousal.band == ArousalBand::Red || resisting {
            return Strategy::Rescue;
        }
    }

    match mode {
        OrchestrationMode::Targeted => return Strategy::TopicClustering,
        OrchestrationMode::Exploratory => return Strategy::ExploratoryProbe,
        OrchestrationMode::Adaptive => {}
    }

    if arousal.is_known() && arousal.trend == ArousalTrend::Escalating {
        return Strategy::HeatRegulation;
    }
    if state
        .topic_heat
        .iter()
        .any(|h| h.heat >= config.active_heat_threshold)
    {
        return Strategy::TopicClustering;
    }
    if state.readiness.iter().any(|r| r.ready_for_next) {
        return Strategy::ReadinessProgression;
    }
    if state
        .lens_effectiveness
        .rows()
        .iter()
        .any(|l| l.resonance >= LENS_RESONANCE_STRONG)
    {
        return Strategy::LensAmplification;
    }
    if state.rotation_deficits.len() > ROTATION_DEFICIT_COUNT {
        return Strategy::FamilyRotation;
    }
    Strategy::TopicClustering
}

// ============================================================================
// Request / result types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub user_id: String,
    pub pool: Vec<Candidate>,
    #[serde(default)]
    pub config: StrategyConfig,
    #[serde(default)]
    pub mode: OrchestrationMode,
    #[serde(default)]
    pub constraints: Constraints,
    /// Overrides `config.runner_up_limit`.
    #[serde(default)]
    pub runner_up_limit: Option<usize>,
}

impl SelectionRequest {
    pub fn new(user_id: impl Into<String>, pool: Vec<Candidate>) -> Self {
        Self {
            user_id: user_id.into(),
            pool,
            config: StrategyConfig::default(),
            mode: OrchestrationMode::default(),
            constraints: Constraints::default(),
            runner_up_limit: None,
        }
    }

    pub fn with_config(mut self, config: StrategyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_mode(mut self, mode: OrchestrationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_runner_up_limit(mut self, limit: usize) -> Self {
        self.runner_up_limit = Some(limit);
        self
    }

    fn runner_up_limit(&self) -> usize {
        self.runner_up_limit.unwrap_or(self.config.runner_up_limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonTag {
    TopicHeatMatch,
    ReadinessProgression,
    EffectiveModality,
    FreshContent,
    RotationOverdue,
    /// Matched a lens or process the caller asked for.
    RequestedModality,
}

impl ReasonTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonTag::TopicHeatMatch => "topic_heat_match",
            ReasonTag::ReadinessProgression => "readiness_progression",
            ReasonTag::EffectiveModality => "effective_modality",
            ReasonTag::FreshContent => "fresh_content",
            ReasonTag::RotationOverdue => "rotation_overdue",
            ReasonTag::RequestedModality => "requested_modality",
        }
    }

    pub fn for_scores(s: &SubScores) -> Vec<ReasonTag> {
        let mut tags = Vec::new();
        if s.heat_fit > 0.7 {
            tags.push(ReasonTag::TopicHeatMatch);
        }
        if s.readiness_fit > 0.8 {
            tags.push(ReasonTag::ReadinessProgression);
        }
        if s.family_effectiveness > 0.7 {
            tags.push(ReasonTag::EffectiveModality);
        }
        if s.novelty > 0.9 {
            tags.push(ReasonTag::FreshContent);
        }
        if s.rotation_urgency > 0.0 {
            tags.push(ReasonTag::RotationOverdue);
        }
        tags
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub kind: SubScoreKind,
    pub sub_score: f32,
    pub weight: f32,
    /// `sub_score * weight`. Contributions plus the preference bonus give
    /// the final score, capped at 1.
    pub contribution: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rationale {
    pub strategy: Strategy,
    pub mode: OrchestrationMode,
    pub band: ArousalBand,
    pub trend: ArousalTrend,
    /// `false` means the band was read from too few signals to trust.
    pub arousal_known: bool,
    pub arousal_confidence: f32,
    pub weights: SubScoreWeights,
    /// Largest first.
    pub contributions: Vec<Contribution>,
    /// The two largest contributors.
    pub dominant: Vec<SubScoreKind>,
    /// Added on top of the weighted total for matched lens/process hints.
    pub preference_bonus: f32,
    pub reasons: Vec<ReasonTag>,
    pub summary: String,
}

impl Rationale {
    fn explain(
        top: &ScoredCandidate,
        strategy: Strategy,
        mode: OrchestrationMode,
        weights: SubScoreWeights,
        config: &StrategyConfig,
        state: &TherapeuticState,
    ) -> Self {
        let mut contributions: Vec<Contribution> = SubScoreKind::ALL
            .iter()
            .map(|&kind| {
                let sub_score = top.sub_scores.get(kind);
                let weight = weights.get(kind);
                Contribution {
                    kind,
                    sub_score,
                    weight,
                    contribution: sub_score * weight,
                }
            })
            .collect();
        // Stable sort keeps the fixed kind order among equals.
        contributions.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
        let dominant = contributions.iter().take(2).map(|c| c.kind).collect();

        let mut reasons = ReasonTag::for_scores(&top.sub_scores);
        if top.preference_fit > 0.0 {
            reasons.push(ReasonTag::RequestedModality);
        }
        let reason_text = if reasons.is_empty() {
            strategy.as_str().to_string()
        } else {
            reasons
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let arousal = &state.arousal;
        let band_text = if arousal.is_known() {
            format!("{} band", arousal.band)
        } else {
            format!("{} band (unconfirmed)", arousal.band)
        };
        let summary = format!(
            "{} ({}) under {} in {}: {}",
            top.candidate.id, top.candidate.family, strategy, band_text, reason_text
        );

        Self {
            strategy,
            mode,
            band: arousal.band,
            trend: arousal.trend,
            arousal_known: arousal.is_known(),
            arousal_confidence: arousal.confidence,
            weights,
            contributions,
            dominant,
            preference_bonus: config.preference_bonus * top.preference_fit,
            reasons,
            summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// 1-based; the chosen candidate is rank 1.
    pub rank: usize,
    pub candidate_id: String,
    pub family: String,
    pub score: f32,
    pub sub_scores: SubScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub decision_id: Uuid,
    pub user_id: String,
    pub decided_at: DateTime<Utc>,
    pub chosen: Candidate,
    pub score: f32,
    pub sub_scores: SubScores,
    /// Next-best survivors, starting at rank 2.
    pub runner_ups: Vec<RankedCandidate>,
    pub rationale: Rationale,
    pub exclusions: Vec<Exclusion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoEligible {
    pub decision_id: Uuid,
    pub user_id: String,
    pub decided_at: DateTime<Utc>,
    pub strategy: Strategy,
    pub band: ArousalBand,
    pub pool_size: usize,
    pub exclusions: Vec<Exclusion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Selection {
    Selected(SelectionResult),
    NoEligibleCandidate(NoEligible),
}

impl Selection {
    pub fn chosen(&self) -> Option<&Candidate> {
        match self {
            Selection::Selected(r) => Some(&r.chosen),
            Selection::NoEligibleCandidate(_) => None,
        }
    }

    pub fn exclusions(&self) -> &[Exclusion] {
        match self {
            Selection::Selected(r) => &r.exclusions,
            Selection::NoEligibleCandidate(n) => &n.exclusions,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Orchestrator<S: ?Sized> {
    aggregator: StateAggregator<S>,
    scorer: CandidateScorer,
    staleness: chrono::Duration,
    clock: Clock,
}

impl<S: TelemetryStore + ?Sized> Orchestrator<S> {
    pub fn new(store: Arc<S>, engine: &EngineConfig) -> Self {
        Self {
            aggregator: StateAggregator::new(store, engine),
            scorer: CandidateScorer::with_defaults(),
            staleness: engine.staleness(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, e.g. with a simulated one.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scorer(mut self, scorer: CandidateScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn aggregator(&self) -> &StateAggregator<S> {
        &self.aggregator
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn select(
        &self,
        user_id: &str,
        pool: Vec<Candidate>,
        config: StrategyConfig,
    ) -> LumaResult<Selection> {
        self.select_with(SelectionRequest::new(user_id, pool).with_config(config))
            .await
    }

    pub async fn select_with(&self, request: SelectionRequest) -> LumaResult<Selection> {
        request.config.validate()?;
        let now = self.now();
        let state = self
            .aggregator
            .compute(&request.user_id, &request.config, now)
            .await?;
        self.decide(&state, &request, now)
    }

    /// Like `select_with`, but gives up with `LumaError::Cancelled` as soon
    /// as `cancel` resolves. A cancelled call never yields a partial result.
    pub async fn select_until<C>(&self, request: SelectionRequest, cancel: C) -> LumaResult<Selection>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!("Selection for {} cancelled", request.user_id);
                Err(LumaError::Cancelled)
            }
            result = self.select_with(request.clone()) => result,
        }
    }

    /// Select against a state the caller already holds. A state older than
    /// the staleness window is recomputed first.
    pub async fn select_from_state(
        &self,
        state: TherapeuticState,
        request: &SelectionRequest,
        now: DateTime<Utc>,
    ) -> LumaResult<Selection> {
        request.config.validate()?;
        let state = if state.is_stale(now, self.staleness) || state.user_id != request.user_id {
            tracing::debug!(
                "State for {} computed at {} is stale, recomputing",
                state.user_id,
                state.computed_at
            );
            self.aggregator
                .compute(&request.user_id, &request.config, now)
                .await?
        } else {
            state
        };
        self.decide(&state, request, now)
    }

    /// Pure decision step: no I/O, same inputs give the same choice.
    pub fn decide(
        &self,
        state: &TherapeuticState,
        request: &SelectionRequest,
        now: DateTime<Utc>,
    ) -> LumaResult<Selection> {
        request.config.validate()?;
        let config = &request.config;
        let strategy = choose_strategy(state, request.mode, config);
        let weights = strategy.weights(state.arousal.band, config);

        let ctx = FilterContext {
            state,
            config,
            constraints: &request.constraints,
            now,
        };
        let scoring = self.scorer.score(&request.pool, &ctx, &weights);
        let decision_id = decision_id(
            &request.user_id,
            now,
            state,
            scoring.ranked.first().map(|s| s.candidate.id.as_str()),
        );

        let mut ranked = scoring.ranked.into_iter();
        let Some(top) = ranked.next() else {
            tracing::info!(
                "No eligible candidate for {}: {} of {} excluded (band={}, strategy={})",
                request.user_id,
                scoring.exclusions.len(),
                request.pool.len(),
                state.arousal.band,
                strategy
            );
            return Ok(Selection::NoEligibleCandidate(NoEligible {
                decision_id,
                user_id: request.user_id.clone(),
                decided_at: now,
                strategy,
                band: state.arousal.band,
                pool_size: request.pool.len(),
                exclusions: scoring.exclusions,
            }));
        };

        let runner_ups = ranked
            .take(request.runner_up_limit())
            .enumerate()
            .map(|(i, s)| RankedCandidate {
                rank: i + 2,
                candidate_id: s.candidate.id,
                family: s.candidate.family,
                score: s.score,
                sub_scores: s.sub_scores,
            })
            .collect();
        let rationale = Rationale::explain(&top, strategy, request.mode, weights, config, state);

        tracing::info!(
            "Selected {} for {} (score={:.4}): {}",
            top.candidate.id,
            request.user_id,
            top.score,
            rationale.summary
        );

        Ok(Selection::Selected(SelectionResult {
            decision_id,
            user_id: request.user_id.clone(),
            decided_at: now,
            chosen: top.candidate,
            score: top.score,
            sub_scores: top.sub_scores,
            runner_ups,
            rationale,
            exclusions: scoring.exclusions,
        }))
    }
}

const DECISION_NAMESPACE: Uuid = Uuid::from_u128(0x6c75_6d61_2d64_6563_6973_696f_6e2d_6964);

/// Name-based id over the decision's inputs, so a replayed decision keeps
/// its id.
fn decision_id(
    user_id: &str,
    decided_at: DateTime<Utc>,
    state: &TherapeuticState,
    chosen: Option<&str>,
) -> Uuid {
    let name = format!(
        "{}|{}|{}|{}",
        user_id,
        decided_at.to_rfc3339(),
        state.computed_at.to_rfc3339(),
        chosen.unwrap_or("-")
    );
    Uuid::new_v5(&DECISION_NAMESPACE, name.as_bytes())
}
