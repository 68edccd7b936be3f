//! Candidate Scorer
//!
//! Hard filters run first, in a fixed order, and the first filter that
//! rejects a candidate is the one recorded. Survivors get five sub-scores in
//! [0, 1] and a weighted total; ranking is fully deterministic.

use chrono::{DateTime, Utc};
use luma_core::candidate::Candidate;
use luma_core::config::{StrategyConfig, SubScoreKind, SubScoreWeights};
use luma_core::state::{
    ArousalBand, DeficitKind, Effectiveness, ReadinessLayer, Rollup, TherapeuticState,
    TopicReadiness,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ============================================================================
// Exclusions
// ============================================================================

/// Why a candidate never reached scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// The user's band is more activated than the candidate tolerates.
    SafetyGate {
        band: ArousalBand,
        safety_band: ArousalBand,
    },
    /// The family is not on the allow-list for the user's band.
    FamilyGated {
        band: ArousalBand,
    },
    /// Target layer two or more steps beyond the user's layer.
    ReadinessGap {
        current: ReadinessLayer,
        target: ReadinessLayer,
    },
    Cooldown {
        served_at: DateTime<Utc>,
        window_minutes: u32,
    },
    /// The family filled the last `streak` serves.
    FamilyStreak {
        streak: u32,
    },
    ExcludedByRequest,
    FamilyExcludedByRequest,
    TopicMismatch {
        required: String,
    },
    PillarMismatch {
        required: String,
    },
}

impl ExclusionReason {
    pub fn filter_name(&self) -> &'static str {
        match self {
            ExclusionReason::SafetyGate { .. } => "safety_gate",
            ExclusionReason::FamilyGated { .. } => "family_gate",
            ExclusionReason::ReadinessGap { .. } => "readiness_gap",
            ExclusionReason::Cooldown { .. } => "cooldown",
            ExclusionReason::FamilyStreak { .. } => "family_streak",
            ExclusionReason::ExcludedByRequest
            | ExclusionReason::FamilyExcludedByRequest
            | ExclusionReason::TopicMismatch { .. }
            | ExclusionReason::PillarMismatch { .. } => "request_constraints",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub candidate_id: String,
    pub reason: ExclusionReason,
}

/// Caller-side restrictions and hints for one selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub excluded_ids: Vec<String>,
    pub excluded_families: Vec<String>,
    /// Matches a candidate's topic or any of its tags.
    pub required_topic: Option<String>,
    pub required_pillar: Option<String>,
    /// Soft hint: favour candidates voiced through this lens.
    pub prefer_lens: Option<String>,
    /// Soft hint: favour candidates working through this process.
    pub prefer_process: Option<String>,
}

impl Constraints {
    /// Share of the given hints `candidate` satisfies; 0 without hints.
    pub fn preference_fit(&self, candidate: &Candidate) -> f32 {
        let hints = [
            (self.prefer_lens.as_deref(), candidate.lens.as_deref()),
            (self.prefer_process.as_deref(), candidate.process.as_deref()),
        ];
        let mut given = 0;
        let mut matched = 0;
        for (wanted, has) in hints {
            if let Some(wanted) = wanted {
                given += 1;
                if has == Some(wanted) {
                    matched += 1;
                }
            }
        }
        if given == 0 {
            0.0
        } else {
            matched as f32 / given as f32
        }
    }
}

/// Everything a filter may look at.
pub struct FilterContext<'a> {
    pub state: &'a TherapeuticState,
    pub config: &'a StrategyConfig,
    pub constraints: &'a Constraints,
    pub now: DateTime<Utc>,
}

// ============================================================================
// HardFilter trait
// ============================================================================

pub trait HardFilter: Send + Sync {
    /// `Some(reason)` excludes the candidate; `None` passes it to the next filter.
    fn check(&self, candidate: &Candidate, ctx: &FilterContext<'_>) -> Option<ExclusionReason>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Never serve a candidate in a band more activated than it tolerates.
pub struct SafetyGate;

impl HardFilter for SafetyGate {
    fn check(&self, candidate: &Candidate, ctx: &FilterContext<'_>) -> Option<ExclusionReason> {
        let band = ctx.state.arousal.band;
        if candidate.tolerates(band) {
            None
        } else {
            Some(ExclusionReason::SafetyGate {
                band,
                safety_band: candidate.safety_band,
            })
        }
    }

    fn name(&self) -> &str {
        "safety_gate"
    }
}

/// Per-band family allow-lists from the strategy config.
pub struct FamilyGate;

impl HardFilter for FamilyGate {
    fn check(&self, candidate: &Candidate, ctx: &FilterContext<'_>) -> Option<ExclusionReason> {
        let band = ctx.state.arousal.band;
        if ctx.config.family_gates.admits(band, &candidate.family) {
            None
        } else {
            Some(ExclusionReason::FamilyGated { band })
        }
    }

    fn name(&self) -> &str {
        "family_gate"
    }
}

/// At most one layer ahead of where the user is on the topic.
pub struct ReadinessGap;

impl HardFilter for ReadinessGap {
    fn check(&self, candidate: &Candidate, ctx: &FilterContext<'_>) -> Option<ExclusionReason> {
        let current = ctx
            .state
            .readiness_for(&candidate.topic)
            .map(|r| r.layer)
            .unwrap_or(ReadinessLayer::Knowing);
        if current.steps_to(candidate.target_layer) >= 2 {
            Some(ExclusionReason::ReadinessGap {
                current,
                target: candidate.target_layer,
            })
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "readiness_gap"
    }
}

/// The exact intervention was served too recently.
pub struct Cooldown;

impl HardFilter for Cooldown {
    fn check(&self, candidate: &Candidate, ctx: &FilterContext<'_>) -> Option<ExclusionReason> {
        let served_at = ctx.state.last_served(&candidate.id)?;
        if ctx.now - served_at < ctx.config.cooldown() {
            Some(ExclusionReason::Cooldown {
                served_at,
                window_minutes: ctx.config.cooldown_window_minutes,
            })
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "cooldown"
    }
}

/// Hold a family out once it has filled the last
/// `max_same_family_consecutive` serves. Only serves inside the recent-serve
/// window are visible.
pub struct FamilyStreak;

impl HardFilter for FamilyStreak {
    fn check(&self, candidate: &Candidate, ctx: &FilterContext<'_>) -> Option<ExclusionReason> {
        let limit = ctx.config.max_same_family_consecutive;
        if limit == 0 {
            return None;
        }
        let mut serves: Vec<_> = ctx
            .state
            .recent_serves
            .iter()
            .filter(|s| s.served_at <= ctx.now)
            .collect();
        serves.sort_by(|a, b| {
            b.served_at
                .cmp(&a.served_at)
                .then_with(|| a.intervention_id.cmp(&b.intervention_id))
        });
        let streak = serves
            .iter()
            .take_while(|s| s.family == candidate.family)
            .count() as u32;
        if streak >= limit {
            Some(ExclusionReason::FamilyStreak { streak })
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "family_streak"
    }
}

pub struct RequestConstraints;

impl HardFilter for RequestConstraints {
    fn check(&self, candidate: &Candidate, ctx: &FilterContext<'_>) -> Option<ExclusionReason> {
        let c = ctx.constraints;
        if c.excluded_ids.iter().any(|id| id == &candidate.id) {
            return Some(ExclusionReason::ExcludedByRequest);
        }
        if c.excluded_families.iter().any(|f| f == &candidate.family) {
            return Some(ExclusionReason::FamilyExcludedByRequest);
        }
        if let Some(topic) = &c.required_topic {
            if !candidate.covers_topic(topic) {
                return Some(ExclusionReason::TopicMismatch {
                    required: topic.clone(),
                });
            }
        }
        match &c.required_pillar {
            Some(pillar) if !candidate.in_pillar(pillar) => Some(ExclusionReason::PillarMismatch {
                required: pillar.clone(),
            }),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        "request_constraints"
    }
}

// ============================================================================
// Sub-scores
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub heat_fit: f32,
    pub readiness_fit: f32,
    pub family_effectiveness: f32,
    /// How far the effectiveness sub-score can be trusted (0.0 - 1.0).
    pub effectiveness_confidence: f32,
    pub novelty: f32,
    pub rotation_urgency: f32,
}

impl SubScores {
    pub fn get(&self, kind: SubScoreKind) -> f32 {
        match kind {
            SubScoreKind::HeatFit => self.heat_fit,
            SubScoreKind::ReadinessFit => self.readiness_fit,
            SubScoreKind::FamilyEffectiveness => self.family_effectiveness,
            SubScoreKind::Novelty => self.novelty,
            SubScoreKind::RotationUrgency => self.rotation_urgency,
        }
    }

    pub fn weighted_total(&self, weights: &SubScoreWeights) -> f32 {
        SubScoreKind::ALL
            .iter()
            .map(|k| weights.get(*k) * self.get(*k))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f32,
    pub sub_scores: SubScores,
    /// Share of the request's lens/process hints this candidate matches.
    pub preference_fit: f32,
    /// Most recent serve of the candidate's family, used for tie-breaking.
    pub family_last_served: Option<DateTime<Utc>>,
}

impl ScoredCandidate {
    fn quantized_score(&self) -> i64 {
        (self.score as f64 * 1e6).round() as i64
    }
}

/// Score desc, rotation urgency desc, least recently served family first
/// (never-served before anything), then id asc.
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.quantized_score()
        .cmp(&a.quantized_score())
        .then_with(|| {
            b.sub_scores
                .rotation_urgency
                .total_cmp(&a.sub_scores.rotation_urgency)
        })
        .then_with(|| a.family_last_served.cmp(&b.family_last_served))
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scoring {
    /// Survivors, best first.
    pub ranked: Vec<ScoredCandidate>,
    pub exclusions: Vec<Exclusion>,
}

// ============================================================================
// CandidateScorer
// ============================================================================

pub struct CandidateScorer {
    filters: Vec<Box<dyn HardFilter>>,
}

impl Default for CandidateScorer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CandidateScorer {
    /// A scorer with no filters at all.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Safety gate, family gate, readiness gap, cooldown, family streak,
    /// request constraints, in that order.
    pub fn with_defaults() -> Self {
        let mut scorer = Self::new();
        scorer.add_filter(Box::new(SafetyGate));
        scorer.add_filter(Box::new(FamilyGate));
        scorer.add_filter(Box::new(ReadinessGap));
        scorer.add_filter(Box::new(Cooldown));
        scorer.add_filter(Box::new(FamilyStreak));
        scorer.add_filter(Box::new(RequestConstraints));
        scorer
    }

    pub fn add_filter(&mut self, filter: Box<dyn HardFilter>) {
        self.filters.push(filter);
    }

    /// Filter, score and rank `pool`. `weights` should already be normalised.
    /// Preference hints add up to `preference_bonus`, capped at 1.
    pub fn score(
        &self,
        pool: &[Candidate],
        ctx: &FilterContext<'_>,
        weights: &SubScoreWeights,
    ) -> Scoring {
        let mut scoring = Scoring::default();

        for candidate in pool {
            if let Some((filter, reason)) = self.first_rejection(candidate, ctx) {
                tracing::debug!("Excluded {} by {}: {:?}", candidate.id, filter, reason);
                scoring.exclusions.push(Exclusion {
                    candidate_id: candidate.id.clone(),
                    reason,
                });
                continue;
            }

            let sub_scores = sub_scores(candidate, ctx.state, ctx.config, ctx.now);
            let preference_fit = ctx.constraints.preference_fit(candidate);
            let score = (sub_scores.weighted_total(weights)
                + ctx.config.preference_bonus * preference_fit)
                .min(1.0);
            tracing::debug!("Scored {}: {:.4} {:?}", candidate.id, score, sub_scores);

            scoring.ranked.push(ScoredCandidate {
                candidate: candidate.clone(),
                score,
                sub_scores,
                preference_fit,
                family_last_served: ctx.state.family_last_served(&candidate.family),
            });
        }

        scoring.ranked.sort_by(rank_order);
        scoring
    }

    fn first_rejection<'f>(
        &'f self,
        candidate: &Candidate,
        ctx: &FilterContext<'_>,
    ) -> Option<(&'f str, ExclusionReason)> {
        self.filters
            .iter()
            .find_map(|f| f.check(candidate, ctx).map(|reason| (f.name(), reason)))
    }
}

/// All five sub-scores for a candidate that passed the hard filters.
pub fn sub_scores(
    candidate: &Candidate,
    state: &TherapeuticState,
    config: &StrategyConfig,
    now: DateTime<Utc>,
) -> SubScores {
    let (family_effectiveness, effectiveness_confidence) = effectiveness(candidate, state, config);
    SubScores {
        heat_fit: heat_fit(candidate, state, config),
        readiness_fit: readiness_fit(candidate, state),
        family_effectiveness,
        effectiveness_confidence,
        novelty: novelty(candidate, state, config, now),
        rotation_urgency: state
            .deficit_urgency(DeficitKind::Topic, &candidate.topic)
            .max(state.deficit_urgency(DeficitKind::Family, &candidate.family)),
    }
}

fn heat_fit(candidate: &Candidate, state: &TherapeuticState, config: &StrategyConfig) -> f32 {
    let ceiling = config.heat_ceiling.max(f32::EPSILON);
    state
        .heat_for(&candidate.topic)
        .map(|h| (h.heat.clamp(0.0, ceiling) / ceiling).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

fn readiness_fit(candidate: &Candidate, state: &TherapeuticState) -> f32 {
    let fresh;
    let readiness = match state.readiness_for(&candidate.topic) {
        Some(r) => r,
        None => {
            fresh = TopicReadiness::fresh(candidate.topic.as_str());
            &fresh
        }
    };

    match readiness.layer.steps_to(candidate.target_layer) {
        0 => 0.8,
        // Being ready never scores below not being ready.
        1 if readiness.ready_for_next => 0.5 + 0.4 * readiness.confidence.clamp(0.0, 1.0),
        1 => 0.5,
        n if n < 0 => 0.6,
        // Two or more steps ahead never passes the readiness gate.
        _ => 0.0,
    }
}

/// Mean over the dimensions the candidate carries, with the weakest
/// dimension's confidence.
fn effectiveness(
    candidate: &Candidate,
    state: &TherapeuticState,
    config: &StrategyConfig,
) -> (f32, f32) {
    let mut dims = vec![dimension_effectiveness(
        &state.family_effectiveness,
        &candidate.family,
        config,
    )];
    if let Some(lens) = &candidate.lens {
        dims.push(dimension_effectiveness(&state.lens_effectiveness, lens, config));
    }
    if let Some(process) = &candidate.process {
        dims.push(dimension_effectiveness(
            &state.process_effectiveness,
            process,
            config,
        ));
    }

    let value = dims.iter().map(|(v, _)| v).sum::<f32>() / dims.len() as f32;
    let confidence = dims.iter().map(|(_, c)| *c).fold(1.0, f32::min);
    (value.clamp(0.0, 1.0), confidence)
}

fn dimension_effectiveness(
    rollup: &Rollup<Effectiveness>,
    key: &str,
    config: &StrategyConfig,
) -> (f32, f32) {
    let neutral = config.neutral_effectiveness;
    match rollup {
        Rollup::Degraded => (neutral, 0.25),
        Rollup::ColdStart => (neutral, 0.5),
        Rollup::Present(_) => match rollup.find(key) {
            None => (neutral, 0.5),
            Some(row) => {
                let raw = ((row.engagement + row.resonance) / 200.0).clamp(0.0, 1.0);
                let saturation = config.effectiveness_saturation.max(1) as f32;
                let evidence = (row.serve_count as f32 / saturation).min(1.0);
                (neutral + (raw - neutral) * evidence, 0.5 + 0.5 * evidence)
            }
        },
    }
}

fn novelty(
    candidate: &Candidate,
    state: &TherapeuticState,
    config: &StrategyConfig,
    now: DateTime<Utc>,
) -> f32 {
    let freshness = |last: Option<DateTime<Utc>>, horizon: chrono::Duration| -> f32 {
        match last {
            None => 1.0,
            Some(at) => {
                let horizon_secs = horizon.num_seconds().max(1) as f32;
                let age_secs = (now - at).num_seconds().max(0) as f32;
                (age_secs / horizon_secs).min(1.0)
            }
        }
    };

    let own = freshness(state.last_served(&candidate.id), config.recent_window());
    let family = freshness(
        state.family_last_served(&candidate.family),
        config.family_novelty_horizon(),
    );
    (own + family) / 2.0
}
