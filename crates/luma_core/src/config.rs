use crate::error::LumaError;
use crate::state::ArousalBand;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LumaConfig {
    pub strategy: StrategyConfig,
    pub engine: EngineConfig,
}

impl LumaConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: LumaConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse("LUMA_COOLDOWN_MINUTES") {
            self.strategy.cooldown_window_minutes = n;
        }
        if let Some(n) = env_parse("LUMA_LOOKBACK_MINUTES") {
            self.strategy.lookback_window_minutes = n;
        }
        if let Some(n) = env_parse("LUMA_MIN_SIGNALS") {
            self.strategy.min_signals_for_confidence = n;
        }
        if let Some(n) = env_parse("LUMA_ROLLUP_TIMEOUT_MS") {
            self.engine.rollup_timeout_ms = n;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

// ============================================================================
// Engine (runtime) config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-rollup fetch timeout.
    pub rollup_timeout_ms: u64,
    /// A computed state older than this is recomputed, never reused.
    pub state_staleness_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rollup_timeout_ms: 2_000,
            state_staleness_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn rollup_timeout(&self) -> Duration {
        Duration::from_millis(self.rollup_timeout_ms)
    }

    /// Saturates instead of wrapping for absurdly large settings.
    pub fn staleness(&self) -> chrono::Duration {
        i64::try_from(self.state_staleness_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

// ============================================================================
// Strategy config
// ============================================================================

/// Every tunable of classification and scoring, passed end-to-end.
/// Omitted fields fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub arousal_thresholds: ArousalThresholds,
    pub activation_weights: ActivationWeights,
    /// Minimum composite delta between window halves to call a trend.
    pub trend_epsilon: f32,

    pub sub_score_weights: SubScoreWeights,
    pub band_overrides: BandOverrides,

    pub cooldown_window_minutes: u32,
    pub min_signals_for_confidence: usize,
    /// Signal count at which classifier confidence reaches 1.0.
    pub confidence_saturation: usize,
    pub lookback_window_minutes: u32,

    /// Heat (0-100) above which heat fit stops increasing.
    pub heat_ceiling: f32,
    /// Effectiveness sub-score used when there is no history.
    pub neutral_effectiveness: f32,
    /// Serve count at which a family/lens/process row is fully trusted.
    pub effectiveness_saturation: u32,
    /// Window the recent-serve rollup covers.
    pub recent_window_minutes: u32,
    /// Age at which a family counts as fully fresh again.
    pub family_novelty_hours: u32,

    /// Topic heat at which a topic counts as active.
    pub active_heat_threshold: f32,
    /// Mean resistance that forces the rescue strategy.
    pub rescue_resistance: f32,
    /// Multiplier the chosen strategy applies to its emphasised weight.
    pub strategy_emphasis: f32,
    pub runner_up_limit: usize,

    /// Longest run of back-to-back serves from one family before that family
    /// is held out. 0 disables the rule.
    pub max_same_family_consecutive: u32,
    /// Optional per-band family allow-lists.
    pub family_gates: FamilyGates,
    /// Score added, scaled by how many request hints match, for candidates
    /// carrying a preferred lens or process.
    pub preference_bonus: f32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            arousal_thresholds: ArousalThresholds::default(),
            activation_weights: ActivationWeights::default(),
            trend_epsilon: 0.5,
            sub_score_weights: SubScoreWeights::default(),
            band_overrides: BandOverrides::default(),
            cooldown_window_minutes: 30,
            min_signals_for_confidence: 3,
            confidence_saturation: 10,
            lookback_window_minutes: 30,
            heat_ceiling: 80.0,
            neutral_effectiveness: 0.5,
            effectiveness_saturation: 5,
            recent_window_minutes: 30,
            family_novelty_hours: 4,
            active_heat_threshold: 60.0,
            rescue_resistance: 8.0,
            strategy_emphasis: 1.25,
            runner_up_limit: 10,
            max_same_family_consecutive: 2,
            family_gates: FamilyGates::default(),
            preference_bonus: 0.1,
        }
    }
}

impl StrategyConfig {
    /// Weights that apply while the user is in `band`.
    pub fn weights_for(&self, band: ArousalBand) -> SubScoreWeights {
        let overridden = match band {
            ArousalBand::Green => None,
            ArousalBand::Amber => self.band_overrides.amber,
            ArousalBand::Red => self.band_overrides.red,
        };
        overridden.unwrap_or(self.sub_score_weights)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lookback_window_minutes as i64)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_window_minutes as i64)
    }

    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.recent_window_minutes as i64)
    }

    pub fn family_novelty_horizon(&self) -> chrono::Duration {
        chrono::Duration::hours(self.family_novelty_hours as i64)
    }

    /// Reject configurations that would make scoring meaningless.
    pub fn validate(&self) -> Result<(), LumaError> {
        let t = &self.arousal_thresholds;
        if !(t.green_max.is_finite() && t.amber_max.is_finite()) || t.green_max > t.amber_max {
            return Err(LumaError::InvalidConfig(format!(
                "arousal thresholds must satisfy green_max <= amber_max (got {} / {})",
                t.green_max, t.amber_max
            )));
        }
        if !self.activation_weights.is_valid() {
            return Err(LumaError::InvalidConfig(
                "activation weights must be finite, non-negative and not all zero".to_string(),
            ));
        }
        let weight_sets = [
            ("sub_score_weights", Some(self.sub_score_weights)),
            ("band_overrides.amber", self.band_overrides.amber),
            ("band_overrides.red", self.band_overrides.red),
        ];
        for (name, weights) in weight_sets {
            if let Some(w) = weights {
                if !w.is_valid() {
                    return Err(LumaError::InvalidConfig(format!(
                        "{} must be finite, non-negative and not all zero",
                        name
                    )));
                }
            }
        }
        if !(self.heat_ceiling > 0.0) {
            return Err(LumaError::InvalidConfig("heat_ceiling must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.neutral_effectiveness) {
            return Err(LumaError::InvalidConfig(
                "neutral_effectiveness must be within [0, 1]".to_string(),
            ));
        }
        if !(self.strategy_emphasis.is_finite() && self.strategy_emphasis >= 1.0) {
            return Err(LumaError::InvalidConfig(
                "strategy_emphasis must be >= 1.0".to_string(),
            ));
        }
        if !(self.trend_epsilon.is_finite() && self.trend_epsilon >= 0.0) {
            return Err(LumaError::InvalidConfig(
                "trend_epsilon must be finite and non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.preference_bonus) {
            return Err(LumaError::InvalidConfig(
                "preference_bonus must be within [0, 1]".to_string(),
            ));
        }
        if self.confidence_saturation == 0 || self.min_signals_for_confidence > self.confidence_saturation {
            return Err(LumaError::InvalidConfig(
                "confidence_saturation must be >= min_signals_for_confidence and > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Band cut-offs on the composite activation scale (0-10).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArousalThresholds {
    pub green_max: f32,
    pub amber_max: f32,
}

impl Default for ArousalThresholds {
    fn default() -> Self {
        Self {
            green_max: 4.0,
            amber_max: 6.5,
        }
    }
}

/// Contribution of each signal to the composite activation score.
/// `choice_access` and `connection` contribute inverted (`10 - v`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationWeights {
    pub shame_threat: f32,
    pub resistance: f32,
    pub fusion: f32,
    pub choice_access: f32,
    pub connection: f32,
}

impl Default for ActivationWeights {
    fn default() -> Self {
        Self {
            shame_threat: 0.30,
            resistance: 0.30,
            fusion: 0.10,
            choice_access: 0.15,
            connection: 0.15,
        }
    }
}

impl ActivationWeights {
    pub fn as_array(&self) -> [f32; 5] {
        [
            self.fusion,
            self.resistance,
            self.choice_access,
            self.shame_threat,
            self.connection,
        ]
    }

    fn is_valid(&self) -> bool {
        weights_valid(&self.as_array())
    }
}

/// The five named sub-scores of candidate scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubScoreKind {
    HeatFit,
    ReadinessFit,
    FamilyEffectiveness,
    Novelty,
    RotationUrgency,
}

impl SubScoreKind {
    pub const ALL: [SubScoreKind; 5] = [
        SubScoreKind::HeatFit,
        SubScoreKind::ReadinessFit,
        SubScoreKind::FamilyEffectiveness,
        SubScoreKind::Novelty,
        SubScoreKind::RotationUrgency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubScoreKind::HeatFit => "heat_fit",
            SubScoreKind::ReadinessFit => "readiness_fit",
            SubScoreKind::FamilyEffectiveness => "family_effectiveness",
            SubScoreKind::Novelty => "novelty",
            SubScoreKind::RotationUrgency => "rotation_urgency",
        }
    }
}

impl std::fmt::Display for SubScoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubScoreWeights {
    pub heat_fit: f32,
    pub readiness_fit: f32,
    pub family_effectiveness: f32,
    pub novelty: f32,
    pub rotation_urgency: f32,
}

impl Default for SubScoreWeights {
    fn default() -> Self {
        Self {
            heat_fit: 0.30,
            readiness_fit: 0.20,
            family_effectiveness: 0.20,
            novelty: 0.15,
            rotation_urgency: 0.15,
        }
    }
}

impl SubScoreWeights {
    /// Red-band profile: engagement fit dominates, rotation and novelty recede.
    pub fn red_band() -> Self {
        Self {
            heat_fit: 0.15,
            readiness_fit: 0.20,
            family_effectiveness: 0.50,
            novelty: 0.05,
            rotation_urgency: 0.10,
        }
    }

    pub fn get(&self, kind: SubScoreKind) -> f32 {
        match kind {
            SubScoreKind::HeatFit => self.heat_fit,
            SubScoreKind::ReadinessFit => self.readiness_fit,
            SubScoreKind::FamilyEffectiveness => self.family_effectiveness,
            SubScoreKind::Novelty => self.novelty,
            SubScoreKind::RotationUrgency => self.rotation_urgency,
        }
    }

    fn get_mut(&mut self, kind: SubScoreKind) -> &mut f32 {
        match kind {
            SubScoreKind::HeatFit => &mut self.heat_fit,
            SubScoreKind::ReadinessFit => &mut self.readiness_fit,
            SubScoreKind::FamilyEffectiveness => &mut self.family_effectiveness,
            SubScoreKind::Novelty => &mut self.novelty,
            SubScoreKind::RotationUrgency => &mut self.rotation_urgency,
        }
    }

    /// Copy with `kind` multiplied by `factor`.
    pub fn emphasize(mut self, kind: SubScoreKind, factor: f32) -> Self {
        *self.get_mut(kind) *= factor;
        self
    }

    /// Copy scaled so the weights sum to 1.
    pub fn normalized(self) -> Self {
        let total: f32 = SubScoreKind::ALL.iter().map(|k| self.get(*k)).sum();
        if total <= 0.0 || !total.is_finite() {
            return self;
        }
        let mut out = self;
        for kind in SubScoreKind::ALL {
            *out.get_mut(kind) /= total;
        }
        out
    }

    fn is_valid(&self) -> bool {
        let values: Vec<f32> = SubScoreKind::ALL.iter().map(|k| self.get(*k)).collect();
        weights_valid(&values)
    }
}

fn weights_valid(values: &[f32]) -> bool {
    values.iter().all(|w| w.is_finite() && *w >= 0.0) && values.iter().any(|w| *w > 0.0)
}

/// Band-specific weight profiles. `None` falls back to the base weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandOverrides {
    pub amber: Option<SubScoreWeights>,
    pub red: Option<SubScoreWeights>,
}

impl Default for BandOverrides {
    fn default() -> Self {
        Self {
            amber: None,
            red: Some(SubScoreWeights::red_band()),
        }
    }
}

/// Families allowed per band. `None` leaves the band ungated; an empty list
/// admits nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyGates {
    pub green: Option<Vec<String>>,
    pub amber: Option<Vec<String>>,
    pub red: Option<Vec<String>>,
}

impl FamilyGates {
    pub fn allowed(&self, band: ArousalBand) -> Option<&[String]> {
        match band {
            ArousalBand::Green => self.green.as_deref(),
            ArousalBand::Amber => self.amber.as_deref(),
            ArousalBand::Red => self.red.as_deref(),
        }
    }

    pub fn admits(&self, band: ArousalBand, family: &str) -> bool {
        self.allowed(band)
            .map_or(true, |families| families.iter().any(|f| f == family))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = LumaConfig::default();
        assert_eq!(cfg.strategy.cooldown_window_minutes, 30);
        assert_eq!(cfg.strategy.lookback_window_minutes, 30);
        assert_eq!(cfg.strategy.min_signals_for_confidence, 3);
        assert_eq!(cfg.engine.rollup_timeout_ms, 2_000);
        assert!(cfg.strategy.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[strategy]
cooldown_window_minutes = 45
"#;
        let cfg: LumaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.strategy.cooldown_window_minutes, 45);
        // Defaults for unspecified fields
        assert_eq!(cfg.strategy.min_signals_for_confidence, 3);
        assert_eq!(cfg.strategy.arousal_thresholds.amber_max, 6.5);
        assert_eq!(cfg.engine.state_staleness_secs, 300);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[strategy]
trend_epsilon = 0.25
lookback_window_minutes = 60
min_signals_for_confidence = 2

[strategy.arousal_thresholds]
green_max = 3.0
amber_max = 7.0

[strategy.sub_score_weights]
heat_fit = 0.4
readiness_fit = 0.2
family_effectiveness = 0.2
novelty = 0.1
rotation_urgency = 0.1

[strategy.band_overrides.amber]
heat_fit = 0.2
novelty = 0.05

[engine]
rollup_timeout_ms = 500
state_staleness_secs = 60
"#;
        let cfg: LumaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.strategy.arousal_thresholds.green_max, 3.0);
        assert_eq!(cfg.strategy.sub_score_weights.heat_fit, 0.4);
        let amber = cfg.strategy.band_overrides.amber.unwrap();
        assert_eq!(amber.heat_fit, 0.2);
        assert_eq!(amber.novelty, 0.05);
        // Unspecified fields in an override take the base defaults
        assert_eq!(amber.readiness_fit, 0.20);
        // Red override untouched
        assert_eq!(cfg.strategy.band_overrides.red, Some(SubScoreWeights::red_band()));
        assert_eq!(cfg.engine.rollup_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_weights_for_band() {
        let cfg = StrategyConfig::default();
        assert_eq!(cfg.weights_for(ArousalBand::Green), cfg.sub_score_weights);
        assert_eq!(cfg.weights_for(ArousalBand::Amber), cfg.sub_score_weights);
        let red = cfg.weights_for(ArousalBand::Red);
        assert!(red.novelty < cfg.sub_score_weights.novelty);
        assert!(red.rotation_urgency < cfg.sub_score_weights.rotation_urgency);
    }

    #[test]
    fn test_normalized_and_emphasize() {
        let w = SubScoreWeights::default().emphasize(SubScoreKind::Novelty, 2.0).normalized();
        let total: f32 = SubScoreKind::ALL.iter().map(|k| w.get(*k)).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(w.novelty > w.rotation_urgency);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut cfg = StrategyConfig::default();
        cfg.arousal_thresholds = ArousalThresholds { green_max: 7.0, amber_max: 5.0 };
        assert!(matches!(cfg.validate(), Err(LumaError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_trend_epsilon() {
        for epsilon in [f32::NAN, f32::INFINITY, -0.1] {
            let mut cfg = StrategyConfig::default();
            cfg.trend_epsilon = epsilon;
            assert!(
                matches!(cfg.validate(), Err(LumaError::InvalidConfig(_))),
                "accepted trend_epsilon {}",
                epsilon
            );
        }
        let mut cfg = StrategyConfig::default();
        cfg.trend_epsilon = 0.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_preference_bonus() {
        let mut cfg = StrategyConfig::default();
        cfg.preference_bonus = 1.5;
        assert!(cfg.validate().is_err());
        cfg.preference_bonus = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_staleness_saturates() {
        let engine = EngineConfig {
            state_staleness_secs: u64::MAX,
            ..EngineConfig::default()
        };
        assert_eq!(engine.staleness(), chrono::Duration::MAX);
        assert!(engine.staleness() > chrono::Duration::zero());

        let engine = EngineConfig {
            state_staleness_secs: 90,
            ..EngineConfig::default()
        };
        assert_eq!(engine.staleness(), chrono::Duration::seconds(90));
    }

    #[test]
    fn test_family_gates() {
        let toml_str = r#"
[strategy.family_gates]
red = ["grip_scan", "proof_stamp"]
amber = []
"#;
        let cfg: LumaConfig = toml::from_str(toml_str).unwrap();
        let gates = &cfg.strategy.family_gates;
        assert!(gates.admits(ArousalBand::Red, "grip_scan"));
        assert!(!gates.admits(ArousalBand::Red, "paradox_key"));
        assert!(!gates.admits(ArousalBand::Amber, "grip_scan"));
        assert!(gates.admits(ArousalBand::Green, "paradox_key"));
        assert_eq!(cfg.strategy.max_same_family_consecutive, 2);
    }

    #[test]
    fn test_validate_rejects_zero_weights() {
        let mut cfg = StrategyConfig::default();
        cfg.sub_score_weights = SubScoreWeights {
            heat_fit: 0.0,
            readiness_fit: 0.0,
            family_effectiveness: 0.0,
            novelty: 0.0,
            rotation_urgency: 0.0,
        };
        assert!(cfg.validate().is_err());

        let mut cfg = StrategyConfig::default();
        cfg.activation_weights.connection = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        std::env::set_var("LUMA_COOLDOWN_MINUTES", "15");
        std::env::set_var("LUMA_MIN_SIGNALS", "not-a-number");

        let mut cfg = LumaConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.strategy.cooldown_window_minutes, 15);
        assert_eq!(cfg.strategy.min_signals_for_confidence, 3);

        std::env::remove_var("LUMA_COOLDOWN_MINUTES");
        std::env::remove_var("LUMA_MIN_SIGNALS");

        let cfg = LumaConfig::load_or_default("/nonexistent/luma.toml");
        assert_eq!(cfg.strategy.cooldown_window_minutes, 30);
    }
}
