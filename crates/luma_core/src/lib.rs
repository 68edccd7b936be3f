pub mod candidate;
pub mod config;
pub mod error;
pub mod signal;
pub mod state;
pub mod telemetry;

pub use candidate::Candidate;
pub use config::{
    ActivationWeights, ArousalThresholds, BandOverrides, EngineConfig, FamilyGates, LumaConfig,
    StrategyConfig, SubScoreKind, SubScoreWeights,
};
pub use error::{LumaError, LumaResult, SignalError};
pub use signal::{RawSignalEvent, SignalEvent, SignalKind, SignalValues};
pub use state::{
    ArousalBand, ArousalReading, ArousalTrend, DeficitKind, Effectiveness, ReadinessLayer,
    RecentServe, Rollup, RotationDeficit, TherapeuticState, TopicHeat, TopicReadiness,
};
pub use telemetry::{EffectivenessDimension, RollupKind, TelemetryStore};
