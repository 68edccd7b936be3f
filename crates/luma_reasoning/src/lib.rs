pub mod policy;
pub mod scorer;

pub use policy::{
    choose_strategy, Clock, Contribution, NoEligible, OrchestrationMode, Orchestrator,
    RankedCandidate, Rationale, ReasonTag, Selection, SelectionRequest, SelectionResult, Strategy,
};
pub use scorer::{
    CandidateScorer, Constraints, Exclusion, ExclusionReason, FilterContext, HardFilter,
    ScoredCandidate, Scoring, SubScores,
};
