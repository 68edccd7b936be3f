use crate::state::{ArousalBand, ReadinessLayer};
use serde::{Deserialize, Serialize};

/// A catalog entry eligible for orchestration. Reference data only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    /// Topic (schema) this intervention works on.
    pub topic: String,
    pub target_layer: ReadinessLayer,
    /// Most activated band this candidate may be served in.
    /// `Green` = green-only; `Red` = tolerated even in red.
    pub safety_band: ArousalBand,
    pub family: String,
    #[serde(default)]
    pub lens: Option<String>,
    #[serde(default)]
    pub process: Option<String>,
    #[serde(default)]
    pub pillar: Option<String>,
    /// Secondary topics this candidate also addresses.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Candidate {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        family: impl Into<String>,
        target_layer: ReadinessLayer,
        safety_band: ArousalBand,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            target_layer,
            safety_band,
            family: family.into(),
            lens: None,
            process: None,
            pillar: None,
            tags: Vec::new(),
        }
    }

    pub fn with_lens(mut self, lens: impl Into<String>) -> Self {
        self.lens = Some(lens.into());
        self
    }

    pub fn with_process(mut self, process: impl Into<String>) -> Self {
        self.process = Some(process.into());
        self
    }

    pub fn with_pillar(mut self, pillar: impl Into<String>) -> Self {
        self.pillar = Some(pillar.into());
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Primary topic or any tagged secondary topic.
    pub fn covers_topic(&self, topic: &str) -> bool {
        self.topic == topic || self.tags.iter().any(|t| t == topic)
    }

    pub fn in_pillar(&self, pillar: &str) -> bool {
        self.pillar.as_deref() == Some(pillar)
    }

    /// Whether this candidate may be offered to a user currently in `band`.
    pub fn tolerates(&self, band: ArousalBand) -> bool {
        band <= self.safety_band
    }
}
