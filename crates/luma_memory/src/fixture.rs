//! JSON session fixtures: a catalog plus a recorded history, replayed into an
//! [`InMemoryTelemetry`].

use crate::store::{InMemoryTelemetry, InteractionRecord, ServeRecord, TelemetryConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use luma_core::candidate::Candidate;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFixture {
    /// Clock the session is evaluated at.
    pub now: DateTime<Utc>,
    pub catalog: Vec<Candidate>,
    #[serde(default)]
    pub interactions: Vec<InteractionRecord>,
    #[serde(default)]
    pub serves: Vec<ServeRecord>,
    #[serde(default)]
    pub tracked_families: Vec<String>,
    #[serde(default)]
    pub tracked_topics: Vec<String>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl SessionFixture {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read fixture: {}", path.as_ref().display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture: {}", path.as_ref().display()))
    }

    /// Build a store holding this fixture's history, clock pinned to `now`.
    pub async fn to_store(&self) -> InMemoryTelemetry {
        let store = InMemoryTelemetry::with_config(self.telemetry.clone());
        store.pin_clock(self.now).await;
        store.track_families(self.tracked_families.iter().cloned()).await;
        store.track_topics(self.tracked_topics.iter().cloned()).await;
        // Catalog families count as tracked for rotation.
        store
            .track_families(self.catalog.iter().map(|c| c.family.clone()))
            .await;
        for record in &self.interactions {
            store.record_interaction(record.clone()).await;
        }
        for serve in &self.serves {
            store.record_serve(serve.clone()).await;
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luma_core::telemetry::TelemetryStore;

    const FIXTURE: &str = r#"{
        "now": "2026-03-01T12:00:00Z",
        "catalog": [
            { "id": "nc.1", "topic": "shame", "target_layer": "knowing",
              "safety_band": "red", "family": "grip_scan" }
        ],
        "interactions": [
            { "user_id": "u1", "intervention_id": "nc.1", "timestamp": "2026-03-01T11:50:00Z",
              "fusion": 4, "resistance": 3, "choice_access": 7, "shame_threat": 2, "connection": 6,
              "topic": "shame", "family": "grip_scan", "layer": "knowing", "completed": true }
        ],
        "tracked_families": ["sangha_ping"]
    }"#;

    #[tokio::test]
    async fn test_fixture_replays_into_store() {
        let fixture: SessionFixture = serde_json::from_str(FIXTURE).unwrap();
        assert_eq!(fixture.catalog.len(), 1);

        let store = fixture.to_store().await;
        let heat = store.topic_heat("u1").await.unwrap();
        assert_eq!(heat.len(), 1);

        // Both the explicit and the catalog family are tracked; neither was served
        let deficits = store.rotation_deficits("u1").await.unwrap();
        assert!(deficits.iter().any(|d| d.key == "sangha_ping"));
        assert!(deficits.iter().any(|d| d.key == "grip_scan"));
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = SessionFixture::load("/nonexistent/session.json").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read fixture"));
    }
}
