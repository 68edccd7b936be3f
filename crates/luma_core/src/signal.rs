//! The five universal affect signals and the event envelope every
//! micro-intervention interaction produces.
//!
//! Raw events arrive with optional fields (whatever the client sent) and are
//! validated once into a [`SignalEvent`]. Downstream components only ever see
//! validated events, so every signal they read is finite and within [0, 10].

use crate::error::SignalError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lower bound of every signal scale.
pub const SIGNAL_MIN: f32 = 0.0;
/// Upper bound of every signal scale.
pub const SIGNAL_MAX: f32 = 10.0;
/// Midpoint of the signal scale.
pub const SIGNAL_MIDPOINT: f32 = 5.0;

/// One of the five universal signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Identification with the triggering thought ("the story is me").
    Fusion,
    /// Unwillingness to stay with the experience.
    Resistance,
    /// Felt ability to pause and choose.
    ChoiceAccess,
    /// Activation / threat intensity.
    ShameThreat,
    /// Co-regulation and social presence.
    Connection,
}

impl SignalKind {
    pub const ALL: [SignalKind; 5] = [
        SignalKind::Fusion,
        SignalKind::Resistance,
        SignalKind::ChoiceAccess,
        SignalKind::ShameThreat,
        SignalKind::Connection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Fusion => "fusion",
            SignalKind::Resistance => "resistance",
            SignalKind::ChoiceAccess => "choice_access",
            SignalKind::ShameThreat => "shame_threat",
            SignalKind::Connection => "connection",
        }
    }

    /// Whether a high value of this signal means the user is *less* activated.
    pub fn is_regulating(&self) -> bool {
        matches!(self, SignalKind::ChoiceAccess | SignalKind::Connection)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A full set of validated signal values, each in [0, 10].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalValues {
    pub fusion: f32,
    pub resistance: f32,
    pub choice_access: f32,
    pub shame_threat: f32,
    pub connection: f32,
}

impl Default for SignalValues {
    /// Midpoint on every scale.
    fn default() -> Self {
        Self {
            fusion: SIGNAL_MIDPOINT,
            resistance: SIGNAL_MIDPOINT,
            choice_access: SIGNAL_MIDPOINT,
            shame_threat: SIGNAL_MIDPOINT,
            connection: SIGNAL_MIDPOINT,
        }
    }
}

impl SignalValues {
    /// Build a value set, rejecting anything outside [0, 10] (NaN included).
    pub fn new(
        fusion: f32,
        resistance: f32,
        choice_access: f32,
        shame_threat: f32,
        connection: f32,
    ) -> Result<Self, SignalError> {
        let values = Self {
            fusion,
            resistance,
            choice_access,
            shame_threat,
            connection,
        };
        values.validate()?;
        Ok(values)
    }

    pub fn get(&self, kind: SignalKind) -> f32 {
        match kind {
            SignalKind::Fusion => self.fusion,
            SignalKind::Resistance => self.resistance,
            SignalKind::ChoiceAccess => self.choice_access,
            SignalKind::ShameThreat => self.shame_threat,
            SignalKind::Connection => self.connection,
        }
    }

    fn validate(&self) -> Result<(), SignalError> {
        for kind in SignalKind::ALL {
            check_range(kind, self.get(kind))?;
        }
        Ok(())
    }

    /// Arithmetic mean of each signal. `None` for an empty iterator.
    pub fn mean<'a, I>(values: I) -> Option<SignalValues>
    where
        I: IntoIterator<Item = &'a SignalValues>,
    {
        let mut sum = [0.0f64; 5];
        let mut n = 0usize;
        for v in values {
            for (slot, kind) in sum.iter_mut().zip(SignalKind::ALL) {
                *slot += v.get(kind) as f64;
            }
            n += 1;
        }
        if n == 0 {
            return None;
        }
        let avg = |i: usize| (sum[i] / n as f64) as f32;
        Some(SignalValues {
            fusion: avg(0),
            resistance: avg(1),
            choice_access: avg(2),
            shame_threat: avg(3),
            connection: avg(4),
        })
    }
}

fn check_range(kind: SignalKind, value: f32) -> Result<(), SignalError> {
    if value.is_finite() && (SIGNAL_MIN..=SIGNAL_MAX).contains(&value) {
        Ok(())
    } else {
        Err(SignalError::InvalidSignalRange {
            signal: kind,
            value,
        })
    }
}

/// A validated signal recording. Immutable once constructed.
///
/// Serializes flat, in the same shape [`RawSignalEvent`] deserializes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalEvent {
    user_id: String,
    intervention_id: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    signals: SignalValues,
}

impl SignalEvent {
    pub fn new(
        user_id: impl Into<String>,
        intervention_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        signals: SignalValues,
    ) -> Result<Self, SignalError> {
        RawSignalEvent {
            user_id: Some(user_id.into()),
            intervention_id: Some(intervention_id.into()),
            timestamp: Some(timestamp),
            fusion: Some(signals.fusion),
            resistance: Some(signals.resistance),
            choice_access: Some(signals.choice_access),
            shame_threat: Some(signals.shame_threat),
            connection: Some(signals.connection),
        }
        .validate()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn intervention_id(&self) -> &str {
        &self.intervention_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn signals(&self) -> &SignalValues {
        &self.signals
    }
}

impl<'de> Deserialize<'de> for SignalEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawSignalEvent::deserialize(deserializer)?;
        raw.validate().map_err(serde::de::Error::custom)
    }
}

/// An event as it arrives from a client, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSignalEvent {
    pub user_id: Option<String>,
    pub intervention_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub fusion: Option<f32>,
    pub resistance: Option<f32>,
    pub choice_access: Option<f32>,
    pub shame_threat: Option<f32>,
    pub connection: Option<f32>,
}

impl RawSignalEvent {
    /// Validate into an immutable [`SignalEvent`].
    pub fn validate(self) -> Result<SignalEvent, SignalError> {
        let user_id = require_id(self.user_id, "user_id")?;
        let intervention_id = require_id(self.intervention_id, "intervention_id")?;
        let timestamp = self.timestamp.ok_or(SignalError::MissingField("timestamp"))?;

        let signal = |kind: SignalKind, value: Option<f32>| -> Result<f32, SignalError> {
            let value = value.ok_or(SignalError::MissingField(kind.as_str()))?;
            check_range(kind, value)?;
            Ok(value)
        };

        let signals = SignalValues {
            fusion: signal(SignalKind::Fusion, self.fusion)?,
            resistance: signal(SignalKind::Resistance, self.resistance)?,
            choice_access: signal(SignalKind::ChoiceAccess, self.choice_access)?,
            shame_threat: signal(SignalKind::ShameThreat, self.shame_threat)?,
            connection: signal(SignalKind::Connection, self.connection)?,
        };

        Ok(SignalEvent {
            user_id,
            intervention_id,
            timestamp,
            signals,
        })
    }
}

impl TryFrom<RawSignalEvent> for SignalEvent {
    type Error = SignalError;

    fn try_from(raw: RawSignalEvent) -> Result<Self, Self::Error> {
        raw.validate()
    }
}

fn require_id(value: Option<String>, field: &'static str) -> Result<String, SignalError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SignalError::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw() -> RawSignalEvent {
        RawSignalEvent {
            user_id: Some("u1".to_string()),
            intervention_id: Some("nc.2345".to_string()),
            timestamp: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
            fusion: Some(4.0),
            resistance: Some(3.0),
            choice_access: Some(7.0),
            shame_threat: Some(2.0),
            connection: Some(6.0),
        }
    }

    #[test]
    fn test_valid_event_passes() {
        let event = raw().validate().unwrap();
        assert_eq!(event.user_id(), "u1");
        assert_eq!(event.intervention_id(), "nc.2345");
        assert_eq!(event.signals().choice_access, 7.0);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let mut r = raw();
        r.fusion = Some(0.0);
        r.resistance = Some(10.0);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut r = raw();
        r.shame_threat = Some(10.5);
        match r.validate() {
            Err(SignalError::InvalidSignalRange { signal, value }) => {
                assert_eq!(signal, SignalKind::ShameThreat);
                assert_eq!(value, 10.5);
            }
            other => panic!("Expected InvalidSignalRange, got {:?}", other),
        }

        let mut r = raw();
        r.connection = Some(-0.1);
        assert!(matches!(
            r.validate(),
            Err(SignalError::InvalidSignalRange { .. })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let mut r = raw();
        r.resistance = Some(f32::NAN);
        assert!(matches!(
            r.validate(),
            Err(SignalError::InvalidSignalRange { signal: SignalKind::Resistance, .. })
        ));
    }

    #[test]
    fn test_missing_envelope_fields_rejected() {
        let mut r = raw();
        r.timestamp = None;
        assert_eq!(r.validate(), Err(SignalError::MissingField("timestamp")));

        let mut r = raw();
        r.user_id = Some("   ".to_string());
        assert_eq!(r.validate(), Err(SignalError::MissingField("user_id")));

        let mut r = raw();
        r.intervention_id = None;
        assert_eq!(r.validate(), Err(SignalError::MissingField("intervention_id")));
    }

    #[test]
    fn test_missing_signal_rejected() {
        let mut r = raw();
        r.connection = None;
        assert_eq!(r.validate(), Err(SignalError::MissingField("connection")));
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{
            "user_id": "u1",
            "intervention_id": "nc.1",
            "timestamp": "2026-03-01T12:00:00Z",
            "fusion": 1, "resistance": 2, "choice_access": 3,
            "shame_threat": 42, "connection": 5
        }"#;
        let err = serde_json::from_str::<SignalEvent>(json).unwrap_err();
        assert!(err.to_string().contains("shame_threat"), "got: {}", err);
    }

    #[test]
    fn test_mean() {
        let a = SignalValues::new(0.0, 2.0, 4.0, 6.0, 8.0).unwrap();
        let b = SignalValues::new(10.0, 4.0, 6.0, 8.0, 10.0).unwrap();
        let m = SignalValues::mean([&a, &b]).unwrap();
        assert!((m.fusion - 5.0).abs() < 1e-6);
        assert!((m.resistance - 3.0).abs() < 1e-6);
        assert!((m.connection - 9.0).abs() < 1e-6);
        assert!(SignalValues::mean(std::iter::empty::<&SignalValues>()).is_none());
    }
}
