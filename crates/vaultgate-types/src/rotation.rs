//! Rotation state machine vocabulary.
//!
//! ```text
//!         initiate                   promote               retire
//!  none ───────────▶ INITIATED ─────────▶ DUAL_ACTIVE ───────────▶ OLD_DEPRECATED ─────▶ NEW_ACTIVE
//!                        │                    │                          │
//!                        ▼                    ▼                          ▼
//!                      FAILED              FAILED                     FAILED
//! ```
//!
//! The controller in `vaultgate-rotation` drives these transitions; this
//! module only defines the record shape and which edges exist.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of an ongoing or historical credential rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationState {
    /// New version written to the vault, not yet valid for authentication.
    Initiated,
    /// Both versions valid; the authenticator accepts either.
    DualActive,
    /// Old version accepted for in-flight tokens only; mints use the new version.
    OldDeprecated,
    /// Terminal: old version removed, only the new one accepted.
    NewActive,
    /// Terminal: rotation aborted, old version remains authoritative.
    Failed,
}

impl RotationState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RotationState::NewActive | RotationState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: RotationState) -> bool {
        use RotationState::*;
        match (self, next) {
            (Initiated, DualActive) => true,
            (DualActive, OldDeprecated) => true,
            (OldDeprecated, NewActive) => true,
            (Initiated | DualActive | OldDeprecated, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RotationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RotationState::Initiated => "INITIATED",
            RotationState::DualActive => "DUAL_ACTIVE",
            RotationState::OldDeprecated => "OLD_DEPRECATED",
            RotationState::NewActive => "NEW_ACTIVE",
            RotationState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One rotation of one client's credential.
///
/// At most one non-terminal record exists per client; a `forced` rotation
/// supersedes the previous record by failing it with `superseded_by` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRecord {
    /// Unique rotation identifier.
    pub rotation_id: Uuid,
    /// Client whose credential is rotating.
    pub client_id: String,
    /// Current state.
    pub state: RotationState,
    /// Version tag being retired.
    pub old_version: String,
    /// Version tag being introduced.
    pub new_version: String,
    /// When the rotation was initiated.
    pub started_at: DateTime<Utc>,
    /// Set exactly once, when the record reaches `NEW_ACTIVE`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Minimum duration of the dual-validity window.
    #[serde(with = "duration_seconds")]
    pub transition_window: Duration,
    /// Operator-supplied reason.
    pub reason: String,
    /// Whether this rotation superseded a prior non-terminal one.
    pub forced: bool,
    /// Free-form progress / failure message.
    pub message: String,
    /// Rotation that superseded this one, if any.
    pub superseded_by: Option<Uuid>,
}

impl RotationRecord {
    /// Start a fresh record in `INITIATED`.
    pub fn new(
        client_id: impl Into<String>,
        old_version: impl Into<String>,
        new_version: impl Into<String>,
        transition_window: Duration,
        reason: impl Into<String>,
        forced: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            rotation_id: Uuid::new_v4(),
            client_id: client_id.into(),
            state: RotationState::Initiated,
            old_version: old_version.into(),
            new_version: new_version.into(),
            started_at,
            completed_at: None,
            transition_window,
            reason: reason.into(),
            forced,
            message: String::new(),
            superseded_by: None,
        }
    }

    /// Whether the record still holds the client's rotation slot.
    pub fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Serialize `chrono::Duration` as whole seconds for wire/record use.
mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.num_seconds().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(Duration::seconds(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_edges() {
        for next in [
            RotationState::Initiated,
            RotationState::DualActive,
            RotationState::OldDeprecated,
            RotationState::NewActive,
            RotationState::Failed,
        ] {
            assert!(!RotationState::NewActive.can_transition_to(next));
            assert!(!RotationState::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn happy_path_edges() {
        assert!(RotationState::Initiated.can_transition_to(RotationState::DualActive));
        assert!(RotationState::DualActive.can_transition_to(RotationState::OldDeprecated));
        assert!(RotationState::OldDeprecated.can_transition_to(RotationState::NewActive));
    }

    #[test]
    fn no_skipping_states() {
        assert!(!RotationState::Initiated.can_transition_to(RotationState::OldDeprecated));
        assert!(!RotationState::Initiated.can_transition_to(RotationState::NewActive));
        assert!(!RotationState::DualActive.can_transition_to(RotationState::NewActive));
    }

    #[test]
    fn every_open_state_can_fail() {
        for state in [
            RotationState::Initiated,
            RotationState::DualActive,
            RotationState::OldDeprecated,
        ] {
            assert!(state.can_transition_to(RotationState::Failed));
        }
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = RotationRecord::new(
            "vendor-A",
            "v1",
            "v2",
            Duration::seconds(60),
            "scheduled",
            false,
            Utc::now(),
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: RotationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.transition_window, Duration::seconds(60));
    }
}
