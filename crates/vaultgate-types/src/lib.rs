#![forbid(unsafe_code)]

//! **vaultgate-types** – Shared domain types for the vaultgate trust plane.
//!
//! This crate owns the canonical data model that every other vaultgate crate
//! builds on: client credentials and their versions, rotation records with
//! the rotation state machine's vocabulary, the append-only audit event
//! taxonomy, the closed API error taxonomy with its HTTP mapping, and the
//! injected [`Clock`] that keeps time-dependent logic deterministic under
//! test.
//!
//! It is intentionally free of I/O and cryptography so that the service
//! crates can depend on it without dragging in their collaborators' stacks.

pub mod audit;
pub mod clock;
pub mod credential;
pub mod error;
pub mod rotation;

pub use audit::{
    AuditEvent, AuditEventType, AuditSink, FanoutAuditSink, RecordingAuditSink, RequestAudit,
    TracingAuditSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{ClientRecord, CredentialVersion, StoredCredential, mask_identifier, MAX_CLIENT_ID_LEN};
pub use error::{ErrorCode, ErrorEnvelope, GatewayError};
pub use rotation::{RotationRecord, RotationState};

/// Convenience module collecting the most commonly used exports.
pub mod prelude {
    pub use super::audit::{AuditEvent, AuditEventType, AuditSink, RequestAudit};
    pub use super::clock::{Clock, SystemClock};
    pub use super::credential::{ClientRecord, CredentialVersion};
    pub use super::error::{ErrorCode, ErrorEnvelope, GatewayError};
    pub use super::rotation::{RotationRecord, RotationState};
}
