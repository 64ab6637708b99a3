#![forbid(unsafe_code)]

//! **vaultgate-rotation** – Drives the per-client credential rotation state
//! machine.
//!
//! One [`RotationController`] owns every rotation in the process. It
//! serializes all writes for a client on a per-client async lock, keeps the
//! vault authoritative (a vault-write failure aborts the transition and
//! leaves the prior version in charge), and gathers the evidence for the
//! `retire` and `complete` transitions from the token cache.
//!
//! A background reconciliation sweep advances records whose time- or
//! evidence-based conditions are met and fails any record that exceeds the
//! watchdog.

pub mod controller;
pub mod secret;
pub mod store;

use vaultgate_types::{RotationRecord, RotationState};
use vaultgate_vault::VaultError;

pub use controller::{InitiateOutcome, RotationController, RotationControllerConfig};
pub use secret::{generate_client_secret, hash_client_secret, verify_client_secret};
pub use store::{MemoryRotationStore, RotationStore};

/// Rotation failures surfaced to the admin API and the reconciler.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    /// A non-terminal rotation already holds the client's slot.
    #[error("active rotation {0} exists for client")]
    ActiveRotationExists(uuid::Uuid),
    /// No such rotation record.
    #[error("rotation {0} not found")]
    NotFound(uuid::Uuid),
    /// No such client in the vault.
    #[error("unknown client {0}")]
    UnknownClient(String),
    /// Requested transition is not an edge of the state machine.
    #[error("cannot transition from {from} to {to}")]
    InvalidTransition {
        /// State the record is in.
        from: RotationState,
        /// State that was requested.
        to: RotationState,
    },
    /// A transition condition is not yet met.
    #[error("precondition not met: {0}")]
    PreconditionFailed(String),
    /// The vault rejected or could not serve a write.
    #[error(transparent)]
    Vault(#[from] VaultError),
    /// The rotation store failed.
    #[error("rotation store error: {0}")]
    Store(String),
    /// Secret hashing failed.
    #[error("secret hashing failed: {0}")]
    Hashing(String),
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, RotationError>;

/// Convenient check used by the admin surface and tests.
pub fn is_open(record: &RotationRecord) -> bool {
    !record.state.is_terminal()
}
