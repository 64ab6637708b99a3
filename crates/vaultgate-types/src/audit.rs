//! Append-only audit events.
//!
//! Every security-relevant action emits one [`AuditEvent`] through an
//! [`AuditSink`]. Events carry masked identifiers only – secrets, full
//! tokens, and full client identifiers never appear. Within one request the
//! `sequence` field is monotonic; across requests only causal ordering is
//! guaranteed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::credential::mask_identifier;

/// Closed taxonomy of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    /// Vendor credentials accepted.
    AuthSuccess,
    /// Vendor credentials rejected.
    AuthFailure,
    /// A new token was minted.
    TokenIssued,
    /// A presented token passed validation.
    TokenValidated,
    /// A near-expiry token was replaced by a fresh one.
    TokenRenewed,
    /// A presented token failed validation.
    TokenRejected,
    /// A rotation was initiated.
    RotationStarted,
    /// A rotation advanced to its next state.
    RotationAdvanced,
    /// A rotation reached `NEW_ACTIVE`.
    RotationCompleted,
    /// A rotation landed in `FAILED`.
    RotationFailed,
    /// Vault reads are being served from cache because the vault is down.
    VaultDegraded,
    /// The vault service identity expired and could not be refreshed.
    VaultIdentityExpired,
    /// An outbound operation was cancelled by the request deadline.
    OperationCancelled,
}

impl AuditEventType {
    /// Wire form (`AUTH_SUCCESS`, `ROTATION_STARTED`, …).
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::AuthSuccess => "AUTH_SUCCESS",
            AuditEventType::AuthFailure => "AUTH_FAILURE",
            AuditEventType::TokenIssued => "TOKEN_ISSUED",
            AuditEventType::TokenValidated => "TOKEN_VALIDATED",
            AuditEventType::TokenRenewed => "TOKEN_RENEWED",
            AuditEventType::TokenRejected => "TOKEN_REJECTED",
            AuditEventType::RotationStarted => "ROTATION_STARTED",
            AuditEventType::RotationAdvanced => "ROTATION_ADVANCED",
            AuditEventType::RotationCompleted => "ROTATION_COMPLETED",
            AuditEventType::RotationFailed => "ROTATION_FAILED",
            AuditEventType::VaultDegraded => "VAULT_DEGRADED",
            AuditEventType::VaultIdentityExpired => "VAULT_IDENTITY_EXPIRED",
            AuditEventType::OperationCancelled => "OPERATION_CANCELLED",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Taxonomized event type.
    pub event_type: AuditEventType,
    /// Client involved, if any. Stored unmasked for correlation; sinks that
    /// leave the trust boundary must mask it with [`mask_identifier`].
    pub client_id: Option<String>,
    /// Masked token identifier (`abcd***wxyz`), if a token was involved.
    pub token_id_mask: Option<String>,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Request the event belongs to.
    pub request_id: Uuid,
    /// Monotonic sequence within the request.
    pub sequence: u64,
    /// Additional safe attributes.
    pub attributes: HashMap<String, String>,
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one event. Sinks are best-effort: a failing sink must not
    /// fail the request that emitted the event.
    async fn record(&self, event: AuditEvent);
}

/// Sink that emits events as structured tracing records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        let client = event.client_id.as_deref().map(mask_identifier);
        match event.event_type {
            AuditEventType::AuthFailure
            | AuditEventType::TokenRejected
            | AuditEventType::RotationFailed
            | AuditEventType::VaultDegraded
            | AuditEventType::VaultIdentityExpired => {
                warn!(
                    event_type = event.event_type.as_str(),
                    client_id = client.as_deref(),
                    token_id = event.token_id_mask.as_deref(),
                    request_id = %event.request_id,
                    sequence = event.sequence,
                    "audit event"
                );
            }
            _ => {
                info!(
                    event_type = event.event_type.as_str(),
                    client_id = client.as_deref(),
                    token_id = event.token_id_mask.as_deref(),
                    request_id = %event.request_id,
                    sequence = event.sequence,
                    "audit event"
                );
            }
        }
    }
}

/// Sink that fans events out to several sinks.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    /// Fan out to `sinks` in order.
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event.clone()).await;
        }
    }
}

impl std::fmt::Debug for FanoutAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutAuditSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// In-memory sink for tests: records everything it sees.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events of one type.
    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Per-request audit emitter carrying the request id and the monotonic
/// sequence counter. Cheap to clone; clones share the counter so sequences
/// stay monotonic across concurrent emitters of one request.
#[derive(Clone)]
pub struct RequestAudit {
    request_id: Uuid,
    sequence: Arc<AtomicU64>,
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl RequestAudit {
    /// Create an emitter for one request.
    pub fn new(request_id: Uuid, sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            request_id,
            sequence: Arc::new(AtomicU64::new(0)),
            sink,
            clock,
        }
    }

    /// Request this emitter belongs to.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Emit an event with the next sequence number.
    pub async fn emit(
        &self,
        event_type: AuditEventType,
        client_id: Option<&str>,
        token_id: Option<&str>,
        attributes: HashMap<String, String>,
    ) {
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            event_type,
            client_id: client_id.map(str::to_owned),
            token_id_mask: token_id.map(mask_identifier),
            timestamp: self.clock.now(),
            request_id: self.request_id,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            attributes,
        };
        self.sink.record(event).await;
    }

    /// Shorthand for events with no extra attributes.
    pub async fn emit_simple(
        &self,
        event_type: AuditEventType,
        client_id: Option<&str>,
        token_id: Option<&str>,
    ) {
        self.emit(event_type, client_id, token_id, HashMap::new()).await;
    }
}

impl std::fmt::Debug for RequestAudit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAudit")
            .field("request_id", &self.request_id)
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn sequences_are_monotonic_within_a_request() {
        let sink = Arc::new(RecordingAuditSink::default());
        let audit = RequestAudit::new(Uuid::new_v4(), sink.clone(), Arc::new(SystemClock));

        audit.emit_simple(AuditEventType::AuthSuccess, Some("vendor-A"), None).await;
        audit
            .emit_simple(AuditEventType::TokenIssued, Some("vendor-A"), Some("0123456789abcdef"))
            .await;
        audit.emit_simple(AuditEventType::TokenValidated, Some("vendor-A"), None).await;

        let events = sink.events();
        assert_eq!(events.len(), 3);
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(events.iter().all(|e| e.request_id == audit.request_id()));
    }

    #[tokio::test]
    async fn token_ids_are_masked_on_emit() {
        let sink = Arc::new(RecordingAuditSink::default());
        let audit = RequestAudit::new(Uuid::new_v4(), sink.clone(), Arc::new(SystemClock));

        audit
            .emit_simple(AuditEventType::TokenIssued, None, Some("abcdefghijklmnopqrstuvwxyz"))
            .await;

        let events = sink.events();
        assert_eq!(events[0].token_id_mask.as_deref(), Some("abcd***wxyz"));
    }

    #[tokio::test]
    async fn clones_share_the_sequence_counter() {
        let sink = Arc::new(RecordingAuditSink::default());
        let audit = RequestAudit::new(Uuid::new_v4(), sink.clone(), Arc::new(SystemClock));
        let clone = audit.clone();

        audit.emit_simple(AuditEventType::AuthSuccess, None, None).await;
        clone.emit_simple(AuditEventType::TokenIssued, None, None).await;

        let mut sequences: Vec<u64> = sink.events().iter().map(|e| e.sequence).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, vec![0, 1]);
    }
}
