use tracing::{info, warn};

use crate::security::admission::AdmissionError;

/// Security audit trail. Events go to the `audit` target so they can be
/// filtered separately (`RUST_LOG=audit=info`). Never logs secrets or tokens.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn admitted(&self, request_id: &str, subject: Option<&str>, replay_key: &str) {
        info!(
            target: "audit",
            event = "admitted",
            request_id,
            subject = subject.unwrap_or(""),
            replay_key
        );
    }

    pub fn rejected(&self, request_id: &str, err: &AdmissionError) {
        match err {
            AdmissionError::InvalidCredential => {
                warn!(target: "audit", event = "credential_rejected", request_id);
            }
            AdmissionError::MissingToken
            | AdmissionError::ExpiredToken
            | AdmissionError::BadSignatureOrStructure(_) => {
                warn!(
                    target: "audit",
                    event = "token_rejected",
                    request_id,
                    reason = %err,
                    cause = ?err.token_cause()
                );
            }
            AdmissionError::AlreadyUsed => {
                warn!(target: "audit", event = "replay_detected", request_id);
            }
            AdmissionError::GuardUnavailable(detail) => {
                warn!(target: "audit", event = "guard_unavailable", request_id, detail = %detail);
            }
            AdmissionError::MissingPayloadFields(_)
            | AdmissionError::MalformedPayload
            | AdmissionError::OversizedPayload => {
                info!(target: "audit", event = "payload_rejected", request_id, reason = %err);
            }
        }
    }
}
