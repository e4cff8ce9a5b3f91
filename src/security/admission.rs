//! Ordered admission decision for the dispatch endpoint.
//!
//! Stages run in a fixed order and the first failure wins:
//! credential, token presence, token verification, replay guard, payload shape.

use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::dispatch::{OperationRequest, PayloadError};
use crate::security::audit_log::AuditLogger;
use crate::security::credential::CredentialGate;
use crate::security::replay::{replay_key, ReplayError, ReplayGuard, ReplayStatus, ReplayStore};
use crate::security::token::{TokenError, TokenVerifier};
use crate::service::config::Config;
use secrecy::{ExposeSecret, SecretString};

/// Progress through the pipeline; a rejection reports the last stage passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStage {
    Start,
    CredentialChecked,
    TokenParsed,
    TokenVerified,
    ReplayChecked,
    PayloadValidated,
    Admitted,
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Invalid API Key")]
    InvalidCredential,
    #[error("Missing JWT")]
    MissingToken,
    #[error("Expired JWT")]
    ExpiredToken,
    #[error("Invalid JWT")]
    BadSignatureOrStructure(TokenError),
    #[error("JWT already used")]
    AlreadyUsed,
    #[error("Replay guard unavailable: {0}")]
    GuardUnavailable(String),
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingPayloadFields(Vec<&'static str>),
    #[error("Malformed JSON body")]
    MalformedPayload,
    #[error("Request body too large")]
    OversizedPayload,
}

impl AdmissionError {
    /// Authentication-layer failures are 401, payload failures 400.
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::MissingPayloadFields(_)
            | AdmissionError::MalformedPayload
            | AdmissionError::OversizedPayload => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn stage(&self) -> AdmissionStage {
        match self {
            AdmissionError::InvalidCredential => AdmissionStage::Start,
            AdmissionError::MissingToken => AdmissionStage::CredentialChecked,
            AdmissionError::ExpiredToken | AdmissionError::BadSignatureOrStructure(_) => {
                AdmissionStage::TokenParsed
            }
            AdmissionError::AlreadyUsed | AdmissionError::GuardUnavailable(_) => {
                AdmissionStage::TokenVerified
            }
            AdmissionError::MissingPayloadFields(_)
            | AdmissionError::MalformedPayload
            | AdmissionError::OversizedPayload => AdmissionStage::ReplayChecked,
        }
    }

    /// Underlying verifier error for token rejections.
    pub fn token_cause(&self) -> Option<&TokenError> {
        match self {
            AdmissionError::BadSignatureOrStructure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TokenError> for AdmissionError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Missing => AdmissionError::MissingToken,
            TokenError::Expired => AdmissionError::ExpiredToken,
            other => AdmissionError::BadSignatureOrStructure(other),
        }
    }
}

impl From<ReplayError> for AdmissionError {
    fn from(e: ReplayError) -> Self {
        match e {
            ReplayError::Unavailable(detail) => AdmissionError::GuardUnavailable(detail),
        }
    }
}

impl From<PayloadError> for AdmissionError {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::Malformed => AdmissionError::MalformedPayload,
            PayloadError::MissingFields(f) => AdmissionError::MissingPayloadFields(f),
            PayloadError::TooLarge => AdmissionError::OversizedPayload,
        }
    }
}

pub type AdmissionResult = Result<OperationRequest, AdmissionError>;

/// Stage a finished admission ended in.
pub fn reached_stage(result: &AdmissionResult) -> AdmissionStage {
    match result {
        Ok(_) => AdmissionStage::Admitted,
        Err(err) => err.stage(),
    }
}

/// What the pipeline looks at in one inbound request.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub request_id: &'a str,
    pub credential: Option<&'a str>,
    pub token: Option<&'a str>,
    /// `None` when the body could not be read within the size limit.
    pub body: Option<&'a [u8]>,
}

impl<'a> AdmissionRequest<'a> {
    /// Pull the credential and token out of `headers` using the configured names.
    /// Values that are not visible ASCII count as absent.
    pub fn from_headers(
        request_id: &'a str,
        headers: &'a HeaderMap,
        config: &Config,
        body: Option<&'a [u8]>,
    ) -> Self {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            request_id,
            credential: get(&config.credential_header),
            token: get(&config.token_header),
            body,
        }
    }
}

#[derive(Debug)]
pub struct AdmissionPipeline {
    credential: CredentialGate,
    verifier: TokenVerifier,
    guard: ReplayGuard,
    audit: AuditLogger,
}

impl AdmissionPipeline {
    pub fn new(config: &Config, store: Arc<dyn ReplayStore>) -> Self {
        let copy = |s: &SecretString| SecretString::from(s.expose_secret().to_string());
        Self {
            credential: CredentialGate::new(copy(&config.api_key)),
            verifier: TokenVerifier::new(copy(&config.jwt_secret)),
            guard: ReplayGuard::new(store, config),
            audit: AuditLogger::new(),
        }
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.guard
    }

    pub async fn admit(&self, request: &AdmissionRequest<'_>) -> AdmissionResult {
        self.admit_at(request, Utc::now().timestamp()).await
    }

    /// Run the pipeline with `now` (unix seconds) as the verification time.
    pub async fn admit_at(&self, request: &AdmissionRequest<'_>, now: i64) -> AdmissionResult {
        let result = self.run(request, now).await;
        let stage = reached_stage(&result);
        match &result {
            Ok(_) => debug!(request_id = request.request_id, ?stage, "admission granted"),
            Err(err) => {
                debug!(request_id = request.request_id, ?stage, "admission rejected");
                self.audit.rejected(request.request_id, err);
            }
        }
        result
    }

    async fn run(&self, request: &AdmissionRequest<'_>, now: i64) -> AdmissionResult {
        if !self.credential.check(request.credential) {
            return Err(AdmissionError::InvalidCredential);
        }

        let token = match request.token.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(AdmissionError::MissingToken),
        };

        let claims = self.verifier.verify(Some(token), now)?;

        match self.guard.check_and_mark(token, &claims, now).await? {
            ReplayStatus::FirstUse => {}
            ReplayStatus::AlreadyUsed => return Err(AdmissionError::AlreadyUsed),
        }

        let body = request.body.ok_or(PayloadError::TooLarge)?;
        let payload = OperationRequest::from_json(body)?;
        debug!(
            request_id = request.request_id,
            stage = ?AdmissionStage::PayloadValidated,
            "payload validated"
        );
        self.audit
            .admitted(request.request_id, claims.sub.as_deref(), &replay_key(token));
        Ok(payload)
    }
}
