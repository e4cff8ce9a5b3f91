use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const REQUIRED_FIELDS: [&str; 4] = ["message", "to", "from", "timeToLifeSec"];

/// Business payload of an admitted request.
///
/// Only presence of the four fields is checked; values are carried as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRequest {
    pub message: Value,
    pub to: Value,
    pub from: Value,
    #[serde(rename = "timeToLifeSec")]
    pub time_to_life_sec: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("body is not a JSON object")]
    Malformed,
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("body exceeds the size limit")]
    TooLarge,
}

impl OperationRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| PayloadError::Malformed)?;
        let Value::Object(mut map) = value else {
            return Err(PayloadError::Malformed);
        };

        let missing: Vec<&'static str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|f| !map.contains_key(*f))
            .collect();
        if !missing.is_empty() {
            return Err(PayloadError::MissingFields(missing));
        }

        let mut take = |f: &str| map.remove(f).unwrap_or(Value::Null);
        Ok(Self {
            message: take("message"),
            to: take("to"),
            from: take("from"),
            time_to_life_sec: take("timeToLifeSec"),
        })
    }

    /// `to` as display text; strings are shown without quotes.
    pub fn recipient(&self) -> String {
        match &self.to {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    pub message: String,
}

/// The operation behind the gate. Called only for fully admitted requests.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, request: &OperationRequest) -> Result<DispatchReceipt>;
}

/// Acknowledges the message without forwarding it anywhere.
#[derive(Debug, Clone, Default)]
pub struct EchoDispatcher;

#[async_trait]
impl MessageDispatcher for EchoDispatcher {
    async fn dispatch(&self, request: &OperationRequest) -> Result<DispatchReceipt> {
        Ok(DispatchReceipt {
            message: format!("Hello {} your message will be send", request.recipient()),
        })
    }
}
