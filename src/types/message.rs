//! JSON control and telemetry messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConsoleError, Result};

/// `kind` codes reserved by the link layer.
pub mod kinds {
    /// Outbound keep-alive
    pub const HEARTBEAT: i64 = 0;
    /// Inbound notice that the device replaced this session with another client
    pub const SUPERSEDED: i64 = 99;
    /// Inbound notice that the device is about to close the socket
    pub const SERVER_DISCONNECT: i64 = 110;
}

/// Request kinds understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum RequestKind {
    AppSwitch,
    Snapshot,
    StartStream,
    StopStream,
    SyncTime,
    SetBitrate,
    GetConfig,
    SaveConfigs,
    RecoveryConfigs,
    AlgorithmResult,
}

impl RequestKind {
    /// Wire code for this kind
    pub const fn code(self) -> i64 {
        match self {
            RequestKind::AppSwitch => 1,
            RequestKind::Snapshot => 2,
            RequestKind::StartStream => 3,
            RequestKind::StopStream => 4,
            RequestKind::SyncTime => 5,
            RequestKind::SetBitrate => 6,
            RequestKind::GetConfig => 7,
            RequestKind::SaveConfigs => 8,
            RequestKind::RecoveryConfigs => 9,
            RequestKind::AlgorithmResult => 10,
        }
    }

    /// Map a wire code back to a known kind
    pub fn from_code(code: i64) -> Option<Self> {
        let kind = match code {
            1 => RequestKind::AppSwitch,
            2 => RequestKind::Snapshot,
            3 => RequestKind::StartStream,
            4 => RequestKind::StopStream,
            5 => RequestKind::SyncTime,
            6 => RequestKind::SetBitrate,
            7 => RequestKind::GetConfig,
            8 => RequestKind::SaveConfigs,
            9 => RequestKind::RecoveryConfigs,
            10 => RequestKind::AlgorithmResult,
            _ => return None,
        };
        Some(kind)
    }
}

/// Outbound control message, serialized as `{"kind": .., "param": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<Value>,
}

impl ControlMessage {
    /// Message with a raw kind code and optional parameter
    pub fn new(kind: i64, param: Option<Value>) -> Self {
        Self { kind, param }
    }

    /// Request of a known kind
    pub fn request(kind: RequestKind, param: Option<Value>) -> Self {
        Self::new(kind.code(), param)
    }

    /// Keep-alive sent while the link is open
    pub fn heartbeat() -> Self {
        Self::new(kinds::HEARTBEAT, None)
    }

    /// Serialize to the JSON text sent on the socket
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound JSON message, kept whole so the application sees every field.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    body: Value,
}

impl InboundMessage {
    /// Parse inbound text. Only JSON objects are accepted.
    pub fn parse(text: &str) -> Result<Self> {
        let body: Value = serde_json::from_str(text)?;
        if !body.is_object() {
            return Err(ConsoleError::parse(
                "inbound message",
                format!("expected a JSON object, got {}", json_type(&body)),
            ));
        }
        Ok(Self { body })
    }

    /// The `kind` field, when present and integral
    pub fn kind(&self) -> Option<i64> {
        self.body.get("kind").and_then(Value::as_i64)
    }

    /// The known request kind, if the code is one
    pub fn request_kind(&self) -> Option<RequestKind> {
        self.kind().and_then(RequestKind::from_code)
    }

    /// Look up a top-level field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Full message body
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Consume into the full message body
    pub fn into_body(self) -> Value {
        self.body
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
