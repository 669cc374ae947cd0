//! Intent handler contract.
//!
//! A handler maps the arguments of one recognized intent plus a read-only
//! view of the session state to an [`IntentResult`]. Expected failures
//! (input that does not fit the stage) are an `Error` status, never `Err`;
//! `Err` is reserved for genuine faults and ends the session.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use super::state::{SessionState, StateUpdate};
use crate::config::FlowConfig;
use crate::emotion::EmotionGate;
use crate::error::{Result, SphinxError};

/// Arguments supplied by the dialogue-generation service for one intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentArgs(Map<String, Value>);

impl IntentArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a JSON object; `null` is treated as no arguments.
    ///
    /// # Errors
    ///
    /// `SphinxError::RecognitionMismatch` for any other JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(SphinxError::RecognitionMismatch(format!(
                "intent arguments must be an object, got {other}"
            ))),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_owned(), value.into());
        self
    }

    /// Argument rendered as text. Booleans and numbers are stringified so
    /// that `{"user_ready": true}` and `{"user_ready": "yes"}` both read.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.0.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Outcome class of a handler call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntentStatus {
    Success,
    /// Input could not be recognized for this stage.
    Error { message: String },
}

/// Structured handler result.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentResult {
    pub status: IntentStatus,
    /// Payload fields, passed to transitions and reported to the host.
    pub fields: Map<String, Value>,
    /// State mutations applied by the manager after the handler returns.
    pub updates: Vec<StateUpdate>,
}

impl IntentResult {
    pub fn success() -> Self {
        Self {
            status: IntentStatus::Success,
            fields: Map::new(),
            updates: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: IntentStatus::Error {
                message: message.into(),
            },
            fields: Map::new(),
            updates: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_owned(), value.into());
        self
    }

    pub fn with_update(mut self, update: StateUpdate) -> Self {
        self.updates.push(update);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == IntentStatus::Success
    }

    pub fn field_bool(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// JSON view reported to the dialogue-generation service.
    pub fn to_json(&self) -> Value {
        let mut out = match serde_json::to_value(&self.status) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (k, v) in &self.fields {
            out.insert(k.clone(), v.clone());
        }
        Value::Object(out)
    }
}

/// What a handler may read while it runs.
pub struct HandlerContext<'a> {
    pub state: &'a SessionState,
    pub emotions: &'a EmotionGate,
    pub config: &'a FlowConfig,
}

/// Executes one intent.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// # Errors
    ///
    /// Only for genuine faults; unrecognized input is an `Error` status.
    async fn handle(&self, args: &IntentArgs, ctx: &HandlerContext<'_>) -> Result<IntentResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_accept_object_and_null_only() {
        let args = IntentArgs::from_value(serde_json::json!({"user_name": "Ada"}));
        assert_eq!(args.ok().and_then(|a| a.text("user_name")), Some("Ada".into()));
        assert!(IntentArgs::from_value(Value::Null).is_ok());
        assert!(matches!(
            IntentArgs::from_value(serde_json::json!(["x"])),
            Err(SphinxError::RecognitionMismatch(_))
        ));
    }

    #[test]
    fn text_and_flag_coerce_scalars() {
        let args = IntentArgs::new()
            .with("ready", true)
            .with("word", "False")
            .with("n", 3);
        assert_eq!(args.text("ready").as_deref(), Some("true"));
        assert_eq!(args.flag("word"), Some(false));
        assert_eq!(args.text("n").as_deref(), Some("3"));
        assert_eq!(args.flag("missing"), None);
    }

    #[test]
    fn result_json_merges_status_and_fields() {
        let ok = IntentResult::success().with_field("confirmed", true);
        assert_eq!(
            ok.to_json(),
            serde_json::json!({"status": "success", "confirmed": true})
        );
        let err = IntentResult::error("no match");
        assert_eq!(
            err.to_json(),
            serde_json::json!({"status": "error", "message": "no match"})
        );
        assert!(!err.is_success());
    }
}
