//! Inbound webhook payloads from the voice provider
//!
//! The provider is not strict about its body format. Depending on the
//! account and retry path a webhook can arrive as:
//! - plain JSON
//! - a JSON string holding JSON (double encoded)
//! - a Python dict literal (`'single quotes'`, `True`, `None`)
//! - any of the above wrapped in a `{"data": {...}}` envelope
//!
//! `parse_webhook_body` tries each strategy in turn.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::lenient;
use crate::models::{CallDirection, CallLifecycleStatus};

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Empty webhook body")]
    Empty,

    #[error("Webhook body is not valid UTF-8")]
    NotUtf8,

    #[error("Unparseable webhook body: {0}")]
    Unparseable(String),

    #[error("Webhook body is not an object")]
    NotAnObject,

    #[error("Unexpected webhook shape: {0}")]
    Shape(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Provider execution id, unique per call.
    #[serde(default, alias = "execution_id", deserialize_with = "lenient::optional_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub agent_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_f64")]
    pub conversation_duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub transcript: Option<String>,
    #[serde(default)]
    pub telephony_data: Option<TelephonyData>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub user_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub agent_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelephonyData {
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub from_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub to_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub call_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub recording_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub hangup_reason: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub hangup_by: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_f64")]
    pub duration: Option<f64>,
}

impl WebhookPayload {
    pub fn execution_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("")
    }

    pub fn lifecycle_status(&self) -> Option<CallLifecycleStatus> {
        CallLifecycleStatus::from_webhook(self.status())
    }

    fn telephony(&self) -> Option<&TelephonyData> {
        self.telephony_data.as_ref()
    }

    pub fn direction(&self) -> CallDirection {
        match self.telephony().and_then(|t| t.call_type.as_deref()) {
            Some(kind) if kind.eq_ignore_ascii_case("inbound") => CallDirection::Inbound,
            _ => CallDirection::Outbound,
        }
    }

    /// The other party's number: the caller for inbound calls, the callee
    /// for outbound ones.
    pub fn customer_number(&self) -> Option<&str> {
        let telephony = self.telephony();
        let by_direction = match self.direction() {
            CallDirection::Inbound => telephony.and_then(|t| t.from_number.as_deref()),
            CallDirection::Outbound => telephony.and_then(|t| t.to_number.as_deref()),
        };
        by_direction.or(self.user_number.as_deref())
    }

    /// Raw call length in seconds, preferring the conversation duration.
    pub fn duration(&self) -> Option<f64> {
        self.conversation_duration
            .or_else(|| self.telephony().and_then(|t| t.duration))
            .filter(|d| d.is_finite() && *d >= 0.0)
    }

    /// Whole seconds, rounded up.
    pub fn duration_seconds(&self) -> Option<i32> {
        self.duration().map(|d| d.ceil() as i32)
    }

    pub fn recording_url(&self) -> Option<&str> {
        self.telephony().and_then(|t| t.recording_url.as_deref())
    }

    pub fn hangup_reason(&self) -> Option<&str> {
        self.telephony()
            .and_then(|t| t.hangup_reason.as_deref())
            .or(self.error_message.as_deref())
    }

    pub fn hangup_by(&self) -> Option<&str> {
        self.telephony().and_then(|t| t.hangup_by.as_deref())
    }
}

/// Decode a webhook body using every strategy the provider is known to need.
pub fn parse_webhook_body(body: &[u8]) -> Result<WebhookPayload, PayloadError> {
    let text = std::str::from_utf8(body).map_err(|_| PayloadError::NotUtf8)?;
    let value = parse_loose_json(text)?;
    let mut value = unwrap_envelope(value);

    let object = value.as_object_mut().ok_or(PayloadError::NotAnObject)?;
    let nested = match object.get("telephony_data") {
        Some(Value::String(raw)) => Some(match parse_loose_json(raw) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::Null,
        }),
        _ => None,
    };
    if let Some(nested) = nested {
        object.insert("telephony_data".to_string(), nested);
    }

    Ok(serde_json::from_value(value)?)
}

/// JSON, JSON-in-a-string, then Python literal.
pub fn parse_loose_json(text: &str) -> Result<Value, PayloadError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PayloadError::Empty);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Value::String(inner) = &value {
            if let Ok(decoded @ Value::Object(_)) = parse_loose_json(inner) {
                return Ok(decoded);
            }
        }
        return Ok(value);
    }

    let converted = python_literal_to_json(trimmed);
    serde_json::from_str::<Value>(&converted).map_err(|e| PayloadError::Unparseable(e.to_string()))
}

fn unwrap_envelope(value: Value) -> Value {
    let has_status = value.get("status").is_some();
    if has_status {
        return value;
    }
    for key in ["data", "payload"] {
        if let Some(inner) = value.get(key) {
            if inner.get("status").is_some() {
                return inner.clone();
            }
        }
    }
    value
}

/// Rewrite a Python dict/list literal as JSON text.
pub fn python_literal_to_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let quote = c;
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '\\' && i + 1 < chars.len() {
                        let next = chars[i + 1];
                        if next == '\'' {
                            out.push('\'');
                        } else {
                            out.push('\\');
                            out.push(next);
                        }
                        i += 2;
                        continue;
                    }
                    if ch == quote {
                        break;
                    }
                    match ch {
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        other => out.push(other),
                    }
                    i += 1;
                }
                out.push('"');
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    other => out.push_str(other),
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    out
}
