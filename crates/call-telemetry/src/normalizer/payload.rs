//! Wire shapes of provider payloads and their validation.
//!
//! Call payloads keep every field optional so that a missing field is
//! reported as a validation error naming the field instead of a serde
//! failure; requirements differ per event kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{FieldError, Result, TelemetryError};
use crate::types::{AgentStatus, CallEventKind};

/// Event types the provider is known to send
pub const CALL_STARTED: &str = "call_started";
pub const CALL_ANSWERED: &str = "call_answered";
pub const CALL_COMPLETED: &str = "call_completed";
pub const AGENT_STATUS_CHANGED: &str = "agent_status_changed";

/// Call detail as sent by the provider, both in webhooks and in CDR batches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CdrPayload {
    pub call_id: Option<String>,
    pub call_type: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub answer_time: Option<String>,
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub agent_extension: Option<String>,
    pub agent_name: Option<String>,
    pub duration: Option<i64>,
    pub talk_duration: Option<i64>,
    pub hold_duration: Option<i64>,
    pub queue_name: Option<String>,
    /// Site code; when absent the queue name is used
    pub location: Option<String>,
    pub recording: Option<String>,
    pub call_result: Option<String>,
}

/// Call payload after per-kind validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCall {
    pub kind: CallEventKind,
    pub call_id: String,
    pub call_type: Option<String>,
    pub start_time: DateTime<Utc>,
    pub answer_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub caller_number: String,
    pub called_number: String,
    pub agent_extension: Option<String>,
    pub agent_name: Option<String>,
    pub talk_seconds: Option<i64>,
    pub hold_seconds: Option<i64>,
    pub queue_name: String,
    pub location_code: String,
    pub recording_url: Option<String>,
    pub call_result: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn require<'a>(value: &'a Option<String>, field: &str, errors: &mut Vec<FieldError>) -> Option<&'a str> {
    let found = present(value);
    if found.is_none() {
        errors.push(FieldError::required(field));
    }
    found
}

fn timestamp(value: Option<&str>, field: &str, errors: &mut Vec<FieldError>) -> Option<DateTime<Utc>> {
    let raw = value?;
    match parse_timestamp(raw) {
        Some(ts) => Some(ts),
        None => {
            errors.push(FieldError::new(
                field,
                "invalid_timestamp",
                format!("{} must be an RFC 3339 timestamp", field),
            ));
            None
        }
    }
}

fn non_negative(value: Option<i64>, field: &str, errors: &mut Vec<FieldError>) -> Option<i64> {
    match value {
        Some(v) if v < 0 => {
            errors.push(FieldError::new(field, "negative", format!("{} cannot be negative", field)));
            None
        }
        other => other,
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl CdrPayload {
    /// Check the fields `kind` needs and convert them
    pub fn validate_for(&self, kind: CallEventKind) -> Result<ValidatedCall> {
        let mut errors = Vec::new();

        let call_id = require(&self.call_id, "CallId", &mut errors);
        let start_raw = require(&self.start_time, "StartTime", &mut errors);
        let caller = require(&self.caller_number, "CallerNumber", &mut errors);
        let called = require(&self.called_number, "CalledNumber", &mut errors);
        let queue = require(&self.queue_name, "QueueName", &mut errors);

        let (extension, name) = if kind == CallEventKind::Started {
            (present(&self.agent_extension), present(&self.agent_name))
        } else {
            (
                require(&self.agent_extension, "AgentExtension", &mut errors),
                require(&self.agent_name, "AgentName", &mut errors),
            )
        };

        let call_result = if kind == CallEventKind::Ended {
            require(&self.call_result, "CallResult", &mut errors)
        } else {
            present(&self.call_result)
        };

        let start_time = timestamp(start_raw, "StartTime", &mut errors);
        let answer_time = timestamp(present(&self.answer_time), "AnswerTime", &mut errors);
        let end_time = timestamp(present(&self.end_time), "EndTime", &mut errors);

        non_negative(self.duration, "Duration", &mut errors);
        let talk_seconds = non_negative(self.talk_duration, "TalkDuration", &mut errors);
        let hold_seconds = non_negative(self.hold_duration, "HoldDuration", &mut errors);

        let recording_url = present(&self.recording);
        if let Some(url) = recording_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(FieldError::new("Recording", "invalid_url", "Recording must be an http(s) URL"));
            }
        }

        if !errors.is_empty() {
            return Err(TelemetryError::invalid_payload(
                format!("{} payload failed validation", kind),
                errors,
            ));
        }

        let (
            Some(call_id),
            Some(start_time),
            Some(caller),
            Some(called),
            Some(queue),
        ) = (call_id, start_time, caller, called, queue)
        else {
            return Err(TelemetryError::internal("validated call payload is incomplete"));
        };

        let location_code = present(&self.location).unwrap_or(queue).to_string();

        Ok(ValidatedCall {
            kind,
            call_id: call_id.to_string(),
            call_type: present(&self.call_type).map(str::to_string),
            start_time,
            answer_time,
            end_time,
            caller_number: caller.to_string(),
            called_number: called.to_string(),
            agent_extension: extension.map(str::to_string),
            agent_name: name.map(str::to_string),
            talk_seconds,
            hold_seconds,
            queue_name: queue.to_string(),
            location_code,
            recording_url: recording_url.map(str::to_string),
            call_result: call_result.map(str::to_string),
        })
    }
}

/// Agent status change as sent by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentStatusPayload {
    #[validate(length(min = 1, max = 32))]
    pub extension: String,

    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(custom(function = "validate_agent_status"))]
    pub status: String,

    #[validate(length(min = 1))]
    pub queue: String,

    #[validate(length(min = 1))]
    pub location: String,

    pub current_call: Option<String>,

    #[validate(custom(function = "validate_rfc3339"))]
    pub last_activity: String,
}

fn validate_agent_status(status: &str) -> std::result::Result<(), ValidationError> {
    match parse_agent_status(status) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("invalid_status")),
    }
}

fn validate_rfc3339(value: &str) -> std::result::Result<(), ValidationError> {
    match parse_timestamp(value) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new("invalid_timestamp")),
    }
}

/// Provider status names are capitalized (`Available`); accept any case
pub fn parse_agent_status(raw: &str) -> Option<AgentStatus> {
    AgentStatus::from_str(&raw.trim().to_ascii_lowercase())
}

fn pascal_case(field: &str) -> String {
    field
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

pub(crate) fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let wire = pascal_case(&field.to_string());
            errs.iter()
                .map(|e| {
                    let message = match &e.message {
                        Some(message) => message.to_string(),
                        None => format!("{} failed {} check", wire, e.code),
                    };
                    FieldError::new(wire.clone(), e.code.to_string(), message)
                })
                .collect::<Vec<_>>()
        })
        .collect();
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}

impl AgentStatusPayload {
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|e| {
            TelemetryError::invalid_payload("agent_status_changed payload failed validation", field_errors(&e))
        })
    }
}

/// Known webhook event kinds; anything else is kept as `Unknown`
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    CallStarted(CdrPayload),
    CallAnswered(CdrPayload),
    CallCompleted(CdrPayload),
    AgentStatusChanged(AgentStatusPayload),
    Unknown { event_type: String },
}

impl WebhookEvent {
    pub fn event_type(&self) -> &str {
        match self {
            WebhookEvent::CallStarted(_) => CALL_STARTED,
            WebhookEvent::CallAnswered(_) => CALL_ANSWERED,
            WebhookEvent::CallCompleted(_) => CALL_COMPLETED,
            WebhookEvent::AgentStatusChanged(_) => AGENT_STATUS_CHANGED,
            WebhookEvent::Unknown { event_type } => event_type,
        }
    }
}

/// Envelope `{event_type, timestamp, data}` with `data` decoded by type
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedWebhook {
    pub event: WebhookEvent,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event_type: Option<Value>,
    timestamp: Option<Value>,
    #[serde(default)]
    data: Value,
}

fn decode_data<T: for<'de> Deserialize<'de>>(data: Value) -> Result<T> {
    if !data.is_object() {
        return Err(TelemetryError::invalid_payload(
            "data must be an object",
            vec![FieldError::new("data", "invalid_type", "data must be a JSON object")],
        ));
    }
    serde_json::from_value(data).map_err(|e| {
        TelemetryError::invalid_payload(
            "data has fields of the wrong type",
            vec![FieldError::new("data", "invalid_type", e.to_string())],
        )
    })
}

impl ParsedWebhook {
    pub fn parse(raw: &Value) -> Result<Self> {
        let envelope: RawEnvelope = serde_json::from_value(raw.clone()).map_err(|e| {
            TelemetryError::invalid_payload(
                "webhook body must be an object",
                vec![FieldError::new("body", "invalid_type", e.to_string())],
            )
        })?;

        let mut errors = Vec::new();
        let event_type = match envelope.event_type {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
            Some(_) => {
                errors.push(FieldError::new("event_type", "invalid_type", "event_type must be a string"));
                None
            }
            None => {
                errors.push(FieldError::required("event_type"));
                None
            }
        };
        let sent_at = match envelope.timestamp {
            Some(Value::String(s)) => timestamp(Some(s.as_str()), "timestamp", &mut errors),
            Some(_) => {
                errors.push(FieldError::new("timestamp", "invalid_type", "timestamp must be a string"));
                None
            }
            None => {
                errors.push(FieldError::required("timestamp"));
                None
            }
        };

        let (Some(event_type), Some(sent_at)) = (event_type, sent_at) else {
            return Err(TelemetryError::invalid_payload("invalid webhook envelope", errors));
        };

        let event = match event_type.as_str() {
            CALL_STARTED => WebhookEvent::CallStarted(decode_data(envelope.data)?),
            CALL_ANSWERED => WebhookEvent::CallAnswered(decode_data(envelope.data)?),
            CALL_COMPLETED => WebhookEvent::CallCompleted(decode_data(envelope.data)?),
            AGENT_STATUS_CHANGED => WebhookEvent::AgentStatusChanged(decode_data(envelope.data)?),
            _ => WebhookEvent::Unknown { event_type },
        };

        Ok(Self { event, sent_at })
    }
}
