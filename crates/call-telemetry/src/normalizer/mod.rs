//! # Event Normalizer
//!
//! Turns raw provider payloads (webhook pushes and pulled CDR batches) into
//! canonical [`CallEvent`]s and [`AgentPresence`] updates, and records them in
//! the relational store.
//!
//! ## Responsibilities
//!
//! - **Validation**: required fields are checked per event kind and every
//!   problem is reported at once as [`TelemetryError::InvalidPayload`]. Nothing
//!   is written for an invalid payload.
//! - **Location mapping**: provider codes go through a fixed lookup table;
//!   unknown codes fall back to Ann Arbor and are logged.
//! - **Agent identity**: directory lookup first, synthetic identity second
//!   (see [`IdentityResolver`]).
//! - **Dedup**: a call stage that is already stored is a logged no-op, which
//!   makes webhook redelivery and overlapping re-syncs safe.
//! - **Shift totals**: a newly recorded ended call with an agent adds one call
//!   and its talk time to that agent's shift for the day; a presence change
//!   adds the time spent available or busy. Calls per hour and utilization
//!   are recalculated with every change.
//! - **Event log**: every recorded call stage and applied presence change is
//!   appended to the event history. Duplicates and stale updates are not.
//!
//! ```text
//! raw JSON ─► ParsedWebhook ─► NormalizedEvent ─► record() ─► IngestOutcome
//!                 (envelope)     (validated)       (dedup + write)
//! ```

mod identity;
mod mapping;
mod payload;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{IdentityConfig, NormalizerConfig};
use crate::database::{HistoryEntry, PresenceWrite, ShiftCall, TelemetryStore};
use crate::error::{Result, TelemetryError};
use crate::types::{AgentPresence, CallEvent, CallEventKind, CallStatus, Location};

pub use identity::{dotted_name, extension_identity, IdentityResolver};
pub use mapping::{call_direction, infer_category, lookup_location, map_call_result, resolve_location};
pub use payload::{
    parse_agent_status, parse_timestamp, AgentStatusPayload, CdrPayload, ParsedWebhook, ValidatedCall,
    WebhookEvent, AGENT_STATUS_CHANGED, CALL_ANSWERED, CALL_COMPLETED, CALL_STARTED,
};

/// A validated payload, not yet recorded
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    Call(CallEvent),
    Presence(AgentPresence),
    /// Event type this service does not handle
    Ignored { event_type: String },
}

/// What recording a normalized event did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Recorded { event: CallEvent },
    Duplicate { provider_call_id: String, kind: CallEventKind },
    PresenceUpdated {
        presence: AgentPresence,
        previous_location: Option<Location>,
    },
    PresenceStale { agent_identity: String },
    Ignored { event_type: String },
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Recorded { .. } => "recorded",
            IngestOutcome::Duplicate { .. } => "duplicate",
            IngestOutcome::PresenceUpdated { .. } => "presence_updated",
            IngestOutcome::PresenceStale { .. } => "presence_stale",
            IngestOutcome::Ignored { .. } => "ignored",
        }
    }

    /// Locations whose metrics may have changed
    pub fn affected_locations(&self) -> Vec<Location> {
        match self {
            IngestOutcome::Recorded { event } => vec![event.location],
            IngestOutcome::PresenceUpdated {
                presence,
                previous_location,
            } => {
                let mut locations = vec![presence.location];
                if let Some(previous) = previous_location {
                    locations.push(*previous);
                }
                locations
            }
            _ => Vec::new(),
        }
    }
}

pub struct EventNormalizer {
    store: Arc<dyn TelemetryStore>,
    identity: IdentityResolver,
    internal_extensions: HashSet<String>,
}

impl EventNormalizer {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        identity: IdentityConfig,
        normalizer: &NormalizerConfig,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(store.clone(), identity),
            store,
            internal_extensions: normalizer.internal_extensions.iter().cloned().collect(),
        }
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    /// Validate and convert a raw webhook body without recording it
    pub async fn normalize(&self, raw: &Value) -> Result<NormalizedEvent> {
        let parsed = ParsedWebhook::parse(raw)?;
        self.normalize_parsed(parsed).await
    }

    pub async fn normalize_parsed(&self, parsed: ParsedWebhook) -> Result<NormalizedEvent> {
        let sent_at = parsed.sent_at;
        match parsed.event {
            WebhookEvent::CallStarted(payload) => self
                .call_event(&payload, CallEventKind::Started, sent_at)
                .await
                .map(NormalizedEvent::Call),
            WebhookEvent::CallAnswered(payload) => self
                .call_event(&payload, CallEventKind::Answered, sent_at)
                .await
                .map(NormalizedEvent::Call),
            WebhookEvent::CallCompleted(payload) => self
                .call_event(&payload, CallEventKind::Ended, sent_at)
                .await
                .map(NormalizedEvent::Call),
            WebhookEvent::AgentStatusChanged(payload) => {
                self.presence(&payload).map(NormalizedEvent::Presence)
            }
            WebhookEvent::Unknown { event_type } => Ok(NormalizedEvent::Ignored { event_type }),
        }
    }

    /// Normalize and record a raw webhook body
    pub async fn ingest(&self, raw: &Value) -> Result<IngestOutcome> {
        let event = self.normalize(raw).await?;
        self.record(event).await
    }

    /// Record one pulled CDR; CDRs describe finished calls
    pub async fn ingest_cdr(&self, record: &CdrPayload) -> Result<IngestOutcome> {
        let event = self.call_event(record, CallEventKind::Ended, Utc::now()).await?;
        self.record(NormalizedEvent::Call(event)).await
    }

    /// Record one pulled agent status
    pub async fn ingest_agent_status(&self, record: &AgentStatusPayload) -> Result<IngestOutcome> {
        let presence = self.presence(record)?;
        self.record(NormalizedEvent::Presence(presence)).await
    }

    pub async fn record(&self, event: NormalizedEvent) -> Result<IngestOutcome> {
        match event {
            NormalizedEvent::Call(event) => self.record_call(event).await,
            NormalizedEvent::Presence(presence) => {
                match self.store.upsert_agent_presence(&presence).await? {
                    PresenceWrite::Applied {
                        previous_location,
                        previous_status,
                    } => {
                        self.append_history(HistoryEntry::presence(&presence, previous_status))
                            .await;
                        debug!(
                            agent = %presence.agent_identity,
                            status = presence.status.as_str(),
                            location = %presence.location,
                            "agent presence updated"
                        );
                        Ok(IngestOutcome::PresenceUpdated {
                            presence,
                            previous_location,
                        })
                    }
                    PresenceWrite::Stale => {
                        info!(agent = %presence.agent_identity, "ignoring out-of-order presence update");
                        Ok(IngestOutcome::PresenceStale {
                            agent_identity: presence.agent_identity,
                        })
                    }
                }
            }
            NormalizedEvent::Ignored { event_type } => {
                info!(event_type = %event_type, "ignoring unhandled webhook event type");
                Ok(IngestOutcome::Ignored { event_type })
            }
        }
    }

    async fn record_call(&self, event: CallEvent) -> Result<IngestOutcome> {
        let duplicate = IngestOutcome::Duplicate {
            provider_call_id: event.provider_call_id.clone(),
            kind: event.kind,
        };

        if self
            .store
            .call_event_exists(&event.provider_call_id, event.kind)
            .await?
        {
            info!(call_id = %event.provider_call_id, kind = %event.kind, "duplicate call event, skipping");
            return Ok(duplicate);
        }

        // a concurrent delivery can win between the check and the insert
        if !self.store.insert_call_event(&event).await? {
            info!(call_id = %event.provider_call_id, kind = %event.kind, "duplicate call event, skipping");
            return Ok(duplicate);
        }

        if event.kind == CallEventKind::Ended {
            if let Some(agent) = &event.agent_identity {
                let shift = ShiftCall {
                    agent_identity: agent.clone(),
                    shift_date: event.timestamp.date_naive(),
                    extension: event.agent_extension.clone(),
                    agent_name: event.agent_name.clone(),
                    location: event.location,
                    talk_seconds: event.talk_seconds.unwrap_or(0),
                };
                if let Err(e) = self.store.record_shift_call(&shift).await {
                    warn!(agent = %agent, call_id = %event.provider_call_id, error = %e, "failed to update agent shift");
                }
            }
        }

        match HistoryEntry::call(&event) {
            Ok(entry) => self.append_history(entry).await,
            Err(e) => warn!(call_id = %event.provider_call_id, error = %e, "failed to build history entry"),
        }

        debug!(
            call_id = %event.provider_call_id,
            kind = %event.kind,
            location = %event.location,
            "call event recorded"
        );
        Ok(IngestOutcome::Recorded { event })
    }

    /// The log is best effort; the event itself is already stored
    async fn append_history(&self, entry: HistoryEntry) {
        if let Err(e) = self.store.append_history(&entry).await {
            warn!(event_type = %entry.event_type, location = %entry.location, error = %e, "failed to append event history");
        }
    }

    async fn call_event(
        &self,
        payload: &CdrPayload,
        kind: CallEventKind,
        sent_at: DateTime<Utc>,
    ) -> Result<CallEvent> {
        let call = payload.validate_for(kind)?;
        let location = resolve_location(&call.location_code);

        let agent_identity = match &call.agent_extension {
            Some(extension) => Some(
                self.identity
                    .resolve(extension, call.agent_name.as_deref().unwrap_or_default())
                    .await,
            ),
            None => None,
        };

        let timestamp = match kind {
            CallEventKind::Started => call.start_time,
            CallEventKind::Answered => call.answer_time.unwrap_or(sent_at),
            CallEventKind::Ended => call.end_time.unwrap_or(sent_at),
        };

        let answered_at = match kind {
            CallEventKind::Answered => Some(timestamp),
            _ => call.answer_time,
        };
        let ring_seconds = match kind {
            CallEventKind::Started => None,
            _ => Some(
                answered_at
                    .map(|at| (at - call.start_time).num_seconds().max(0))
                    .unwrap_or(0),
            ),
        };

        let status = match kind {
            CallEventKind::Started => CallStatus::Ringing,
            CallEventKind::Answered => CallStatus::InProgress,
            CallEventKind::Ended => map_call_result(call.call_result.as_deref().unwrap_or_default()),
        };

        let (talk_seconds, hold_seconds) = match kind {
            CallEventKind::Ended => (Some(call.talk_seconds.unwrap_or(0)), call.hold_seconds),
            _ => (None, None),
        };

        Ok(CallEvent {
            direction: call_direction(&call.caller_number, &call.called_number, &self.internal_extensions),
            category: infer_category(call.call_type.as_deref(), &call.queue_name),
            provider_call_id: call.call_id,
            kind,
            location,
            agent_identity,
            agent_extension: call.agent_extension,
            agent_name: call.agent_name,
            status,
            queue_name: call.queue_name,
            caller_number: call.caller_number,
            called_number: call.called_number,
            timestamp,
            talk_seconds,
            ring_seconds,
            hold_seconds,
            recording_url: call.recording_url,
        })
    }

    fn presence(&self, payload: &AgentStatusPayload) -> Result<AgentPresence> {
        payload.check()?;

        let status = parse_agent_status(&payload.status)
            .ok_or_else(|| TelemetryError::internal("validated agent status did not parse"))?;
        let last_changed_at = parse_timestamp(&payload.last_activity)
            .ok_or_else(|| TelemetryError::internal("validated LastActivity did not parse"))?;

        Ok(AgentPresence {
            agent_identity: payload.email.trim().to_lowercase(),
            agent_name: payload.name.trim().to_string(),
            extension: payload.extension.trim().to_string(),
            location: resolve_location(&payload.location),
            status,
            queue_name: payload.queue.trim().to_string(),
            current_call_id: payload
                .current_call
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            last_changed_at,
        })
    }
}
