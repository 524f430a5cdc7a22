//! Typed payloads for each [`EventType`].
//!
//! The type tag lives beside the payload in the log record, not inside it,
//! so decoding goes through [`EventData::deserialize_for`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::EventType;
use crate::budget::BudgetState;
use crate::checkpoint::{ArtifactsDelta, CheckpointKind, RequiredAction};
use crate::envfp::Fingerprint;
use crate::lease::LeaseRecord;
use crate::status::JobStatus;

/// Typed payload, one variant per event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    JobInitialized(JobInitializedData),
    StatusChanged(StatusChangedData),
    CountersUpdated(CountersUpdatedData),
    IdempotencyRecorded(IdempotencyRecordedData),
    LeaseSet(LeaseRecord),
    LeaseReleased(LeaseReleasedData),
    CheckpointEmitted(CheckpointEmittedData),
    ApprovalRecorded(ApprovalRecordedData),
    EnvFingerprintSet(Fingerprint),
    EnvOverrideRecorded(EnvOverrideData),
    /// Free-form adapter payload, kept verbatim.
    AdapterStep(serde_json::Value),
}

impl EventData {
    /// The type tag written next to this payload.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::JobInitialized(_) => EventType::JobInitialized,
            Self::StatusChanged(_) => EventType::StatusChanged,
            Self::CountersUpdated(_) => EventType::CountersUpdated,
            Self::IdempotencyRecorded(_) => EventType::IdempotencyRecorded,
            Self::LeaseSet(_) => EventType::LeaseSet,
            Self::LeaseReleased(_) => EventType::LeaseReleased,
            Self::CheckpointEmitted(_) => EventType::CheckpointEmitted,
            Self::ApprovalRecorded(_) => EventType::ApprovalRecorded,
            Self::EnvFingerprintSet(_) => EventType::EnvFingerprintSet,
            Self::EnvOverrideRecorded(_) => EventType::EnvOverrideRecorded,
            Self::AdapterStep(_) => EventType::AdapterStep,
        }
    }

    /// Decode `payload` into the variant selected by `event_type`.
    ///
    /// # Errors
    ///
    /// Returns a [`DataParseError`] if the payload does not match the schema
    /// for `event_type`.
    pub fn deserialize_for(
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<Self, DataParseError> {
        let result = match event_type {
            EventType::JobInitialized => serde_json::from_value(payload).map(Self::JobInitialized),
            EventType::StatusChanged => serde_json::from_value(payload).map(Self::StatusChanged),
            EventType::CountersUpdated => {
                serde_json::from_value(payload).map(Self::CountersUpdated)
            }
            EventType::IdempotencyRecorded => {
                serde_json::from_value(payload).map(Self::IdempotencyRecorded)
            }
            EventType::LeaseSet => serde_json::from_value(payload).map(Self::LeaseSet),
            EventType::LeaseReleased => serde_json::from_value(payload).map(Self::LeaseReleased),
            EventType::CheckpointEmitted => {
                serde_json::from_value(payload).map(Self::CheckpointEmitted)
            }
            EventType::ApprovalRecorded => {
                serde_json::from_value(payload).map(Self::ApprovalRecorded)
            }
            EventType::EnvFingerprintSet => {
                serde_json::from_value(payload).map(Self::EnvFingerprintSet)
            }
            EventType::EnvOverrideRecorded => {
                serde_json::from_value(payload).map(Self::EnvOverrideRecorded)
            }
            EventType::AdapterStep => Ok(Self::AdapterStep(payload)),
        };

        result.map_err(|source| DataParseError { event_type, source })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInitializedData {
    pub job_id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Absolute counter values, not deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersUpdatedData {
    pub retry_count: u64,
    pub step_count: u64,
    pub tool_call_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecordedData {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseReleasedData {
    pub worker_id: String,
    pub lease_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEmittedData {
    #[serde(rename = "type")]
    pub kind: CheckpointKind,
    pub summary: String,
    pub status: JobStatus,
    pub budget_state: BudgetState,
    #[serde(default)]
    pub artifacts_delta: ArtifactsDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub reason_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecordedData {
    pub checkpoint_id: String,
    pub reason: String,
    pub approved_by: String,
}

/// Override of an environment mismatch. The observed fingerprint becomes
/// the job's recorded fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvOverrideData {
    pub expected_hash: String,
    pub actual_hash: String,
    pub rules: Vec<String>,
    pub values: BTreeMap<String, String>,
    pub reason: String,
    pub approved_by: String,
}

/// Error returned when deserializing an event's JSON payload fails.
#[derive(Debug)]
pub struct DataParseError {
    pub event_type: EventType,
    pub source: serde_json::Error,
}

impl fmt::Display for DataParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} payload: {}", self.event_type, self.source)
    }
}

impl std::error::Error for DataParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_changed_decodes() {
        let data = EventData::deserialize_for(
            EventType::StatusChanged,
            json!({"from": "queued", "to": "running"}),
        )
        .unwrap();
        assert_eq!(
            data,
            EventData::StatusChanged(StatusChangedData {
                from: JobStatus::Queued,
                to: JobStatus::Running,
            })
        );
        assert_eq!(data.event_type(), EventType::StatusChanged);
    }

    #[test]
    fn payload_for_wrong_type_is_rejected() {
        let err = EventData::deserialize_for(EventType::CountersUpdated, json!({"key": "k"}))
            .unwrap_err();
        assert_eq!(err.event_type, EventType::CountersUpdated);
        assert!(err.to_string().contains("counters_updated"));
    }

    #[test]
    fn unknown_status_in_payload_is_rejected() {
        assert!(
            EventData::deserialize_for(
                EventType::StatusChanged,
                json!({"from": "queued", "to": "sleeping"})
            )
            .is_err()
        );
    }

    #[test]
    fn adapter_step_keeps_payload_verbatim() {
        let payload = json!({"tool": "shell", "argv": ["ls", "-la"]});
        let data = EventData::deserialize_for(EventType::AdapterStep, payload.clone()).unwrap();
        assert_eq!(serde_json::to_value(&data).unwrap(), payload);
    }

    #[test]
    fn checkpoint_payload_uses_type_key() {
        let data = CheckpointEmittedData {
            kind: CheckpointKind::DecisionNeeded,
            summary: "pick a branch".into(),
            status: JobStatus::BlockedDecision,
            budget_state: BudgetState::default(),
            artifacts_delta: ArtifactsDelta::default(),
            required_action: Some(RequiredAction {
                kind: "approval".into(),
                instructions: "choose main or dev".into(),
            }),
            reason_codes: vec![],
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["type"], "decision-needed");
        assert_eq!(value["required_action"]["kind"], "approval");
    }
}
