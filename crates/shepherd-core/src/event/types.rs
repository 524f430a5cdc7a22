//! Event type enum covering the closed job event catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The 11 event types a job log may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Job created in `queued` with its start time.
    JobInitialized,
    /// Validated status transition.
    StatusChanged,
    /// Absolute retry/step/tool-call counters.
    CountersUpdated,
    /// Idempotency key added to the job's key set.
    IdempotencyRecorded,
    /// Lease granted, re-granted or extended.
    LeaseSet,
    /// Lease released by its holder.
    LeaseReleased,
    /// Checkpoint emitted; its id derives from the event sequence.
    CheckpointEmitted,
    /// Human approval of a decision-needed checkpoint.
    ApprovalRecorded,
    /// Environment fingerprint recorded.
    EnvFingerprintSet,
    /// Explicit override of an environment mismatch.
    EnvOverrideRecorded,
    /// Opaque adapter marker; does not affect job state.
    AdapterStep,
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType {
    pub raw: String,
}

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type '{}'", self.raw)
    }
}

impl std::error::Error for UnknownEventType {}

impl EventType {
    /// All known event types in catalog order.
    pub const ALL: [Self; 11] = [
        Self::JobInitialized,
        Self::StatusChanged,
        Self::CountersUpdated,
        Self::IdempotencyRecorded,
        Self::LeaseSet,
        Self::LeaseReleased,
        Self::CheckpointEmitted,
        Self::ApprovalRecorded,
        Self::EnvFingerprintSet,
        Self::EnvOverrideRecorded,
        Self::AdapterStep,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JobInitialized => "job_initialized",
            Self::StatusChanged => "status_changed",
            Self::CountersUpdated => "counters_updated",
            Self::IdempotencyRecorded => "idempotency_recorded",
            Self::LeaseSet => "lease_set",
            Self::LeaseReleased => "lease_released",
            Self::CheckpointEmitted => "checkpoint_emitted",
            Self::ApprovalRecorded => "approval_recorded",
            Self::EnvFingerprintSet => "env_fingerprint_set",
            Self::EnvOverrideRecorded => "env_override_recorded",
            Self::AdapterStep => "adapter_step",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| UnknownEventType { raw: s.to_string() })
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_and_parse_back() {
        let mut seen = HashSet::new();
        for ty in EventType::ALL {
            assert!(seen.insert(ty.as_str()));
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
        }
    }

    #[test]
    fn unknown_name_is_rejected_exactly() {
        let err = "job_deleted".parse::<EventType>().unwrap_err();
        assert_eq!(err.raw, "job_deleted");
        assert!("Status_Changed".parse::<EventType>().is_err());
    }

    #[test]
    fn serde_uses_wire_name() {
        let json = serde_json::to_string(&EventType::EnvOverrideRecorded).unwrap();
        assert_eq!(json, "\"env_override_recorded\"");
        assert!(serde_json::from_str::<EventType>("\"bogus\"").is_err());
    }
}
