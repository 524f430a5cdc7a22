//! Event data model for the per-job event log.
//!
//! Each record in `events.jsonl` is one JSON object on its own line:
//!
//! ```text
//! {"seq":3,"created_at":"2026-01-01T00:00:00Z","type":"status_changed","payload":{...}}
//! ```
//!
//! `seq` is 1-based and gap-free per job. The `type` tag selects how the
//! `payload` is decoded; the catalog is closed, so an unknown tag is
//! corruption rather than something to skip.

pub mod data;
pub mod parser;
pub mod types;
pub mod writer;

pub use data::{
    ApprovalRecordedData, CheckpointEmittedData, CountersUpdatedData, DataParseError,
    EnvOverrideData, EventData, IdempotencyRecordedData, JobInitializedData, LeaseReleasedData,
    StatusChangedData,
};
pub use types::{EventType, UnknownEventType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single immutable entry in a job's log. Identity is `(job_id, seq)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub data: EventData,
}

impl Event {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.data.event_type()
    }
}

/// Borrowed wire shape used when writing.
#[derive(Serialize)]
struct RecordRef<'a> {
    seq: u64,
    created_at: &'a DateTime<Utc>,
    #[serde(rename = "type")]
    event_type: EventType,
    payload: &'a EventData,
}

/// Owned wire shape used for the first decoding pass.
#[derive(Deserialize)]
pub(crate) struct RawRecord {
    pub(crate) seq: u64,
    pub(crate) created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub(crate) event_type: String,
    #[serde(default)]
    pub(crate) payload: serde_json::Value,
}

impl Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RecordRef {
            seq: self.seq,
            created_at: &self.created_at,
            event_type: self.event_type(),
            payload: &self.data,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawRecord::deserialize(deserializer)?;
        parser::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} @ {}", self.seq, self.event_type(), self.created_at.to_rfc3339())
    }
}
