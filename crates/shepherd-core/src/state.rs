//! Job state projection.
//!
//! [`JobState`] is a pure fold over a job's events. Every field is
//! reproducible by replaying the log from the start, so a snapshot of it is
//! only a cache.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::BudgetState;
use crate::event::{Event, EventData};
use crate::lease::LeaseRecord;
use crate::status::JobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub status: JobStatus,
    pub retry_count: u64,
    pub step_count: u64,
    pub tool_call_count: u64,
    pub idempotency_keys: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<LeaseRecord>,
    pub last_applied_seq: u64,
    #[serde(default)]
    pub last_reason_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_fingerprint_hash: Option<String>,
    #[serde(default)]
    pub env_fingerprint_rules: Vec<String>,
    #[serde(default)]
    pub env_fingerprint_values: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl JobState {
    /// State of a job with no events.
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            retry_count: 0,
            step_count: 0,
            tool_call_count: 0,
            idempotency_keys: BTreeSet::new(),
            lease: None,
            last_applied_seq: 0,
            last_reason_codes: Vec::new(),
            env_fingerprint_hash: None,
            env_fingerprint_rules: Vec::new(),
            env_fingerprint_values: BTreeMap::new(),
            started_at: None,
        }
    }

    /// Fold every event, in order, into a fresh state.
    #[must_use]
    pub fn replay(job_id: impl Into<String>, events: &[Event]) -> Self {
        let mut state = Self::new(job_id);
        for event in events {
            state.apply(event);
        }
        state
    }

    /// True once at least one event has been applied.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.last_applied_seq > 0
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: &Event) {
        match &event.data {
            EventData::JobInitialized(data) => {
                self.status = data.status;
                self.started_at = Some(data.started_at);
            }
            EventData::StatusChanged(data) => {
                self.status = data.to;
            }
            EventData::CountersUpdated(data) => {
                self.retry_count = data.retry_count;
                self.step_count = data.step_count;
                self.tool_call_count = data.tool_call_count;
            }
            EventData::IdempotencyRecorded(data) => {
                self.idempotency_keys.insert(data.key.clone());
            }
            EventData::LeaseSet(record) => {
                self.lease = Some(record.clone());
            }
            EventData::LeaseReleased(_) => {
                self.lease = None;
            }
            EventData::CheckpointEmitted(data) => {
                self.last_reason_codes.clone_from(&data.reason_codes);
            }
            EventData::EnvFingerprintSet(fp) => {
                self.env_fingerprint_hash = Some(fp.hash.clone());
                self.env_fingerprint_rules.clone_from(&fp.rules);
                self.env_fingerprint_values.clone_from(&fp.values);
            }
            EventData::EnvOverrideRecorded(data) => {
                self.env_fingerprint_hash = Some(data.actual_hash.clone());
                self.env_fingerprint_rules.clone_from(&data.rules);
                self.env_fingerprint_values.clone_from(&data.values);
            }
            EventData::ApprovalRecorded(_) | EventData::AdapterStep(_) => {}
        }
        self.last_applied_seq = event.seq;
    }

    /// Usage counters as of `now`. Wall time counts whole seconds since the
    /// job started and never goes negative.
    #[must_use]
    pub fn budget_state(&self, now: DateTime<Utc>) -> BudgetState {
        let wall_time_seconds = self
            .started_at
            .map(|start| (now - start).num_seconds())
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(0);
        BudgetState {
            wall_time_seconds,
            retry_count: self.retry_count,
            step_count: self.step_count,
            tool_call_count: self.tool_call_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        CountersUpdatedData, IdempotencyRecordedData, JobInitializedData, LeaseReleasedData,
        StatusChangedData,
    };
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 9, 0, 0).unwrap()
    }

    fn ev(seq: u64, data: EventData) -> Event {
        Event {
            seq,
            created_at: t0(),
            data,
        }
    }

    fn sample() -> Vec<Event> {
        let lease = LeaseRecord {
            worker_id: "w1".into(),
            lease_id: "l1".into(),
            acquired_at: t0(),
            heartbeat_at: t0(),
            expires_at: t0() + Duration::seconds(30),
        };
        vec![
            ev(
                1,
                EventData::JobInitialized(JobInitializedData {
                    job_id: "job_a".into(),
                    status: JobStatus::Queued,
                    started_at: t0(),
                }),
            ),
            ev(
                2,
                EventData::StatusChanged(StatusChangedData {
                    from: JobStatus::Queued,
                    to: JobStatus::Running,
                }),
            ),
            ev(
                3,
                EventData::CountersUpdated(CountersUpdatedData {
                    retry_count: 1,
                    step_count: 4,
                    tool_call_count: 9,
                }),
            ),
            ev(
                4,
                EventData::IdempotencyRecorded(IdempotencyRecordedData { key: "k1".into() }),
            ),
            ev(5, EventData::LeaseSet(lease)),
        ]
    }

    #[test]
    fn replay_folds_each_event() {
        let state = JobState::replay("job_a", &sample());
        assert_eq!(state.status, JobStatus::Running);
        assert_eq!(state.step_count, 4);
        assert!(state.idempotency_keys.contains("k1"));
        assert_eq!(state.lease.as_ref().unwrap().worker_id, "w1");
        assert_eq!(state.last_applied_seq, 5);
        assert_eq!(state.started_at, Some(t0()));
    }

    #[test]
    fn release_clears_lease() {
        let mut events = sample();
        events.push(ev(
            6,
            EventData::LeaseReleased(LeaseReleasedData {
                worker_id: "w1".into(),
                lease_id: "l1".into(),
            }),
        ));
        assert!(JobState::replay("job_a", &events).lease.is_none());
    }

    #[test]
    fn adapter_step_changes_only_seq() {
        let mut events = sample();
        let before = JobState::replay("job_a", &events);
        events.push(ev(6, EventData::AdapterStep(serde_json::json!({"n": 1}))));
        let after = JobState::replay("job_a", &events);
        assert_eq!(after.last_applied_seq, 6);
        assert_eq!(
            JobState {
                last_applied_seq: 5,
                ..after
            },
            before
        );
    }

    #[test]
    fn split_replay_matches_full_replay() {
        let events = sample();
        let full = JobState::replay("job_a", &events);
        for cut in 0..=events.len() {
            let mut partial = JobState::replay("job_a", &events[..cut]);
            let json = serde_json::to_value(&partial).unwrap();
            partial = serde_json::from_value(json).unwrap();
            for e in &events[cut..] {
                partial.apply(e);
            }
            assert_eq!(partial, full, "cut at {cut}");
        }
    }

    #[test]
    fn budget_state_counts_whole_seconds() {
        let state = JobState::replay("job_a", &sample());
        let usage = state.budget_state(t0() + Duration::milliseconds(61_900));
        assert_eq!(usage.wall_time_seconds, 61);
        assert_eq!(usage.tool_call_count, 9);
        assert_eq!(state.budget_state(t0() - Duration::seconds(5)).wall_time_seconds, 0);
        assert_eq!(JobState::new("x").budget_state(t0()).wall_time_seconds, 0);
    }
}
