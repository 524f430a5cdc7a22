//! Checkpoints and approvals.
//!
//! Neither is stored on its own. A [`Checkpoint`] is a view of a
//! `checkpoint_emitted` event whose id is `cp_<seq>`; an
//! [`ApprovalRecord`] is a view of an `approval_recorded` event. Both are
//! recomputed from the log on every read.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::BudgetState;
use crate::event::{Event, EventData};
use crate::status::JobStatus;

/// Longest accepted checkpoint summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointKind {
    Plan,
    Progress,
    DecisionNeeded,
    Blocked,
    Completed,
}

impl CheckpointKind {
    pub const ALL: [Self; 5] = [
        Self::Plan,
        Self::Progress,
        Self::DecisionNeeded,
        Self::Blocked,
        Self::Completed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Progress => "progress",
            Self::DecisionNeeded => "decision-needed",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown checkpoint type '{got}': expected plan, progress, decision-needed, blocked or completed")]
pub struct ParseCheckpointKindError {
    pub got: String,
}

impl FromStr for CheckpointKind {
    type Err = ParseCheckpointKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ParseCheckpointKindError { got: s.to_string() })
    }
}

/// Paths touched since the previous checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsDelta {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

/// What a human must do before a decision-needed checkpoint clears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub kind: String,
    pub instructions: String,
}

/// Arguments for emitting a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInput {
    pub kind: CheckpointKind,
    pub summary: String,
    /// Defaults to the job's current status.
    pub status: Option<JobStatus>,
    pub artifacts_delta: ArtifactsDelta,
    /// Mandatory for [`CheckpointKind::DecisionNeeded`].
    pub required_action: Option<RequiredAction>,
    pub reason_codes: Vec<String>,
}

impl CheckpointInput {
    #[must_use]
    pub fn new(kind: CheckpointKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            status: None,
            artifacts_delta: ArtifactsDelta::default(),
            required_action: None,
            reason_codes: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_required_action(
        mut self,
        kind: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        self.required_action = Some(RequiredAction {
            kind: kind.into(),
            instructions: instructions.into(),
        });
        self
    }

    #[must_use]
    pub fn with_reason_code(mut self, code: impl Into<String>) -> Self {
        self.reason_codes.push(code.into());
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, delta: ArtifactsDelta) -> Self {
        self.artifacts_delta = delta;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub job_id: String,
    #[serde(rename = "type")]
    pub kind: CheckpointKind,
    pub summary: String,
    pub status: JobStatus,
    pub budget_state: BudgetState,
    pub artifacts_delta: ArtifactsDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    pub reason_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// View of a `checkpoint_emitted` event; `None` for any other event.
    #[must_use]
    pub fn from_event(job_id: &str, event: &Event) -> Option<Self> {
        let EventData::CheckpointEmitted(data) = &event.data else {
            return None;
        };
        Some(Self {
            checkpoint_id: checkpoint_id_for_seq(event.seq),
            job_id: job_id.to_string(),
            kind: data.kind,
            summary: data.summary.clone(),
            status: data.status,
            budget_state: data.budget_state,
            artifacts_delta: data.artifacts_delta.clone(),
            required_action: data.required_action.clone(),
            reason_codes: data.reason_codes.clone(),
            created_at: event.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRecord {
    pub job_id: String,
    pub checkpoint_id: String,
    pub reason: String,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

impl ApprovalRecord {
    #[must_use]
    pub fn from_event(job_id: &str, event: &Event) -> Option<Self> {
        let EventData::ApprovalRecorded(data) = &event.data else {
            return None;
        };
        Some(Self {
            job_id: job_id.to_string(),
            checkpoint_id: data.checkpoint_id.clone(),
            reason: data.reason.clone(),
            approved_by: data.approved_by.clone(),
            approved_at: event.created_at,
        })
    }
}

#[must_use]
pub fn checkpoint_id_for_seq(seq: u64) -> String {
    format!("cp_{seq}")
}

/// Sequence number behind a `cp_<n>` id; `None` unless `n` is a positive
/// integer.
#[must_use]
pub fn parse_checkpoint_id(id: &str) -> Option<u64> {
    id.trim()
        .strip_prefix("cp_")?
        .parse::<u64>()
        .ok()
        .filter(|seq| *seq > 0)
}

/// All checkpoints in log order.
#[must_use]
pub fn checkpoints(job_id: &str, events: &[Event]) -> Vec<Checkpoint> {
    events
        .iter()
        .filter_map(|e| Checkpoint::from_event(job_id, e))
        .collect()
}

/// All approvals in log order.
#[must_use]
pub fn approvals(job_id: &str, events: &[Event]) -> Vec<ApprovalRecord> {
    events
        .iter()
        .filter_map(|e| ApprovalRecord::from_event(job_id, e))
        .collect()
}

/// The latest decision-needed checkpoint, if it has not been approved.
///
/// Only the most recent decision-needed checkpoint gates resumption.
#[must_use]
pub fn pending_decision(job_id: &str, events: &[Event]) -> Option<Checkpoint> {
    let latest = checkpoints(job_id, events)
        .into_iter()
        .rev()
        .find(|cp| cp.kind == CheckpointKind::DecisionNeeded)?;
    let approved = approvals(job_id, events)
        .iter()
        .any(|a| a.checkpoint_id == latest.checkpoint_id);
    (!approved).then_some(latest)
}
