//! Job lifecycle status and the transition graph between statuses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    BlockedDecision,
    BlockedBudget,
    BlockedError,
    Completed,
    Canceled,
}

impl JobStatus {
    pub const ALL: [Self; 8] = [
        Self::Queued,
        Self::Running,
        Self::Paused,
        Self::BlockedDecision,
        Self::BlockedBudget,
        Self::BlockedError,
        Self::Completed,
        Self::Canceled,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::BlockedDecision => "blocked_decision",
            Self::BlockedBudget => "blocked_budget",
            Self::BlockedError => "blocked_error",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    /// `completed` and `canceled` have no outgoing edges.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// Statuses reachable from `self` in one step.
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Queued => &[Self::Running, Self::Canceled],
            Self::Running => &[
                Self::Paused,
                Self::BlockedDecision,
                Self::BlockedBudget,
                Self::BlockedError,
                Self::Completed,
                Self::Canceled,
            ],
            Self::Paused | Self::BlockedDecision | Self::BlockedBudget => {
                &[Self::Running, Self::BlockedError, Self::Canceled]
            }
            Self::BlockedError => &[Self::Running, Self::Canceled],
            Self::Completed | Self::Canceled => &[],
        }
    }

    /// Validate whether a transition from `self` to `target` is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when the edge is not in the graph,
    /// including self-loops and any edge out of a terminal status.
    pub fn can_transition_to(self, target: Self) -> Result<(), InvalidTransition> {
        if self.allowed_targets().contains(&target) {
            return Ok(());
        }
        let reason = if self.is_terminal() {
            "terminal status has no outgoing transitions"
        } else if self == target {
            "no-op transition is not allowed"
        } else {
            "transition is not in the allowed set"
        };
        Err(InvalidTransition {
            from: self.as_str().to_string(),
            to: target.as_str().to_string(),
            reason,
        })
    }
}

/// Pure lookup over the transition graph.
///
/// # Errors
///
/// Returns [`InvalidTransition`] if `to` is not reachable from `from`.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), InvalidTransition> {
    from.can_transition_to(to)
}

/// Like [`validate_transition`] but accepts raw status names, rejecting any
/// name outside the known set instead of coercing it.
///
/// # Errors
///
/// Returns [`InvalidTransition`] for an unknown `from` or `to`, or for an
/// edge outside the graph.
pub fn validate_transition_str(from: &str, to: &str) -> Result<(), InvalidTransition> {
    let Ok(from_status) = from.parse::<JobStatus>() else {
        return Err(InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: "unknown source status",
        });
    };
    let Ok(to_status) = to.parse::<JobStatus>() else {
        return Err(InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: "unknown target status",
        });
    };
    validate_transition(from_status, to_status)
}

/// Error returned for an illegal status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid state transition {from} -> {to}: {reason}")]
pub struct InvalidTransition {
    pub from: String,
    pub to: String,
    pub reason: &'static str,
}

/// Error returned when a status name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{got}'")]
pub struct ParseStatusError {
    pub got: String,
}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseStatusError { got: s.to_string() })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
