use std::fmt;

use crate::checkpoint::Checkpoint;
use crate::envfp::FingerprintError;
use crate::lease::LeaseError;
use crate::status::InvalidTransition;
use crate::store::StoreError;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidInput,
    InvalidStateTransition,
    LeaseConflict,
    BudgetExceeded,
    CheckpointApprovalRequired,
    EnvFingerprintMismatch,
    StoreCorrupt,
    AppendConflict,
    LockContention,
    Io,
}

impl ErrorCode {
    /// Stable code identifier for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidInput => "E_INVALID_INPUT",
            Self::InvalidStateTransition => "E_INVALID_STATE_TRANSITION",
            Self::LeaseConflict => "E_LEASE_CONFLICT",
            Self::BudgetExceeded => "E_BUDGET_EXCEEDED",
            Self::CheckpointApprovalRequired => "E_CHECKPOINT_APPROVAL_REQUIRED",
            Self::EnvFingerprintMismatch => "E_ENV_FINGERPRINT_MISMATCH",
            Self::StoreCorrupt => "E_STORE_CORRUPT",
            Self::AppendConflict => "E_APPEND_CONFLICT",
            Self::LockContention => "E_LOCK_CONTENTION",
            Self::Io => "E_IO",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidInput => "Invalid input",
            Self::InvalidStateTransition => "Invalid state transition",
            Self::LeaseConflict => "Lease held by another worker",
            Self::BudgetExceeded => "Budget exceeded",
            Self::CheckpointApprovalRequired => "Checkpoint approval required",
            Self::EnvFingerprintMismatch => "Environment fingerprint mismatch",
            Self::StoreCorrupt => "Corrupt job store",
            Self::AppendConflict => "Event append conflict",
            Self::LockContention => "Lock contention",
            Self::Io => "Store I/O failure",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidInput => None,
            Self::InvalidStateTransition => Some(
                "Follow valid transitions: queued -> running -> paused/blocked_* -> running -> completed.",
            ),
            Self::LeaseConflict => {
                Some("Wait for the current lease to expire or for its holder to release it.")
            }
            Self::BudgetExceeded => Some("Raise the budget limits or cancel the job."),
            Self::CheckpointApprovalRequired => {
                Some("Approve the pending decision-needed checkpoint with `shep approve`.")
            }
            Self::EnvFingerprintMismatch => {
                Some("Restore the original environment or resume with --override-env and a reason.")
            }
            Self::StoreCorrupt => Some("Inspect events.jsonl for the job; the log is the source of truth."),
            Self::AppendConflict => Some("Re-read the job state and retry the operation."),
            Self::LockContention => Some(
                "Retry after the other writer releases append.lock; remove it only if no process holds it.",
            ),
            Self::Io => Some("Check disk space and write permissions."),
        }
    }

    /// Process exit code used by the CLI for this error class.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::CheckpointApprovalRequired => 4,
            Self::InvalidInput => 6,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Crate-level error returned by every [`JobRuntime`](crate::runtime::JobRuntime)
/// operation.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Malformed arguments, unknown checkpoint, or a job that was never
    /// initialized.
    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
        job_id: Option<String>,
        checkpoint_id: Option<String>,
    },

    /// Illegal status change.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Lease protocol rejection.
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// Usage exceeded a configured limit. The job was moved to
    /// `blocked_budget` and `checkpoint` records the stop.
    #[error("budget exceeded for job {job_id}: {}", .violations.join(", "))]
    BudgetExceeded {
        job_id: String,
        violations: Vec<String>,
        checkpoint: Box<Checkpoint>,
    },

    /// A decision-needed checkpoint is still waiting for a human.
    #[error("approval required before resuming job {job_id}: checkpoint {checkpoint_id} is pending")]
    ApprovalRequired {
        job_id: String,
        checkpoint_id: String,
    },

    /// The environment drifted since the job was paused or blocked.
    #[error(
        "environment fingerprint mismatch for job {job_id}: expected {expected_hash}, found {actual_hash}"
    )]
    EnvMismatch {
        job_id: String,
        expected_hash: String,
        actual_hash: String,
    },

    /// Every optimistic append attempt lost the race to another writer.
    #[error("append contention on job {job_id} exceeded {attempts} attempts")]
    ContentionExhausted { job_id: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
}

impl RuntimeError {
    pub(crate) fn invalid_for_job(job_id: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            job_id: Some(job_id.to_string()),
            checkpoint_id: None,
        }
    }

    pub(crate) fn invalid_checkpoint(
        job_id: &str,
        checkpoint_id: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidInput {
            message: message.into(),
            job_id: Some(job_id.to_string()),
            checkpoint_id: Some(checkpoint_id.to_string()),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput { .. } => ErrorCode::InvalidInput,
            Self::InvalidTransition(_) => ErrorCode::InvalidStateTransition,
            Self::Lease(err) => err.code(),
            Self::BudgetExceeded { .. } => ErrorCode::BudgetExceeded,
            Self::ApprovalRequired { .. } => ErrorCode::CheckpointApprovalRequired,
            Self::EnvMismatch { .. } => ErrorCode::EnvFingerprintMismatch,
            Self::ContentionExhausted { .. } => ErrorCode::AppendConflict,
            Self::Store(err) => err.code(),
            Self::Fingerprint(_) => ErrorCode::InvalidInput,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
