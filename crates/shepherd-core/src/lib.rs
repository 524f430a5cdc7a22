//! shepherd-core library.
//!
//! Durable, local-first job state for long-running agent work. Each job is
//! an append-only JSONL event log under `<root>/jobs/<job_id>/`, guarded by
//! a per-job append lock and cached by an atomically written snapshot.
//!
//! # Conventions
//!
//! - **Errors**: typed errors via `thiserror`, each mapping to an
//!   [`ErrorCode`]. Configuration loading uses `anyhow::Result`.
//! - **Logging**: `tracing` macros (`warn!` for recovery actions, `debug!`
//!   for retries).

#![forbid(unsafe_code)]

pub mod budget;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod envfp;
pub mod error;
pub mod event;
pub mod lease;
pub mod lock;
pub mod recovery;
pub mod runtime;
pub mod state;
pub mod status;
pub mod store;

pub use budget::{BudgetLimits, BudgetState, BudgetUsage, Spend};
pub use checkpoint::{ApprovalRecord, Checkpoint, CheckpointInput, CheckpointKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EffectiveConfig, RuntimeConfig};
pub use envfp::{Fingerprint, FingerprintSource, StaticFingerprint, SystemFingerprint};
pub use error::{ErrorCode, RuntimeError};
pub use event::{Event, EventData, EventType};
pub use lease::LeaseRecord;
pub use runtime::{JobRuntime, ResumeInput};
pub use state::JobState;
pub use status::JobStatus;
pub use store::JobStore;
