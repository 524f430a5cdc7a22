//! Job lifecycle operations.
//!
//! Every operation starts from a fresh [`recover`](JobRuntime::recover):
//! latest snapshot plus the events after it. Mutations decide on that state
//! and append with a compare-and-swap on the last sequence number; losing
//! the race re-reads and re-decides, up to [`MAX_CAS_ATTEMPTS`] times.
//! Validation happens before any append, so a rejected call writes nothing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::budget::{self, BudgetLimits, BudgetUsage, Spend};
use crate::checkpoint::{
    self, ApprovalRecord, Checkpoint, CheckpointInput, CheckpointKind, MAX_SUMMARY_CHARS,
};
use crate::clock::{Clock, SystemClock};
use crate::config::EffectiveConfig;
use crate::envfp::{self, FingerprintSource, SystemFingerprint};
use crate::error::{ErrorCode, RuntimeError};
use crate::event::{
    ApprovalRecordedData, CheckpointEmittedData, CountersUpdatedData, EnvOverrideData, Event,
    EventData, IdempotencyRecordedData, JobInitializedData, LeaseReleasedData, StatusChangedData,
};
use crate::lease;
use crate::state::JobState;
use crate::status::{JobStatus, validate_transition};
use crate::store::{JobStore, StoreError};

/// Optimistic append retries before a mutation gives up.
pub const MAX_CAS_ATTEMPTS: u32 = 64;

const DEFAULT_LEASE_TTL_SECS: i64 = 30;

type Result<T> = std::result::Result<T, RuntimeError>;

/// Options for [`JobRuntime::resume`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeInput {
    pub override_env_mismatch: bool,
    pub override_reason: String,
    pub approved_by: String,
}

impl ResumeInput {
    /// Resume even if the environment drifted, recording who allowed it.
    #[must_use]
    pub fn with_env_override(reason: impl Into<String>, approved_by: impl Into<String>) -> Self {
        Self {
            override_env_mismatch: true,
            override_reason: reason.into(),
            approved_by: approved_by.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// The job must have no events yet.
    Fresh,
    /// The job must have been initialized.
    Initialized,
}

/// Lifecycle operations over a [`JobStore`].
#[derive(Clone)]
pub struct JobRuntime {
    store: JobStore,
    clock: Arc<dyn Clock>,
    fingerprints: Arc<dyn FingerprintSource>,
    fingerprint_rules: Vec<String>,
    lease_ttl: Duration,
}

impl std::fmt::Debug for JobRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRuntime")
            .field("store", &self.store)
            .field("fingerprint_rules", &self.fingerprint_rules)
            .field("lease_ttl", &self.lease_ttl)
            .finish_non_exhaustive()
    }
}

impl JobRuntime {
    #[must_use]
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            fingerprints: Arc::new(SystemFingerprint),
            fingerprint_rules: envfp::default_rules(),
            lease_ttl: Duration::seconds(DEFAULT_LEASE_TTL_SECS),
        }
    }

    /// Build a runtime from resolved configuration.
    #[must_use]
    pub fn from_config(config: &EffectiveConfig) -> Self {
        let store = JobStore::new(&config.root).with_lock_options(config.config.lock.options());
        let ttl_secs = i64::try_from(config.config.lease.ttl_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_LEASE_TTL_SECS);
        Self::new(store)
            .with_lease_ttl(Duration::seconds(ttl_secs))
            .with_fingerprint_rules(config.config.fingerprint.rules.clone())
    }

    /// Use `clock` for every timestamp, including lock staleness.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.store = self.store.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_fingerprint_source(mut self, source: Arc<dyn FingerprintSource>) -> Self {
        self.fingerprints = source;
        self
    }

    /// Rules captured at init and used on resume when a job recorded none.
    #[must_use]
    pub fn with_fingerprint_rules(mut self, rules: Vec<String>) -> Self {
        self.fingerprint_rules = rules;
        self
    }

    #[must_use]
    pub const fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &JobStore {
        &self.store
    }

    #[must_use]
    pub const fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Whether the job's directory exists.
    ///
    /// # Errors
    ///
    /// Invalid job id.
    pub fn job_exists(&self, job_id: &str) -> Result<bool> {
        Ok(self.store.job_exists(job_id)?)
    }

    /// Rebuild the job's state from its snapshot and log.
    ///
    /// A job without events recovers to the default `queued` state.
    ///
    /// # Errors
    ///
    /// Store errors, including corruption of the log or snapshot.
    pub fn recover(&self, job_id: &str) -> Result<JobState> {
        Ok(self.recover_with_events(job_id)?.0)
    }

    /// The job's full event history.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn events(&self, job_id: &str) -> Result<Vec<Event>> {
        Ok(self.store.load_events(job_id)?)
    }

    fn recover_with_events(&self, job_id: &str) -> Result<(JobState, Vec<Event>)> {
        // Snapshot before log: a snapshot is saved only after its event is
        // durable, so a log read afterwards can never be behind it.
        let snapshot = self.store.load_snapshot(job_id)?;
        let events = self.store.load_events(job_id)?;
        let last_seq = events.last().map_or(0, |e| e.seq);

        let mut state = JobState::new(job_id);
        if let Some(snapshot) = snapshot {
            let corrupt = |reason: String| StoreError::CorruptSnapshot {
                job_id: job_id.to_string(),
                reason,
            };
            if snapshot.last_seq > last_seq {
                return Err(corrupt(format!(
                    "snapshot at seq {} is ahead of log at seq {last_seq}",
                    snapshot.last_seq
                ))
                .into());
            }
            let cached: JobState =
                serde_json::from_value(snapshot.state).map_err(|e| corrupt(e.to_string()))?;
            if cached.job_id != job_id || cached.last_applied_seq != snapshot.last_seq {
                return Err(corrupt("snapshot does not match its header".to_string()).into());
            }
            state = cached;
        }

        let applied = state.last_applied_seq;
        for event in events.iter().filter(|e| e.seq > applied) {
            state.apply(event);
        }
        Ok((state, events))
    }

    fn require_initialized(job_id: &str, state: &JobState) -> Result<()> {
        if state.is_initialized() {
            Ok(())
        } else {
            Err(RuntimeError::invalid_for_job(job_id, "job is not initialized"))
        }
    }

    // -----------------------------------------------------------------------
    // Commit loop
    // -----------------------------------------------------------------------

    /// Recover, let `decide` pick an event (or nothing), and CAS-append it.
    ///
    /// Returns the state after the append and the appended event. When
    /// `decide` returns `None` nothing is written and the recovered state is
    /// returned as is.
    fn commit<F>(&self, job_id: &str, expect: Expect, mut decide: F) -> Result<(JobState, Option<Event>)>
    where
        F: FnMut(&JobState, &[Event]) -> Result<Option<EventData>>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let (mut state, events) = self.recover_with_events(job_id)?;
            match expect {
                Expect::Fresh if state.is_initialized() => {
                    return Err(RuntimeError::invalid_for_job(job_id, "job already initialized"));
                }
                Expect::Initialized => Self::require_initialized(job_id, &state)?,
                Expect::Fresh => {}
            }

            let Some(data) = decide(&state, &events)? else {
                return Ok((state, None));
            };

            let now = self.now();
            match self.store.append_cas(job_id, data, state.last_applied_seq, now) {
                Ok(event) => {
                    state.apply(&event);
                    self.store
                        .save_snapshot(job_id, state.last_applied_seq, &state, now)?;
                    return Ok((state, Some(event)));
                }
                Err(StoreError::AppendConflict { expected, actual, .. }) => {
                    tracing::debug!(job_id, attempt, expected, actual, "append lost CAS race, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(RuntimeError::ContentionExhausted {
            job_id: job_id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create a job: `job_initialized` in `queued`, then the environment
    /// fingerprint captured with the configured rules.
    ///
    /// # Errors
    ///
    /// Invalid input if the job already has events or a fingerprint rule is
    /// unknown; store errors otherwise.
    pub fn init_job(&self, job_id: &str) -> Result<JobState> {
        self.store.ensure_job(job_id)?;
        let started_at = self.now();
        let fingerprint = self.fingerprints.capture(&self.fingerprint_rules, started_at)?;

        self.commit(job_id, Expect::Fresh, |_, _| {
            Ok(Some(EventData::JobInitialized(JobInitializedData {
                job_id: job_id.to_string(),
                status: JobStatus::Queued,
                started_at,
            })))
        })?;
        let (state, _) = self.commit(job_id, Expect::Initialized, |_, _| {
            Ok(Some(EventData::EnvFingerprintSet(fingerprint.clone())))
        })?;
        Ok(state)
    }

    /// Move the job to `to`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidTransition`] if the edge is not allowed.
    pub fn change_status(&self, job_id: &str, to: JobStatus) -> Result<JobState> {
        let (state, _) = self.commit(job_id, Expect::Initialized, |state, _| {
            validate_transition(state.status, to)?;
            Ok(Some(EventData::StatusChanged(StatusChangedData {
                from: state.status,
                to,
            })))
        })?;
        Ok(state)
    }

    /// Record absolute counter values.
    ///
    /// # Errors
    ///
    /// Store errors, or an uninitialized job.
    pub fn update_counters(
        &self,
        job_id: &str,
        retry_count: u64,
        step_count: u64,
        tool_call_count: u64,
    ) -> Result<JobState> {
        let data = CountersUpdatedData {
            retry_count,
            step_count,
            tool_call_count,
        };
        let (state, _) = self.commit(job_id, Expect::Initialized, |_, _| {
            Ok(Some(EventData::CountersUpdated(data)))
        })?;
        Ok(state)
    }

    /// Add `key` to the job's idempotency set. Recording a key that is
    /// already present writes nothing.
    ///
    /// # Errors
    ///
    /// Invalid input for an empty key.
    pub fn record_idempotency_key(&self, job_id: &str, key: &str) -> Result<JobState> {
        let key = key.trim();
        if key.is_empty() {
            return Err(RuntimeError::invalid_for_job(job_id, "idempotency key must not be empty"));
        }
        let (state, _) = self.commit(job_id, Expect::Initialized, |state, _| {
            if state.idempotency_keys.contains(key) {
                return Ok(None);
            }
            Ok(Some(EventData::IdempotencyRecorded(IdempotencyRecordedData {
                key: key.to_string(),
            })))
        })?;
        Ok(state)
    }

    /// Append an opaque adapter marker. Replay ignores its content.
    ///
    /// # Errors
    ///
    /// Store errors, or an uninitialized job.
    pub fn record_adapter_step(&self, job_id: &str, payload: serde_json::Value) -> Result<JobState> {
        let (state, _) = self.commit(job_id, Expect::Initialized, |_, _| {
            Ok(Some(EventData::AdapterStep(payload.clone())))
        })?;
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Checkpoints and approvals
    // -----------------------------------------------------------------------

    /// Emit a checkpoint. Its id is `cp_<seq>` of the appended event.
    ///
    /// # Errors
    ///
    /// Invalid input for an empty or over-long summary, or a decision-needed
    /// checkpoint without a required action. Nothing is written on error.
    pub fn emit_checkpoint(&self, job_id: &str, input: CheckpointInput) -> Result<Checkpoint> {
        let summary = input.summary.trim().to_string();
        let len = summary.chars().count();
        if len == 0 || len > MAX_SUMMARY_CHARS {
            return Err(RuntimeError::invalid_for_job(
                job_id,
                format!("checkpoint summary must be 1..={MAX_SUMMARY_CHARS} characters, got {len}"),
            ));
        }
        if input.kind == CheckpointKind::DecisionNeeded && input.required_action.is_none() {
            return Err(RuntimeError::invalid_for_job(
                job_id,
                "decision-needed checkpoint requires required_action",
            ));
        }
        let reason_codes: Vec<String> = input
            .reason_codes
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        let (_, event) = self.commit(job_id, Expect::Initialized, |state, _| {
            Ok(Some(EventData::CheckpointEmitted(CheckpointEmittedData {
                kind: input.kind,
                summary: summary.clone(),
                status: input.status.unwrap_or(state.status),
                budget_state: state.budget_state(self.now()),
                artifacts_delta: input.artifacts_delta.clone(),
                required_action: input.required_action.clone(),
                reason_codes: reason_codes.clone(),
            })))
        })?;

        event
            .as_ref()
            .and_then(|e| Checkpoint::from_event(job_id, e))
            .ok_or_else(|| RuntimeError::invalid_for_job(job_id, "checkpoint was not recorded"))
    }

    /// Every checkpoint, in emission order.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn list_checkpoints(&self, job_id: &str) -> Result<Vec<Checkpoint>> {
        let events = self.store.load_events(job_id)?;
        Ok(checkpoint::checkpoints(job_id, &events))
    }

    /// Look up one checkpoint by id.
    ///
    /// # Errors
    ///
    /// Invalid input for a malformed or unknown id.
    pub fn get_checkpoint(&self, job_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        if checkpoint::parse_checkpoint_id(checkpoint_id).is_none() {
            return Err(RuntimeError::invalid_checkpoint(
                job_id,
                checkpoint_id,
                format!("invalid checkpoint id {checkpoint_id:?}: expected cp_<positive integer>"),
            ));
        }
        let wanted = checkpoint_id.trim();
        self.list_checkpoints(job_id)?
            .into_iter()
            .find(|cp| cp.checkpoint_id == wanted)
            .ok_or_else(|| {
                RuntimeError::invalid_checkpoint(job_id, checkpoint_id, "checkpoint not found")
            })
    }

    /// Approve a decision-needed checkpoint.
    ///
    /// # Errors
    ///
    /// Invalid input when the checkpoint is unknown or not decision-needed,
    /// or when `reason` or `approved_by` is empty.
    pub fn approve_checkpoint(
        &self,
        job_id: &str,
        checkpoint_id: &str,
        reason: &str,
        approved_by: &str,
    ) -> Result<ApprovalRecord> {
        let cp = self.get_checkpoint(job_id, checkpoint_id)?;
        if cp.kind != CheckpointKind::DecisionNeeded {
            return Err(RuntimeError::invalid_checkpoint(
                job_id,
                &cp.checkpoint_id,
                format!("only decision-needed checkpoints can be approved, got {}", cp.kind),
            ));
        }
        let (reason, approved_by) = (reason.trim(), approved_by.trim());
        if reason.is_empty() || approved_by.is_empty() {
            return Err(RuntimeError::invalid_checkpoint(
                job_id,
                &cp.checkpoint_id,
                "approval requires a non-empty reason and approver",
            ));
        }

        let (_, event) = self.commit(job_id, Expect::Initialized, |_, _| {
            Ok(Some(EventData::ApprovalRecorded(ApprovalRecordedData {
                checkpoint_id: cp.checkpoint_id.clone(),
                reason: reason.to_string(),
                approved_by: approved_by.to_string(),
            })))
        })?;

        event
            .as_ref()
            .and_then(|e| ApprovalRecord::from_event(job_id, e))
            .ok_or_else(|| {
                RuntimeError::invalid_checkpoint(job_id, &cp.checkpoint_id, "approval was not recorded")
            })
    }

    /// Every approval, in log order.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn list_approvals(&self, job_id: &str) -> Result<Vec<ApprovalRecord>> {
        let events = self.store.load_events(job_id)?;
        Ok(checkpoint::approvals(job_id, &events))
    }

    // -----------------------------------------------------------------------
    // Budget
    // -----------------------------------------------------------------------

    /// [`check_budget_with_spend`](Self::check_budget_with_spend) without
    /// cost or token usage.
    ///
    /// # Errors
    ///
    /// See [`check_budget_with_spend`](Self::check_budget_with_spend).
    pub fn check_budget(&self, job_id: &str, limits: &BudgetLimits) -> Result<BudgetUsage> {
        self.check_budget_with_spend(job_id, limits, Spend::default())
    }

    /// Evaluate usage against `limits`.
    ///
    /// Within limits this only reads. Over a limit the job moves to
    /// `blocked_budget` (unless already there), a `blocked` checkpoint with
    /// reason code `E_BUDGET_EXCEEDED` is emitted, and
    /// [`RuntimeError::BudgetExceeded`] carries that checkpoint.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::BudgetExceeded`] when over budget; an invalid
    /// transition if the job cannot be blocked from its current status.
    pub fn check_budget_with_spend(
        &self,
        job_id: &str,
        limits: &BudgetLimits,
        spend: Spend,
    ) -> Result<BudgetUsage> {
        let state = self.recover(job_id)?;
        Self::require_initialized(job_id, &state)?;

        let usage = BudgetUsage::new(state.budget_state(self.now()), spend);
        let verdict = budget::evaluate(limits, &usage);
        if !verdict.exceeded() {
            return Ok(usage);
        }

        if state.status != JobStatus::BlockedBudget {
            self.change_status(job_id, JobStatus::BlockedBudget)?;
        }
        let summary = format!("budget exceeded: {}", verdict.violations.join(", "));
        let checkpoint = self.emit_checkpoint(
            job_id,
            CheckpointInput::new(CheckpointKind::Blocked, summary)
                .with_status(JobStatus::BlockedBudget)
                .with_reason_code(ErrorCode::BudgetExceeded.code()),
        )?;

        Err(RuntimeError::BudgetExceeded {
            job_id: job_id.to_string(),
            violations: verdict.violations,
            checkpoint: Box::new(checkpoint),
        })
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    /// Gate and perform resumption, checking in this order:
    ///
    /// 1. An unapproved latest decision-needed checkpoint fails with
    ///    [`RuntimeError::ApprovalRequired`], even if an environment
    ///    override was requested.
    /// 2. The environment fingerprint is re-captured with the job's rules.
    ///    A job that never recorded one adopts the fresh one.
    /// 3. On mismatch without override the job is moved to `blocked_error`,
    ///    a `blocked` checkpoint is emitted and
    ///    [`RuntimeError::EnvMismatch`] returned.
    /// 4. On mismatch with override an `env_override_recorded` event adopts
    ///    the new fingerprint.
    /// 5. The job moves to `running` unless it already is.
    ///
    /// # Errors
    ///
    /// As listed above, plus invalid input for an override without reason
    /// or approver and invalid transitions out of terminal statuses.
    pub fn resume(&self, job_id: &str, input: &ResumeInput) -> Result<JobState> {
        let (state, events) = self.recover_with_events(job_id)?;
        Self::require_initialized(job_id, &state)?;

        if let Some(pending) = checkpoint::pending_decision(job_id, &events) {
            return Err(RuntimeError::ApprovalRequired {
                job_id: job_id.to_string(),
                checkpoint_id: pending.checkpoint_id,
            });
        }

        let rules = if state.env_fingerprint_rules.is_empty() {
            self.fingerprint_rules.clone()
        } else {
            state.env_fingerprint_rules.clone()
        };
        let current = self.fingerprints.capture(&rules, self.now())?;

        match state.env_fingerprint_hash.as_deref() {
            None => {
                self.commit(job_id, Expect::Initialized, |_, _| {
                    Ok(Some(EventData::EnvFingerprintSet(current.clone())))
                })?;
            }
            Some(expected) if expected == current.hash => {}
            Some(expected) if !input.override_env_mismatch => {
                if state.status != JobStatus::BlockedError {
                    match self.change_status(job_id, JobStatus::BlockedError) {
                        Ok(_) | Err(RuntimeError::InvalidTransition(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                self.emit_checkpoint(
                    job_id,
                    CheckpointInput::new(
                        CheckpointKind::Blocked,
                        format!(
                            "environment fingerprint mismatch: expected {expected}, found {}",
                            current.hash
                        ),
                    )
                    .with_reason_code(ErrorCode::EnvFingerprintMismatch.code()),
                )?;
                return Err(RuntimeError::EnvMismatch {
                    job_id: job_id.to_string(),
                    expected_hash: expected.to_string(),
                    actual_hash: current.hash,
                });
            }
            Some(expected) => {
                let reason = input.override_reason.trim();
                let approved_by = input.approved_by.trim();
                if reason.is_empty() || approved_by.is_empty() {
                    return Err(RuntimeError::invalid_for_job(
                        job_id,
                        "environment override requires a reason and approver",
                    ));
                }
                let data = EnvOverrideData {
                    expected_hash: expected.to_string(),
                    actual_hash: current.hash.clone(),
                    rules: current.rules.clone(),
                    values: current.values.clone(),
                    reason: reason.to_string(),
                    approved_by: approved_by.to_string(),
                };
                self.commit(job_id, Expect::Initialized, |_, _| {
                    Ok(Some(EventData::EnvOverrideRecorded(data.clone())))
                })?;
            }
        }

        let (state, _) = self.commit(job_id, Expect::Initialized, |state, events| {
            if let Some(pending) = checkpoint::pending_decision(job_id, events) {
                return Err(RuntimeError::ApprovalRequired {
                    job_id: job_id.to_string(),
                    checkpoint_id: pending.checkpoint_id,
                });
            }
            if state.status == JobStatus::Running {
                return Ok(None);
            }
            validate_transition(state.status, JobStatus::Running)?;
            Ok(Some(EventData::StatusChanged(StatusChangedData {
                from: state.status,
                to: JobStatus::Running,
            })))
        })?;
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Grant (or re-grant) the job's lease to `(worker_id, lease_id)`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Lease`] with a conflict when someone else holds a
    /// live lease.
    pub fn acquire_lease(&self, job_id: &str, worker_id: &str, lease_id: &str) -> Result<JobState> {
        let (state, _) = self.commit(job_id, Expect::Initialized, |state, _| {
            let record =
                lease::acquire(state.lease.as_ref(), worker_id, lease_id, self.now(), self.lease_ttl)?;
            Ok(Some(EventData::LeaseSet(record)))
        })?;
        Ok(state)
    }

    /// Extend the caller's lease.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Lease`] when no lease is held or the owner differs.
    pub fn heartbeat_lease(
        &self,
        job_id: &str,
        worker_id: &str,
        lease_id: &str,
    ) -> Result<JobState> {
        let (state, _) = self.commit(job_id, Expect::Initialized, |state, _| {
            let record = lease::heartbeat(
                state.lease.as_ref(),
                worker_id,
                lease_id,
                self.now(),
                self.lease_ttl,
            )?;
            Ok(Some(EventData::LeaseSet(record)))
        })?;
        Ok(state)
    }

    /// Release the caller's lease. Releasing when nothing is held succeeds
    /// without writing.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Lease`] when a live lease belongs to someone else.
    pub fn release_lease(&self, job_id: &str, worker_id: &str, lease_id: &str) -> Result<JobState> {
        let (state, _) = self.commit(job_id, Expect::Initialized, |state, _| {
            if !lease::release(state.lease.as_ref(), worker_id, lease_id, self.now())? {
                return Ok(None);
            }
            Ok(Some(EventData::LeaseReleased(LeaseReleasedData {
                worker_id: worker_id.to_string(),
                lease_id: lease_id.to_string(),
            })))
        })?;
        Ok(state)
    }
}
