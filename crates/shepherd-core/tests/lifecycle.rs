//! End-to-end lifecycle scenarios against a real on-disk store.
//!
//! Covers the paths an agent adapter walks through:
//! - init, run, checkpoint, crash, recover
//! - decision gating and approval
//! - budget blocking
//! - environment drift with and without an override

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use shepherd_core::budget::{BudgetLimits, Spend};
use shepherd_core::checkpoint::{CheckpointInput, CheckpointKind};
use shepherd_core::clock::ManualClock;
use shepherd_core::envfp::StaticFingerprint;
use shepherd_core::error::{ErrorCode, RuntimeError};
use shepherd_core::event::EventType;
use shepherd_core::runtime::{JobRuntime, ResumeInput};
use shepherd_core::status::JobStatus;
use shepherd_core::store::JobStore;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    clock: Arc<ManualClock>,
    env: Arc<StaticFingerprint>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            )),
            env: Arc::new(StaticFingerprint::new([("os", "linux"), ("arch", "x86_64")])),
        }
    }

    /// A fresh runtime over the same store, as a restarted process would build.
    fn runtime(&self) -> JobRuntime {
        JobRuntime::new(JobStore::new(self.dir.path()))
            .with_clock(self.clock.clone())
            .with_fingerprint_source(self.env.clone())
    }
}

fn event_types(rt: &JobRuntime, job: &str) -> Vec<EventType> {
    rt.events(job)
        .unwrap()
        .iter()
        .map(shepherd_core::Event::event_type)
        .collect()
}

#[test]
fn plan_checkpoint_survives_restart() {
    let fx = Fixture::new();
    let rt = fx.runtime();

    rt.init_job("job_1").unwrap();
    rt.change_status("job_1", JobStatus::Running).unwrap();
    let cp = rt
        .emit_checkpoint(
            "job_1",
            CheckpointInput::new(CheckpointKind::Plan, "split the migration into three steps"),
        )
        .unwrap();
    assert_eq!(cp.checkpoint_id, "cp_4");
    let before = rt.recover("job_1").unwrap();
    drop(rt);

    let restarted = fx.runtime();
    let after = restarted.recover("job_1").unwrap();
    assert_eq!(after, before);
    assert_eq!(after.status, JobStatus::Running);
    assert_eq!(after.last_applied_seq, 4);
    assert_eq!(restarted.list_checkpoints("job_1").unwrap(), vec![cp]);
    assert_eq!(
        event_types(&restarted, "job_1"),
        vec![
            EventType::JobInitialized,
            EventType::EnvFingerprintSet,
            EventType::StatusChanged,
            EventType::CheckpointEmitted,
        ]
    );
}

#[test]
fn decision_blocks_resume_until_approved() {
    let fx = Fixture::new();
    let rt = fx.runtime();
    rt.init_job("job_1").unwrap();
    rt.change_status("job_1", JobStatus::Running).unwrap();

    let decision = rt
        .emit_checkpoint(
            "job_1",
            CheckpointInput::new(CheckpointKind::DecisionNeeded, "drop the legacy table?")
                .with_status(JobStatus::BlockedDecision)
                .with_required_action("approval", "confirm no readers remain"),
        )
        .unwrap();
    rt.change_status("job_1", JobStatus::BlockedDecision).unwrap();

    match rt.resume("job_1", &ResumeInput::default()).unwrap_err() {
        RuntimeError::ApprovalRequired { checkpoint_id, .. } => {
            assert_eq!(checkpoint_id, decision.checkpoint_id);
        }
        other => panic!("expected approval required, got {other:?}"),
    }

    // An environment override does not substitute for approval.
    let err = rt
        .resume("job_1", &ResumeInput::with_env_override("ci image bump", "ops"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CheckpointApprovalRequired);
    assert_eq!(err.code().exit_code(), 4);

    rt.approve_checkpoint("job_1", &decision.checkpoint_id, "verified", "alice")
        .unwrap();
    let state = rt.resume("job_1", &ResumeInput::default()).unwrap();
    assert_eq!(state.status, JobStatus::Running);
}

#[test]
fn newer_decision_supersedes_approved_one() {
    let fx = Fixture::new();
    let rt = fx.runtime();
    rt.init_job("job_1").unwrap();

    let ask = |summary: &str| {
        rt.emit_checkpoint(
            "job_1",
            CheckpointInput::new(CheckpointKind::DecisionNeeded, summary)
                .with_required_action("approval", "reply yes or no"),
        )
        .unwrap()
    };
    let first = ask("first question");
    rt.approve_checkpoint("job_1", &first.checkpoint_id, "yes", "bob")
        .unwrap();
    let second = ask("second question");

    let err = rt.resume("job_1", &ResumeInput::default()).unwrap_err();
    assert!(
        matches!(err, RuntimeError::ApprovalRequired { ref checkpoint_id, .. } if *checkpoint_id == second.checkpoint_id)
    );
}

#[test]
fn exceeding_budget_blocks_job_with_checkpoint() {
    let fx = Fixture::new();
    let rt = fx.runtime();
    rt.init_job("job_1").unwrap();
    rt.change_status("job_1", JobStatus::Running).unwrap();
    rt.update_counters("job_1", 0, 12, 3).unwrap();

    let limits = BudgetLimits {
        max_step_count: 10,
        max_wall_time_seconds: 600,
        ..BudgetLimits::default()
    };

    fx.clock.advance(Duration::seconds(30));
    let within = BudgetLimits {
        max_step_count: 20,
        ..limits
    };
    let usage = rt.check_budget("job_1", &within).unwrap();
    assert_eq!(usage.state.wall_time_seconds, 30);
    assert_eq!(usage.state.step_count, 12);

    let seq_before = rt.recover("job_1").unwrap().last_applied_seq;
    let err = rt.check_budget("job_1", &limits).unwrap_err();
    let RuntimeError::BudgetExceeded {
        violations,
        checkpoint,
        ..
    } = err
    else {
        panic!("expected budget exceeded, got {err:?}");
    };
    assert_eq!(violations, vec!["step_count>10"]);
    assert_eq!(checkpoint.kind, CheckpointKind::Blocked);
    assert_eq!(checkpoint.status, JobStatus::BlockedBudget);
    assert_eq!(checkpoint.reason_codes, vec!["E_BUDGET_EXCEEDED"]);
    assert_eq!(checkpoint.summary, "budget exceeded: step_count>10");

    let state = rt.recover("job_1").unwrap();
    assert_eq!(state.status, JobStatus::BlockedBudget);
    assert_eq!(state.last_applied_seq, seq_before + 2);

    // Already blocked: only another checkpoint is written.
    assert!(rt.check_budget("job_1", &limits).is_err());
    assert_eq!(rt.recover("job_1").unwrap().last_applied_seq, seq_before + 3);
}

#[test]
fn reported_spend_counts_against_budget() {
    let fx = Fixture::new();
    let rt = fx.runtime();
    rt.init_job("job_1").unwrap();
    rt.change_status("job_1", JobStatus::Running).unwrap();

    let limits = BudgetLimits {
        max_tokens: Some(1_000),
        ..BudgetLimits::default()
    };
    let spend = Spend {
        estimated_cost: None,
        tokens: Some(1_001),
    };
    let err = rt
        .check_budget_with_spend("job_1", &limits, spend)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BudgetExceeded);
}

#[test]
fn budget_on_queued_job_is_an_invalid_transition() {
    let fx = Fixture::new();
    let rt = fx.runtime();
    rt.init_job("job_1").unwrap();
    rt.update_counters("job_1", 5, 0, 0).unwrap();

    let limits = BudgetLimits {
        max_retries: 1,
        ..BudgetLimits::default()
    };
    let err = rt.check_budget("job_1", &limits).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    assert_eq!(rt.recover("job_1").unwrap().status, JobStatus::Queued);
}

#[test]
fn environment_drift_blocks_then_override_adopts() {
    let fx = Fixture::new();
    let rt = fx.runtime();
    let initial = rt.init_job("job_1").unwrap();
    rt.change_status("job_1", JobStatus::Running).unwrap();
    rt.change_status("job_1", JobStatus::Paused).unwrap();

    fx.env.set("arch", "aarch64");
    let err = rt.resume("job_1", &ResumeInput::default()).unwrap_err();
    let RuntimeError::EnvMismatch {
        expected_hash,
        actual_hash,
        ..
    } = err
    else {
        panic!("expected env mismatch, got {err:?}");
    };
    assert_eq!(Some(expected_hash.as_str()), initial.env_fingerprint_hash.as_deref());
    assert_ne!(expected_hash, actual_hash);

    let blocked = rt.recover("job_1").unwrap();
    assert_eq!(blocked.status, JobStatus::BlockedError);
    assert_eq!(blocked.last_reason_codes, vec!["E_ENV_FINGERPRINT_MISMATCH"]);
    let last_cp = rt.list_checkpoints("job_1").unwrap().pop().unwrap();
    assert_eq!(last_cp.kind, CheckpointKind::Blocked);
    assert_eq!(last_cp.status, JobStatus::BlockedError);

    // A second refusal does not try to re-enter blocked_error.
    assert!(rt.resume("job_1", &ResumeInput::default()).is_err());

    let resumed = rt
        .resume(
            "job_1",
            &ResumeInput::with_env_override("moved to arm runners", "carol"),
        )
        .unwrap();
    assert_eq!(resumed.status, JobStatus::Running);
    assert_eq!(resumed.env_fingerprint_hash.as_deref(), Some(actual_hash.as_str()));
    assert_eq!(
        resumed.env_fingerprint_values.get("arch").map(String::as_str),
        Some("aarch64")
    );
    assert!(event_types(&rt, "job_1").contains(&EventType::EnvOverrideRecorded));

    // The adopted fingerprint now matches.
    rt.change_status("job_1", JobStatus::Paused).unwrap();
    assert_eq!(
        rt.resume("job_1", &ResumeInput::default()).unwrap().status,
        JobStatus::Running
    );
}

#[test]
fn completed_job_cannot_resume() {
    let fx = Fixture::new();
    let rt = fx.runtime();
    rt.init_job("job_1").unwrap();
    rt.change_status("job_1", JobStatus::Running).unwrap();
    rt.change_status("job_1", JobStatus::Completed).unwrap();

    let err = rt.resume("job_1", &ResumeInput::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    let err = rt.change_status("job_1", JobStatus::Running).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
}

#[test]
fn custom_fingerprint_rules_are_recorded() {
    let fx = Fixture::new();
    fx.env.set("env:CI_IMAGE", "builder:42");
    let rt = fx
        .runtime()
        .with_fingerprint_rules(vec!["env:CI_IMAGE".into(), "os".into(), "os".into()]);

    let state = rt.init_job("job_1").unwrap();
    assert_eq!(state.env_fingerprint_rules, vec!["env:CI_IMAGE", "os"]);

    // A runtime configured differently still checks the job's own rules.
    let other = fx.runtime();
    other.change_status("job_1", JobStatus::Running).unwrap();
    other.change_status("job_1", JobStatus::Paused).unwrap();
    fx.env.set("arch", "sparc");
    assert_eq!(
        other
            .resume("job_1", &ResumeInput::default())
            .unwrap()
            .status,
        JobStatus::Running
    );

    fx.env.set("env:CI_IMAGE", "builder:43");
    other.change_status("job_1", JobStatus::Paused).unwrap();
    assert_eq!(
        other
            .resume("job_1", &ResumeInput::default())
            .unwrap_err()
            .code(),
        ErrorCode::EnvFingerprintMismatch
    );
}

#[test]
fn unknown_fingerprint_rule_writes_nothing() {
    let fx = Fixture::new();
    let rt = fx.runtime().with_fingerprint_rules(vec!["kernel".into()]);
    let err = rt.init_job("job_1").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    assert!(rt.events("job_1").unwrap().is_empty());
}
