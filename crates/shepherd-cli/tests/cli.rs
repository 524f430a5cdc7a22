//! End-to-end tests driving the `shep` binary against a temporary store.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn shep(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("shep").expect("binary should build");
    cmd.arg("--root")
        .arg(home.path().join("store"))
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env_remove("SHEPHERD_HOME")
        .env_remove("SHEPHERD_FORMAT")
        .env_remove("SHEPHERD_AGENT")
        .env_remove("AGENT")
        .env_remove("SHEPHERD_LOG");
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").output().expect("command should run");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn json_stderr(cmd: &mut Command, code: i32) -> Value {
    let output = cmd.arg("--json").output().expect("command should run");
    assert_eq!(
        output.status.code(),
        Some(code),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stderr).expect("stderr should be JSON")
}

fn init_running(home: &TempDir, job: &str) {
    shep(home).args(["init", job]).assert().success();
    shep(home)
        .args(["set-status", job, "running"])
        .assert()
        .success();
}

#[test]
fn init_then_status_reports_queued_job() {
    let home = TempDir::new().unwrap();
    let created = json_stdout(shep(&home).args(["init", "job_1"]));
    assert_eq!(created["status"], "queued");
    assert_eq!(created["last_applied_seq"], 2);
    assert!(created["env_fingerprint_hash"].is_string());

    let status = json_stdout(shep(&home).args(["status", "job_1"]));
    assert_eq!(status, created);

    assert!(home.path().join("store/jobs/job_1/events.jsonl").is_file());
}

#[test]
fn init_twice_is_rejected() {
    let home = TempDir::new().unwrap();
    shep(&home).args(["init", "job_1"]).assert().success();
    shep(&home)
        .args(["init", "job_1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error["));
}

#[test]
fn status_of_unknown_job_is_invalid_input() {
    let home = TempDir::new().unwrap();
    let err = json_stderr(shep(&home).args(["status", "nope"]), 6);
    assert_eq!(err["error"]["error_code"], "E_INVALID_INPUT");
    assert_eq!(err["error"]["details"]["job_id"], "nope");
    assert!(!home.path().join("store/jobs/nope").exists());
}

#[test]
fn unsafe_job_id_exits_with_invalid_input() {
    let home = TempDir::new().unwrap();
    shep(&home)
        .args(["init", "../escape"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("E_INVALID_INPUT"));
}

#[test]
fn illegal_transition_is_reported() {
    let home = TempDir::new().unwrap();
    shep(&home).args(["init", "job_1"]).assert().success();
    let err = json_stderr(shep(&home).args(["set-status", "job_1", "completed"]), 1);
    assert_eq!(err["error"]["error_code"], "E_INVALID_STATE_TRANSITION");

    let running = json_stdout(shep(&home).args(["set-status", "job_1", "running"]));
    assert_eq!(running["status"], "running");
    assert!(running["started_at"].is_string());
}

#[test]
fn counters_keys_and_steps_accumulate() {
    let home = TempDir::new().unwrap();
    init_running(&home, "job_1");

    shep(&home)
        .args(["counters", "job_1", "--steps", "4", "--tool-calls", "9"])
        .assert()
        .success();
    let state = json_stdout(shep(&home).args(["counters", "job_1", "--retries", "1"]));
    assert_eq!(state["step_count"], 4);
    assert_eq!(state["tool_call_count"], 9);
    assert_eq!(state["retry_count"], 1);

    let first = json_stdout(shep(&home).args(["key", "job_1", "deploy-3"]));
    let again = json_stdout(shep(&home).args(["key", "job_1", "deploy-3"]));
    assert_eq!(first["last_applied_seq"], again["last_applied_seq"]);
    assert_eq!(again["idempotency_keys"], serde_json::json!(["deploy-3"]));

    shep(&home)
        .args(["step", "job_1", "--payload", "not json"])
        .assert()
        .code(6);
    shep(&home)
        .args(["step", "job_1", "--payload", r#"{"tool":"make"}"#])
        .assert()
        .success();

    let log = json_stdout(shep(&home).args(["log", "job_1"]));
    let types: Vec<&str> = log
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(types.last(), Some(&"adapter_step"));
    assert!(types.contains(&"idempotency_recorded"));
    let seqs: Vec<u64> = log
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
}

#[test]
fn checkpoints_emit_list_and_show() {
    let home = TempDir::new().unwrap();
    init_running(&home, "job_1");

    let cp = json_stdout(shep(&home).args([
        "checkpoint",
        "emit",
        "job_1",
        "--type",
        "plan",
        "--summary",
        "outline the migration",
        "--added",
        "plan.md",
    ]));
    assert_eq!(cp["type"], "plan");
    assert_eq!(cp["status"], "running");
    assert_eq!(cp["artifacts_delta"]["added"], serde_json::json!(["plan.md"]));
    let id = cp["checkpoint_id"].as_str().unwrap().to_string();
    assert!(id.starts_with("cp_"));

    let listed = json_stdout(shep(&home).args(["checkpoint", "list", "job_1"]));
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let shown = json_stdout(shep(&home).args(["checkpoint", "show", "job_1", &id]));
    assert_eq!(shown, cp);

    shep(&home)
        .args(["checkpoint", "show", "job_1", "cp_999"])
        .assert()
        .code(6);

    shep(&home)
        .args([
            "checkpoint",
            "emit",
            "job_1",
            "--type",
            "decision-needed",
            "--summary",
            "pick a schema",
        ])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("E_INVALID_INPUT"));
}

#[test]
fn pending_decision_blocks_resume_until_approved() {
    let home = TempDir::new().unwrap();
    init_running(&home, "job_1");

    let cp = json_stdout(shep(&home).args([
        "checkpoint",
        "emit",
        "job_1",
        "--type",
        "decision-needed",
        "--summary",
        "drop the legacy table?",
        "--action-kind",
        "approve",
        "--action-instructions",
        "confirm backups exist",
    ]));
    let id = cp["checkpoint_id"].as_str().unwrap().to_string();

    let err = json_stderr(shep(&home).args(["resume", "job_1"]), 4);
    assert_eq!(err["error"]["error_code"], "E_CHECKPOINT_APPROVAL_REQUIRED");
    assert_eq!(err["error"]["details"]["checkpoint_id"], id.as_str());

    shep(&home)
        .args(["approve", "job_1", &id, "--reason", "backups verified"])
        .assert()
        .code(6);

    let approval = json_stdout(shep(&home).args([
        "approve",
        "job_1",
        &id,
        "--reason",
        "backups verified",
        "--by",
        "alice",
    ]));
    assert_eq!(approval["approved_by"], "alice");

    let resumed = json_stdout(shep(&home).args(["resume", "job_1"]));
    assert_eq!(resumed["status"], "running");
}

#[test]
fn agent_flag_supplies_the_approver() {
    let home = TempDir::new().unwrap();
    init_running(&home, "job_1");
    let cp = json_stdout(shep(&home).args([
        "checkpoint",
        "emit",
        "job_1",
        "--type",
        "decision-needed",
        "--summary",
        "ship it?",
        "--action-kind",
        "approve",
    ]));
    let id = cp["checkpoint_id"].as_str().unwrap().to_string();

    let approval = json_stdout(shep(&home).args([
        "--agent", "bot-7", "approve", "job_1", &id, "--reason", "green",
    ]));
    assert_eq!(approval["approved_by"], "bot-7");
}

#[test]
fn exceeded_budget_blocks_the_job() {
    let home = TempDir::new().unwrap();
    init_running(&home, "job_1");
    shep(&home)
        .args(["counters", "job_1", "--steps", "10"])
        .assert()
        .success();

    let ok = json_stdout(shep(&home).args(["budget", "job_1", "--max-steps", "50"]));
    assert_eq!(ok["within_budget"], true);

    let err = json_stderr(shep(&home).args(["budget", "job_1", "--max-steps", "5"]), 1);
    assert_eq!(err["error"]["error_code"], "E_BUDGET_EXCEEDED");
    assert_eq!(err["error"]["details"]["checkpoint"]["type"], "blocked");
    assert!(
        err["error"]["details"]["checkpoint"]["reason_codes"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c == "E_BUDGET_EXCEEDED")
    );

    let status = json_stdout(shep(&home).args(["status", "job_1"]));
    assert_eq!(status["status"], "blocked_budget");
}

#[test]
fn override_flags_require_the_override_switch() {
    let home = TempDir::new().unwrap();
    init_running(&home, "job_1");
    shep(&home)
        .args(["resume", "job_1", "--reason", "because"])
        .assert()
        .code(2);
}

#[test]
fn lease_conflicts_and_release() {
    let home = TempDir::new().unwrap();
    init_running(&home, "job_1");

    let held = json_stdout(shep(&home).args([
        "lease", "acquire", "job_1", "--lease", "l1", "--worker", "w1", "--ttl", "60",
    ]));
    assert_eq!(held["lease"]["worker_id"], "w1");

    let err = json_stderr(
        shep(&home).args([
            "lease", "acquire", "job_1", "--lease", "l2", "--worker", "w2",
        ]),
        1,
    );
    assert_eq!(err["error"]["error_code"], "E_LEASE_CONFLICT");

    shep(&home)
        .args(["lease", "heartbeat", "job_1", "--lease", "l1", "--worker", "w1"])
        .assert()
        .success();

    let released = json_stdout(shep(&home).args([
        "lease", "release", "job_1", "--lease", "l1", "--worker", "w1",
    ]));
    assert!(released.get("lease").is_none());
}

#[test]
fn lease_hold_heartbeats_then_releases() {
    let home = TempDir::new().unwrap();
    init_running(&home, "job_1");

    let out = json_stdout(shep(&home).args([
        "lease",
        "hold",
        "job_1",
        "--lease",
        "l1",
        "--worker",
        "w1",
        "--duration-ms",
        "200",
        "--interval-ms",
        "20",
    ]));
    assert_eq!(out["released"], true);
    assert!(out["heartbeats"].as_u64().unwrap() >= 1);

    let status = json_stdout(shep(&home).args(["status", "job_1"]));
    assert!(status.get("lease").is_none());
}

#[test]
fn text_output_is_tab_separated() {
    let home = TempDir::new().unwrap();
    shep(&home).args(["init", "job_1"]).assert().success();
    shep(&home)
        .args(["--format", "text", "status", "job_1"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("job_1\tqueued\tseq=2"));
}

#[test]
fn completions_generate_for_bash() {
    let home = TempDir::new().unwrap();
    shep(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("shep"));
}
