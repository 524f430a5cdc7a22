//! `shep init|status|set-status|counters|key|step|log`: job records.

use std::io::{self, Write};

use clap::Args;
use shepherd_core::error::RuntimeError;
use shepherd_core::event::Event;
use shepherd_core::state::JobState;
use shepherd_core::status::JobStatus;

use super::{Context, JobArg};
use crate::output::{OutputMode, pretty_kv, pretty_section, render};

#[derive(Args, Debug)]
pub struct SetStatusArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Target status (queued, running, paused, blocked_decision,
    /// blocked_budget, blocked_error, completed, canceled).
    pub status: JobStatus,
}

#[derive(Args, Debug)]
pub struct CountersArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Absolute retry count. Unchanged when omitted.
    #[arg(long)]
    pub retries: Option<u64>,

    /// Absolute step count. Unchanged when omitted.
    #[arg(long)]
    pub steps: Option<u64>,

    /// Absolute tool-call count. Unchanged when omitted.
    #[arg(long)]
    pub tool_calls: Option<u64>,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Idempotency key to record.
    pub key: String,
}

#[derive(Args, Debug)]
pub struct StepArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Opaque JSON payload stored with the marker.
    #[arg(long, default_value = "{}")]
    pub payload: String,
}

pub fn write_state(state: &JobState, w: &mut dyn Write, mode: OutputMode) -> io::Result<()> {
    if !mode.is_pretty() {
        return writeln!(
            w,
            "{}\t{}\tseq={}\tretries={}\tsteps={}\ttool_calls={}",
            state.job_id,
            state.status,
            state.last_applied_seq,
            state.retry_count,
            state.step_count,
            state.tool_call_count
        );
    }

    pretty_section(w, &format!("Job {}", state.job_id))?;
    pretty_kv(w, "status", state.status.as_str())?;
    pretty_kv(w, "last seq", state.last_applied_seq.to_string())?;
    if let Some(started) = state.started_at {
        pretty_kv(w, "started", started.to_rfc3339())?;
    }
    pretty_kv(
        w,
        "counters",
        format!(
            "retries={} steps={} tool_calls={}",
            state.retry_count, state.step_count, state.tool_call_count
        ),
    )?;
    if !state.idempotency_keys.is_empty() {
        let keys: Vec<&str> = state.idempotency_keys.iter().map(String::as_str).collect();
        pretty_kv(w, "keys", keys.join(", "))?;
    }
    match &state.lease {
        Some(lease) => pretty_kv(
            w,
            "lease",
            format!(
                "{}/{} until {}",
                lease.worker_id,
                lease.lease_id,
                lease.expires_at.to_rfc3339()
            ),
        )?,
        None => pretty_kv(w, "lease", "none")?,
    }
    if let Some(hash) = &state.env_fingerprint_hash {
        pretty_kv(w, "env", format!("{hash} [{}]", state.env_fingerprint_rules.join(",")))?;
    }
    if !state.last_reason_codes.is_empty() {
        pretty_kv(w, "reason codes", state.last_reason_codes.join(", "))?;
    }
    Ok(())
}

fn render_state(ctx: &Context, state: &JobState) -> anyhow::Result<()> {
    let mode = ctx.output;
    render(mode, state, |s, w| write_state(s, w, mode))
}

pub fn run_init(ctx: &Context, args: &JobArg) -> anyhow::Result<()> {
    let state = ctx.runtime.init_job(&args.job_id)?;
    tracing::info!(job_id = %args.job_id, "job initialized");
    render_state(ctx, &state)
}

pub fn run_status(ctx: &Context, args: &JobArg) -> anyhow::Result<()> {
    ctx.require_job(&args.job_id)?;
    let state = ctx.runtime.recover(&args.job_id)?;
    render_state(ctx, &state)
}

pub fn run_set_status(ctx: &Context, args: &SetStatusArgs) -> anyhow::Result<()> {
    let state = ctx.runtime.change_status(&args.job.job_id, args.status)?;
    render_state(ctx, &state)
}

pub fn run_counters(ctx: &Context, args: &CountersArgs) -> anyhow::Result<()> {
    let job_id = &args.job.job_id;
    ctx.require_job(job_id)?;
    let current = ctx.runtime.recover(job_id)?;
    let state = ctx.runtime.update_counters(
        job_id,
        args.retries.unwrap_or(current.retry_count),
        args.steps.unwrap_or(current.step_count),
        args.tool_calls.unwrap_or(current.tool_call_count),
    )?;
    render_state(ctx, &state)
}

pub fn run_key(ctx: &Context, args: &KeyArgs) -> anyhow::Result<()> {
    let state = ctx.runtime.record_idempotency_key(&args.job.job_id, &args.key)?;
    render_state(ctx, &state)
}

pub fn run_step(ctx: &Context, args: &StepArgs) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).map_err(|e| RuntimeError::InvalidInput {
            message: format!("--payload is not valid JSON: {e}"),
            job_id: Some(args.job.job_id.clone()),
            checkpoint_id: None,
        })?;
    let state = ctx.runtime.record_adapter_step(&args.job.job_id, payload)?;
    render_state(ctx, &state)
}

pub fn run_log(ctx: &Context, args: &JobArg) -> anyhow::Result<()> {
    ctx.require_job(&args.job_id)?;
    let events: Vec<Event> = ctx.runtime.events(&args.job_id)?;
    render(ctx.output, &events, |events, w| {
        for event in events {
            writeln!(w, "{event}")?;
        }
        Ok(())
    })
}
