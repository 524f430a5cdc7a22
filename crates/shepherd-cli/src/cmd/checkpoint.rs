//! `shep checkpoint emit|list|show` and `shep approve`.

use std::io::{self, Write};

use clap::{Args, Subcommand};
use shepherd_core::checkpoint::{ArtifactsDelta, Checkpoint, CheckpointInput, CheckpointKind};
use shepherd_core::status::JobStatus;

use super::{Context, JobArg};
use crate::agent;
use crate::output::{OutputMode, pretty_kv, pretty_section, render};

#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// Record a checkpoint for a job.
    Emit(EmitArgs),
    /// List every checkpoint of a job.
    List(JobArg),
    /// Show one checkpoint.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct EmitArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// plan, progress, decision-needed, blocked or completed.
    #[arg(long = "type", value_name = "TYPE")]
    pub kind: CheckpointKind,

    /// Short description, at most 2000 characters.
    #[arg(long)]
    pub summary: String,

    /// Status recorded with the checkpoint. Defaults to the job's status.
    #[arg(long)]
    pub status: Option<JobStatus>,

    /// Required action kind. Mandatory for decision-needed.
    #[arg(long)]
    pub action_kind: Option<String>,

    /// Instructions for the required action.
    #[arg(long, requires = "action_kind")]
    pub action_instructions: Option<String>,

    /// Reason code; repeatable.
    #[arg(long = "reason-code", value_name = "CODE")]
    pub reason_codes: Vec<String>,

    /// Artifact added since the previous checkpoint; repeatable.
    #[arg(long, value_name = "PATH")]
    pub added: Vec<String>,

    /// Artifact changed since the previous checkpoint; repeatable.
    #[arg(long, value_name = "PATH")]
    pub changed: Vec<String>,

    /// Artifact removed since the previous checkpoint; repeatable.
    #[arg(long, value_name = "PATH")]
    pub removed: Vec<String>,
}

impl EmitArgs {
    fn to_input(&self) -> CheckpointInput {
        let mut input = CheckpointInput::new(self.kind, self.summary.clone()).with_artifacts(
            ArtifactsDelta {
                added: self.added.clone(),
                changed: self.changed.clone(),
                removed: self.removed.clone(),
            },
        );
        if let Some(status) = self.status {
            input = input.with_status(status);
        }
        if let Some(kind) = &self.action_kind {
            input = input.with_required_action(
                kind.clone(),
                self.action_instructions.clone().unwrap_or_default(),
            );
        }
        for code in &self.reason_codes {
            input = input.with_reason_code(code.clone());
        }
        input
    }
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Checkpoint id, `cp_<n>`.
    pub checkpoint_id: String,
}

#[derive(Args, Debug)]
pub struct ApproveArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Decision-needed checkpoint to approve.
    pub checkpoint_id: String,

    /// Why the decision is approved.
    #[arg(long)]
    pub reason: String,

    /// Approver. Falls back to --agent, SHEPHERD_AGENT, AGENT.
    #[arg(long)]
    pub by: Option<String>,
}

fn write_checkpoint(cp: &Checkpoint, w: &mut dyn Write, mode: OutputMode) -> io::Result<()> {
    if !mode.is_pretty() {
        return writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            cp.checkpoint_id,
            cp.kind,
            cp.status,
            cp.created_at.to_rfc3339(),
            cp.summary
        );
    }
    pretty_section(w, &format!("Checkpoint {} ({})", cp.checkpoint_id, cp.kind))?;
    pretty_kv(w, "summary", &cp.summary)?;
    pretty_kv(w, "status", cp.status.as_str())?;
    pretty_kv(w, "created", cp.created_at.to_rfc3339())?;
    let b = &cp.budget_state;
    pretty_kv(
        w,
        "budget",
        format!(
            "wall={}s retries={} steps={} tool_calls={}",
            b.wall_time_seconds, b.retry_count, b.step_count, b.tool_call_count
        ),
    )?;
    if let Some(action) = &cp.required_action {
        pretty_kv(w, "action", format!("{}: {}", action.kind, action.instructions))?;
    }
    if !cp.reason_codes.is_empty() {
        pretty_kv(w, "reason codes", cp.reason_codes.join(", "))?;
    }
    let delta = &cp.artifacts_delta;
    for (label, paths) in [
        ("added", &delta.added),
        ("changed", &delta.changed),
        ("removed", &delta.removed),
    ] {
        if !paths.is_empty() {
            pretty_kv(w, label, paths.join(", "))?;
        }
    }
    Ok(())
}

pub fn run_checkpoint(ctx: &Context, command: &CheckpointCommand) -> anyhow::Result<()> {
    let mode = ctx.output;
    match command {
        CheckpointCommand::Emit(args) => {
            let cp = ctx.runtime.emit_checkpoint(&args.job.job_id, args.to_input())?;
            render(mode, &cp, |cp, w| write_checkpoint(cp, w, mode))
        }
        CheckpointCommand::List(args) => {
            ctx.require_job(&args.job_id)?;
            let cps = ctx.runtime.list_checkpoints(&args.job_id)?;
            render(mode, &cps, |cps, w| {
                if cps.is_empty() && mode.is_pretty() {
                    return writeln!(w, "no checkpoints");
                }
                for cp in cps {
                    write_checkpoint(cp, w, mode)?;
                }
                Ok(())
            })
        }
        CheckpointCommand::Show(args) => {
            ctx.require_job(&args.job.job_id)?;
            let cp = ctx
                .runtime
                .get_checkpoint(&args.job.job_id, &args.checkpoint_id)?;
            render(mode, &cp, |cp, w| write_checkpoint(cp, w, mode))
        }
    }
}

pub fn run_approve(ctx: &Context, args: &ApproveArgs) -> anyhow::Result<()> {
    let approver = agent::require_identity(args.by.as_deref(), ctx.agent(), "--by")?;
    let record = ctx.runtime.approve_checkpoint(
        &args.job.job_id,
        &args.checkpoint_id,
        &args.reason,
        &approver,
    )?;
    tracing::info!(
        job_id = %record.job_id,
        checkpoint_id = %record.checkpoint_id,
        approved_by = %record.approved_by,
        "checkpoint approved"
    );
    render(ctx.output, &record, |r, w| {
        writeln!(
            w,
            "approved {} on {} by {}: {}",
            r.checkpoint_id, r.job_id, r.approved_by, r.reason
        )
    })
}
