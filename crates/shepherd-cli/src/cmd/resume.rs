//! `shep resume`: gate and perform resumption of a job.

use clap::Args;
use shepherd_core::runtime::ResumeInput;

use super::{Context, JobArg};
use super::job::write_state;
use crate::agent;
use crate::output::render;

#[derive(Args, Debug)]
pub struct ResumeArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Resume even if the environment fingerprint changed.
    #[arg(long)]
    pub override_env: bool,

    /// Why the environment change is acceptable.
    #[arg(long, requires = "override_env")]
    pub reason: Option<String>,

    /// Who allowed the override. Falls back to --agent, SHEPHERD_AGENT, AGENT.
    #[arg(long, requires = "override_env")]
    pub by: Option<String>,
}

pub fn run_resume(ctx: &Context, args: &ResumeArgs) -> anyhow::Result<()> {
    let input = if args.override_env {
        ResumeInput::with_env_override(
            args.reason.clone().unwrap_or_default(),
            agent::require_identity(args.by.as_deref(), ctx.agent(), "--by")?,
        )
    } else {
        ResumeInput::default()
    };

    let state = ctx.runtime.resume(&args.job.job_id, &input)?;
    tracing::info!(job_id = %state.job_id, override_env = args.override_env, "job resumed");
    let mode = ctx.output;
    render(mode, &state, |s, w| write_state(s, w, mode))
}
