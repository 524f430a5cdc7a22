//! `shep budget`: evaluate a job against budget limits.
//!
//! Limits start from the `[budget]` config section; each flag overrides one
//! of them.

use clap::Args;
use serde::Serialize;
use shepherd_core::budget::{BudgetLimits, BudgetUsage, Spend};

use super::{Context, JobArg};
use crate::output::{pretty_kv, pretty_section, render};

#[derive(Args, Debug, Default)]
pub struct BudgetArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Wall-time ceiling in seconds (0 = unlimited).
    #[arg(long)]
    pub max_wall_time: Option<u64>,

    #[arg(long)]
    pub max_retries: Option<u64>,

    #[arg(long)]
    pub max_steps: Option<u64>,

    #[arg(long)]
    pub max_tool_calls: Option<u64>,

    /// Estimated-cost ceiling; applies only with --cost.
    #[arg(long)]
    pub max_cost: Option<f64>,

    /// Token ceiling; applies only with --tokens.
    #[arg(long)]
    pub max_tokens: Option<u64>,

    /// Estimated cost spent so far.
    #[arg(long)]
    pub cost: Option<f64>,

    /// Tokens spent so far.
    #[arg(long)]
    pub tokens: Option<u64>,
}

impl BudgetArgs {
    /// Overlay the flags onto `base`.
    pub fn limits(&self, base: BudgetLimits) -> BudgetLimits {
        BudgetLimits {
            max_wall_time_seconds: self.max_wall_time.unwrap_or(base.max_wall_time_seconds),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            max_step_count: self.max_steps.unwrap_or(base.max_step_count),
            max_tool_calls: self.max_tool_calls.unwrap_or(base.max_tool_calls),
            max_estimated_cost: self.max_cost.or(base.max_estimated_cost),
            max_tokens: self.max_tokens.or(base.max_tokens),
        }
    }

    const fn spend(&self) -> Spend {
        Spend {
            estimated_cost: self.cost,
            tokens: self.tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct BudgetOutput<'a> {
    job_id: &'a str,
    within_budget: bool,
    usage: BudgetUsage,
    limits: BudgetLimits,
}

pub fn run_budget(ctx: &Context, args: &BudgetArgs) -> anyhow::Result<()> {
    let job_id = args.job.job_id.as_str();
    let limits = args.limits(ctx.config.config.budget);
    let usage = ctx
        .runtime
        .check_budget_with_spend(job_id, &limits, args.spend())?;

    let out = BudgetOutput {
        job_id,
        within_budget: true,
        usage,
        limits,
    };
    render(ctx.output, &out, |o, w| {
        pretty_section(w, &format!("Budget for {}", o.job_id))?;
        let s = &o.usage.state;
        pretty_kv(w, "wall time", format!("{}s", s.wall_time_seconds))?;
        pretty_kv(w, "retries", s.retry_count.to_string())?;
        pretty_kv(w, "steps", s.step_count.to_string())?;
        pretty_kv(w, "tool calls", s.tool_call_count.to_string())?;
        if let Some(cost) = o.usage.estimated_cost {
            pretty_kv(w, "cost", format!("{cost:.4}"))?;
        }
        if let Some(tokens) = o.usage.tokens {
            pretty_kv(w, "tokens", tokens.to_string())?;
        }
        pretty_kv(w, "verdict", "within budget")
    })
}
