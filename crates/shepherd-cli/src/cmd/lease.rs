//! `shep lease acquire|heartbeat|release|hold`.
//!
//! The first three map one-to-one onto runtime operations. `hold` is the
//! layered caller pattern: acquire, heartbeat from a background thread
//! while the foreground works (here: waits), and always release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use clap::{Args, Subcommand};
use serde::Serialize;
use shepherd_core::error::RuntimeError;
use shepherd_core::lease::LeaseRecord;
use shepherd_core::runtime::JobRuntime;
use shepherd_core::state::JobState;

use super::{Context, JobArg};
use crate::agent;
use crate::output::{pretty_kv, render};

const POLL: Duration = Duration::from_millis(50);

#[derive(Subcommand, Debug)]
pub enum LeaseCommand {
    /// Take the job's lease, or re-take one you already hold.
    Acquire(LeaseArgs),
    /// Extend a lease you hold.
    Heartbeat(LeaseArgs),
    /// Give up a lease you hold.
    Release(LeaseArgs),
    /// Acquire, keep alive for a while, then release.
    Hold(HoldArgs),
}

#[derive(Args, Debug)]
pub struct LeaseArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Lease id chosen by the caller.
    #[arg(long)]
    pub lease: String,

    /// Worker id. Falls back to --agent, SHEPHERD_AGENT, AGENT.
    #[arg(long)]
    pub worker: Option<String>,

    /// Lease lifetime in seconds; overrides `[lease] ttl_secs`.
    #[arg(long)]
    pub ttl: Option<u64>,
}

#[derive(Args, Debug)]
pub struct HoldArgs {
    #[command(flatten)]
    pub lease: LeaseArgs,

    /// How long to hold the lease, in milliseconds.
    #[arg(long)]
    pub duration_ms: u64,

    /// Heartbeat cadence in milliseconds. Defaults to a third of the TTL.
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct HoldOutput {
    job_id: String,
    lease: LeaseRecord,
    heartbeats: u64,
    released: bool,
}

fn runtime_for(ctx: &Context, ttl: Option<u64>) -> Result<JobRuntime, RuntimeError> {
    match ttl {
        None => Ok(ctx.runtime.clone()),
        Some(secs) => {
            let secs = i64::try_from(secs)
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| RuntimeError::InvalidInput {
                    message: format!("--ttl must be a positive number of seconds, got {secs}"),
                    job_id: None,
                    checkpoint_id: None,
                })?;
            Ok(ctx
                .runtime
                .clone()
                .with_lease_ttl(chrono::Duration::seconds(secs)))
        }
    }
}

fn render_lease(ctx: &Context, state: &JobState) -> anyhow::Result<()> {
    render(ctx.output, state, |s, w| match &s.lease {
        Some(lease) => {
            pretty_kv(w, "job", &s.job_id)?;
            pretty_kv(w, "worker", &lease.worker_id)?;
            pretty_kv(w, "lease", &lease.lease_id)?;
            pretty_kv(w, "expires", lease.expires_at.to_rfc3339())
        }
        None => writeln!(w, "{}: no lease held", s.job_id),
    })
}

pub fn run_lease(ctx: &Context, command: &LeaseCommand) -> anyhow::Result<()> {
    match command {
        LeaseCommand::Acquire(args) => {
            let worker = agent::require_identity(args.worker.as_deref(), ctx.agent(), "--worker")?;
            let rt = runtime_for(ctx, args.ttl)?;
            let state = rt.acquire_lease(&args.job.job_id, &worker, &args.lease)?;
            render_lease(ctx, &state)
        }
        LeaseCommand::Heartbeat(args) => {
            let worker = agent::require_identity(args.worker.as_deref(), ctx.agent(), "--worker")?;
            let rt = runtime_for(ctx, args.ttl)?;
            let state = rt.heartbeat_lease(&args.job.job_id, &worker, &args.lease)?;
            render_lease(ctx, &state)
        }
        LeaseCommand::Release(args) => {
            let worker = agent::require_identity(args.worker.as_deref(), ctx.agent(), "--worker")?;
            let state = ctx
                .runtime
                .release_lease(&args.job.job_id, &worker, &args.lease)?;
            render_lease(ctx, &state)
        }
        LeaseCommand::Hold(args) => run_hold(ctx, args),
    }
}

/// Heartbeat every `interval` until `stop` fires. Sets `lost` and returns
/// the error if a heartbeat is refused.
fn heartbeat_loop(
    rt: &JobRuntime,
    job_id: &str,
    worker: &str,
    lease: &str,
    interval: Duration,
    stop: &mpsc::Receiver<()>,
    lost: &AtomicBool,
) -> Result<u64, RuntimeError> {
    let mut beats = 0;
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(beats),
        }
        if let Err(err) = rt.heartbeat_lease(job_id, worker, lease) {
            tracing::warn!(job_id, worker, lease, error = %err, "heartbeat refused");
            lost.store(true, Ordering::SeqCst);
            return Err(err);
        }
        beats += 1;
        tracing::debug!(job_id, worker, lease, beats, "lease heartbeat");
    }
}

fn run_hold(ctx: &Context, args: &HoldArgs) -> anyhow::Result<()> {
    let lease_args = &args.lease;
    let job_id = lease_args.job.job_id.as_str();
    let worker = agent::require_identity(lease_args.worker.as_deref(), ctx.agent(), "--worker")?;
    let rt = runtime_for(ctx, lease_args.ttl)?;

    let ttl_ms = u64::try_from(rt.lease_ttl().num_milliseconds()).unwrap_or(1_000);
    let interval = Duration::from_millis(args.interval_ms.unwrap_or(ttl_ms / 3).max(10));
    let hold_for = Duration::from_millis(args.duration_ms);

    let acquired = rt.acquire_lease(job_id, &worker, &lease_args.lease)?;
    let lease = acquired
        .lease
        .ok_or_else(|| anyhow!("lease for {job_id} was not recorded"))?;
    tracing::info!(job_id, worker = %worker, lease = %lease.lease_id, "lease acquired");

    let lost = AtomicBool::new(false);
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let heartbeats = thread::scope(|scope| {
        let (rt, worker, lease_id, lost) = (&rt, worker.as_str(), lease_args.lease.as_str(), &lost);
        let handle = scope.spawn(move || {
            heartbeat_loop(rt, job_id, worker, lease_id, interval, &stop_rx, lost)
        });

        let deadline = Instant::now() + hold_for;
        while !lost.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(POLL));
        }
        drop(stop_tx);
        handle.join()
    });

    // Release regardless of how the heartbeat loop ended.
    let released = rt.release_lease(job_id, &worker, &lease_args.lease);
    let heartbeats = heartbeats.map_err(|_| anyhow!("heartbeat thread panicked"))??;
    let released = released?;
    tracing::info!(job_id, heartbeats, "lease released");

    let out = HoldOutput {
        job_id: job_id.to_string(),
        lease,
        heartbeats,
        released: released.lease.is_none(),
    };
    render(ctx.output, &out, |o, w| {
        writeln!(
            w,
            "held {}/{} on {} with {} heartbeat(s); released",
            o.lease.worker_id, o.lease.lease_id, o.job_id, o.heartbeats
        )
    })
}
