#![forbid(unsafe_code)]

mod agent;
mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use cmd::Context;
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use shepherd_core::error::RuntimeError;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "shep",
    author,
    version,
    about = "shepherd: durable local job runtime for long-running agent work",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format: pretty, text or json.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Store root. Overrides SHEPHERD_HOME and the config file.
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Caller identity used when --by or --worker is omitted.
    #[arg(long, global = true)]
    agent: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Lifecycle",
        about = "Create a job",
        long_about = "Create a job in queued status and record its environment fingerprint.",
        after_help = "EXAMPLES:\n    shep init job_42\n    shep --root /tmp/store init job_42 --json"
    )]
    Init(cmd::JobArg),

    #[command(
        next_help_heading = "Read",
        about = "Show a job's recovered state",
        after_help = "EXAMPLES:\n    shep status job_42"
    )]
    Status(cmd::JobArg),

    #[command(
        next_help_heading = "Lifecycle",
        about = "Change a job's status",
        long_about = "Move a job along the status graph. Illegal edges are rejected.",
        after_help = "EXAMPLES:\n    shep set-status job_42 running\n    shep set-status job_42 paused"
    )]
    SetStatus(cmd::job::SetStatusArgs),

    #[command(
        next_help_heading = "Lifecycle",
        about = "Record absolute counter values",
        after_help = "EXAMPLES:\n    shep counters job_42 --steps 12 --tool-calls 30"
    )]
    Counters(cmd::job::CountersArgs),

    #[command(
        next_help_heading = "Lifecycle",
        about = "Record an idempotency key",
        after_help = "EXAMPLES:\n    shep key job_42 deploy-step-3"
    )]
    Key(cmd::job::KeyArgs),

    #[command(
        next_help_heading = "Lifecycle",
        about = "Record an adapter step marker",
        after_help = "EXAMPLES:\n    shep step job_42 --payload '{\"tool\":\"make\"}'"
    )]
    Step(cmd::job::StepArgs),

    #[command(
        next_help_heading = "Read",
        about = "Print a job's event log",
        after_help = "EXAMPLES:\n    shep log job_42\n    shep log job_42 --json"
    )]
    Log(cmd::JobArg),

    #[command(next_help_heading = "Checkpoints", about = "Emit, list or show checkpoints")]
    Checkpoint {
        #[command(subcommand)]
        command: cmd::checkpoint::CheckpointCommand,
    },

    #[command(
        next_help_heading = "Checkpoints",
        about = "Approve a decision-needed checkpoint",
        after_help = "EXAMPLES:\n    shep approve job_42 cp_7 --reason \"schema reviewed\" --by alice"
    )]
    Approve(cmd::checkpoint::ApproveArgs),

    #[command(
        next_help_heading = "Gates",
        about = "Check a job against budget limits",
        long_about = "Evaluate usage against limits. Over budget, the job is blocked and a blocked checkpoint is emitted.",
        after_help = "EXAMPLES:\n    shep budget job_42 --max-steps 100 --max-wall-time 3600"
    )]
    Budget(cmd::budget::BudgetArgs),

    #[command(
        next_help_heading = "Gates",
        about = "Resume a job",
        long_about = "Resume after approvals and an environment fingerprint check. Exits 4 when an approval is pending.",
        after_help = "EXAMPLES:\n    shep resume job_42\n    shep resume job_42 --override-env --reason \"runner upgrade\" --by ops"
    )]
    Resume(cmd::resume::ResumeArgs),

    #[command(next_help_heading = "Leases", about = "Acquire, heartbeat, release or hold a lease")]
    Lease {
        #[command(subcommand)]
        command: cmd::lease::LeaseCommand,
    },

    #[command(
        next_help_heading = "Maintenance",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    shep completions bash\n    shep completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("SHEPHERD_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "shepherd_core=debug,shep=debug,info"
        } else {
            "shepherd_core=info,shep=info,warn"
        })
    });

    let format = env::var("SHEPHERD_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: Cli, output: OutputMode) -> anyhow::Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        return cmd::completions::run_completions(args.shell, &mut command);
    }

    let ctx = Context::load(cli.root.as_deref(), output, cli.agent)?;
    match &cli.command {
        Commands::Init(args) => cmd::job::run_init(&ctx, args),
        Commands::Status(args) => cmd::job::run_status(&ctx, args),
        Commands::SetStatus(args) => cmd::job::run_set_status(&ctx, args),
        Commands::Counters(args) => cmd::job::run_counters(&ctx, args),
        Commands::Key(args) => cmd::job::run_key(&ctx, args),
        Commands::Step(args) => cmd::job::run_step(&ctx, args),
        Commands::Log(args) => cmd::job::run_log(&ctx, args),
        Commands::Checkpoint { command } => cmd::checkpoint::run_checkpoint(&ctx, command),
        Commands::Approve(args) => cmd::checkpoint::run_approve(&ctx, args),
        Commands::Budget(args) => cmd::budget::run_budget(&ctx, args),
        Commands::Resume(args) => cmd::resume::run_resume(&ctx, args),
        Commands::Lease { command } => cmd::lease::run_lease(&ctx, command),
        Commands::Completions(_) => Ok(()),
    }
}

/// Map an error to its rendered form and process exit code.
fn describe(err: &anyhow::Error) -> (CliError, u8) {
    match err.downcast_ref::<RuntimeError>() {
        Some(rt) => {
            let code = u8::try_from(rt.code().exit_code()).unwrap_or(1);
            (CliError::from(rt), code)
        }
        None => (CliError::new(format!("{err:#}")), 1),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!(command = ?cli.command, "starting");

    let output = cli.output_mode();
    match run(cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let (rendered, code) = describe(&err);
            if let Err(render_err) = render_error(output, &rendered) {
                eprintln!("error: {err:#} (while rendering: {render_err})");
            }
            ExitCode::from(code)
        }
    }
}
