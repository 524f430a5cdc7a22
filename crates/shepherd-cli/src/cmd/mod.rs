//! Command handlers. Each parses nothing itself: clap hands it typed
//! arguments, it calls one runtime operation and renders the result.

pub mod budget;
pub mod checkpoint;
pub mod completions;
pub mod job;
pub mod lease;
pub mod resume;

use std::path::Path;

use clap::Args;
use shepherd_core::config::{self, EffectiveConfig};
use shepherd_core::error::RuntimeError;
use shepherd_core::runtime::JobRuntime;

use crate::output::OutputMode;

/// Positional job id shared by most commands.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArg {
    /// Job id (letters, digits, `.`, `_`, `-`).
    pub job_id: String,
}

/// Everything a command needs besides its own arguments.
pub struct Context {
    pub runtime: JobRuntime,
    pub config: EffectiveConfig,
    pub output: OutputMode,
    pub agent: Option<String>,
}

impl Context {
    /// Resolve configuration and build the runtime.
    ///
    /// # Errors
    ///
    /// Fails if a config file exists but cannot be read or parsed.
    pub fn load(root: Option<&Path>, output: OutputMode, agent: Option<String>) -> anyhow::Result<Self> {
        let config = config::resolve_config(root)?;
        tracing::debug!(
            root = %config.root.display(),
            source = ?config.source,
            "resolved configuration"
        );
        Ok(Self {
            runtime: JobRuntime::from_config(&config),
            config,
            output,
            agent,
        })
    }

    pub fn agent(&self) -> Option<&str> {
        self.agent.as_deref()
    }

    /// Fail with invalid input unless the job directory exists.
    ///
    /// Reads never create jobs, so this keeps a typo from looking like an
    /// empty queued job.
    pub fn require_job(&self, job_id: &str) -> Result<(), RuntimeError> {
        if self.runtime.job_exists(job_id)? {
            Ok(())
        } else {
            Err(RuntimeError::InvalidInput {
                message: format!("job {job_id} not found under {}", self.config.root.display()),
                job_id: Some(job_id.to_string()),
                checkpoint_id: None,
            })
        }
    }
}
