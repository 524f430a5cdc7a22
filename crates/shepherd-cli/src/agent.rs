//! Caller identity resolution.
//!
//! Approvals record who approved, environment overrides record who allowed
//! them, and leases need a worker id. The chain is: explicit flag >
//! `--agent` > `SHEPHERD_AGENT` env > `AGENT` env > `USER` env (TTY only).

use std::env;

use shepherd_core::error::RuntimeError;

trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
    fn is_tty(&self) -> bool;
}

struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn is_tty(&self) -> bool {
        use std::io::IsTerminal;
        std::io::stdin().is_terminal()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn resolve_with(explicit: Option<&str>, agent_flag: Option<&str>, env: &dyn EnvReader) -> Option<String> {
    non_empty(explicit)
        .or_else(|| non_empty(agent_flag))
        .or_else(|| non_empty(env.get("SHEPHERD_AGENT").as_deref()))
        .or_else(|| non_empty(env.get("AGENT").as_deref()))
        .or_else(|| {
            if env.is_tty() {
                non_empty(env.get("USER").as_deref())
            } else {
                None
            }
        })
}

/// Resolve an identity, failing with invalid input when none is available.
///
/// `what` names the field in the error, e.g. `"--by"` or `"--worker"`.
pub fn require_identity(
    explicit: Option<&str>,
    agent_flag: Option<&str>,
    what: &str,
) -> Result<String, RuntimeError> {
    resolve_with(explicit, agent_flag, &RealEnv).ok_or_else(|| RuntimeError::InvalidInput {
        message: format!("{what} is required: pass it, --agent, or set SHEPHERD_AGENT"),
        job_id: None,
        checkpoint_id: None,
    })
}
