//! Per-job append lock.
//!
//! The lock is a file created with exclusive-create semantics whose content
//! names its owner as `<pid>;<unix-millis>`. Contention is retried a bounded
//! number of times with a fixed delay. A lock older than the staleness
//! threshold is broken only when its owner is provably dead; if liveness
//! cannot be determined the lock is treated as held. Breaking is serialized
//! through a sibling `<lock>.break` file, and a breaker only removes the lock
//! if it still holds the owner line it judged stale.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::ErrorCode;

/// Retry and staleness policy for [`AppendLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub stale_after: chrono::Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_attempts: 200,
            retry_delay: Duration::from_millis(5),
            stale_after: chrono::Duration::seconds(120),
        }
    }
}

/// Answers "is process `pid` still running?".
///
/// `None` means the question cannot be answered on this platform; callers
/// must then assume the process is alive.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> Option<bool>;
}

/// Checks `/proc/<pid>` on Linux. Reports unknown everywhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcProbe;

impl LivenessProbe for ProcProbe {
    fn is_alive(&self, pid: u32) -> Option<bool> {
        if !cfg!(target_os = "linux") {
            return None;
        }
        let proc_root = Path::new("/proc");
        if !proc_root.is_dir() {
            return None;
        }
        Some(proc_root.join(pid.to_string()).exists())
    }
}

/// Owner line written into the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub acquired_ms: i64,
}

impl LockOwner {
    #[must_use]
    pub fn render(self) -> String {
        format!("{};{}", self.pid, self.acquired_ms)
    }

    #[must_use]
    pub fn parse(content: &str) -> Option<Self> {
        let (pid, millis) = content.trim().split_once(';')?;
        Some(Self {
            pid: pid.trim().parse().ok()?,
            acquired_ms: millis.trim().parse().ok()?,
        })
    }

    fn age(self, now: DateTime<Utc>) -> chrono::Duration {
        chrono::Duration::milliseconds(now.timestamp_millis().saturating_sub(self.acquired_ms))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock {} still held after {attempts} attempts (owner: {})", path.display(), owner.as_deref().unwrap_or("unknown"))]
    Contended {
        path: PathBuf,
        attempts: u32,
        owner: Option<String>,
    },

    #[error("lock I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Contended { .. } => ErrorCode::LockContention,
            Self::Io { .. } => ErrorCode::Io,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Held exclusive lock. Removed on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct AppendLock {
    path: PathBuf,
    released: bool,
}

impl AppendLock {
    /// Acquire the lock at `path`, retrying on contention.
    ///
    /// # Errors
    ///
    /// [`LockError::Contended`] once `max_attempts` tries have failed, or
    /// [`LockError::Io`] for any filesystem error other than "already
    /// exists".
    pub fn acquire(
        path: &Path,
        clock: &dyn Clock,
        options: &LockOptions,
        probe: &dyn LivenessProbe,
    ) -> Result<Self, LockError> {
        let attempts = options.max_attempts.max(1);
        for attempt in 1..=attempts {
            let owner = LockOwner {
                pid: std::process::id(),
                acquired_ms: clock.now().timestamp_millis(),
            };
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let written = file
                        .write_all(owner.render().as_bytes())
                        .and_then(|()| file.sync_data());
                    if let Err(source) = written {
                        drop(file);
                        let _ = fs::remove_file(path);
                        return Err(LockError::io(path, source));
                    }
                    tracing::trace!(path = %path.display(), attempt, "append lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if break_if_stale(path, clock.now(), options, probe)? {
                        continue;
                    }
                    if attempt < attempts {
                        thread::sleep(options.retry_delay);
                    }
                }
                Err(err) => return Err(LockError::io(path, err)),
            }
        }

        Err(LockError::Contended {
            path: path.to_path_buf(),
            attempts,
            owner: fs::read_to_string(path).ok().map(|s| s.trim().to_string()),
        })
    }

    /// Remove the lock file.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the file exists but cannot be removed.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(LockError::io(&self.path, err)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AppendLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Remove the lock at `path` if it is stale and its owner is dead.
///
/// Returns `true` when the caller should retry immediately: the lock was
/// broken, or it vanished while being inspected.
fn break_if_stale(
    path: &Path,
    now: DateTime<Utc>,
    options: &LockOptions,
    probe: &dyn LivenessProbe,
) -> Result<bool, LockError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(LockError::io(path, err)),
    };

    // Unparsable owner: liveness is unknowable, keep waiting.
    let Some(owner) = LockOwner::parse(&content) else {
        return Ok(false);
    };
    if owner.age(now) <= options.stale_after {
        return Ok(false);
    }
    if probe.is_alive(owner.pid) != Some(false) {
        return Ok(false);
    }

    if !remove_if_unchanged(path, &content, now, options, probe)? {
        return Ok(false);
    }
    tracing::warn!(
        path = %path.display(),
        owner_pid = owner.pid,
        age_ms = owner.age(now).num_milliseconds(),
        "broke stale append lock held by dead process"
    );
    Ok(true)
}

fn break_guard_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".break");
    PathBuf::from(name)
}

/// Remove the lock at `path` only if it still holds `inspected`.
///
/// The re-read and the removal happen while holding an exclusive
/// `<lock>.break` guard, so two claimants that inspected the same stale
/// owner cannot both remove: the second one re-reads the winner's fresh
/// owner line and backs off. Returns `false` when the lock changed or the
/// guard is busy.
fn remove_if_unchanged(
    path: &Path,
    inspected: &str,
    now: DateTime<Utc>,
    options: &LockOptions,
    probe: &dyn LivenessProbe,
) -> Result<bool, LockError> {
    let guard = break_guard_path(path);
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&guard) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            clear_abandoned_guard(&guard, now, options, probe)?;
            return Ok(false);
        }
        Err(err) => return Err(LockError::io(&guard, err)),
    };
    let owner = LockOwner {
        pid: std::process::id(),
        acquired_ms: now.timestamp_millis(),
    };
    let outcome = file
        .write_all(owner.render().as_bytes())
        .map_err(|err| LockError::io(&guard, err))
        .and_then(|()| {
            drop(file);
            match fs::read_to_string(path) {
                Ok(current) if current == inspected => {}
                Ok(_) => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
                Err(err) => return Err(LockError::io(path, err)),
            }
            match fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
                Err(err) => Err(LockError::io(path, err)),
            }
        });

    let cleared = match fs::remove_file(&guard) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LockError::io(&guard, err)),
    };
    let removed = outcome?;
    cleared?;
    Ok(removed)
}

/// A guard left by a breaker that died mid-break blocks breaking forever;
/// drop it under the same rule as the lock itself.
fn clear_abandoned_guard(
    guard: &Path,
    now: DateTime<Utc>,
    options: &LockOptions,
    probe: &dyn LivenessProbe,
) -> Result<(), LockError> {
    let content = match fs::read_to_string(guard) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(LockError::io(guard, err)),
    };
    let abandoned = LockOwner::parse(&content).is_some_and(|owner| {
        owner.age(now) > options.stale_after && probe.is_alive(owner.pid) == Some(false)
    });
    if !abandoned {
        return Ok(());
    }
    tracing::warn!(path = %guard.display(), "removing abandoned lock-break guard");
    match fs::remove_file(guard) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LockError::io(guard, err)),
    }
}
