//! Per-job durable event log.
//!
//! # Directory Layout
//!
//! ```text
//! <root>/
//!   jobs/
//!     <job_id>/
//!       events.jsonl    # append-only log, one JSON record per line
//!       snapshot.json   # latest state projection (optional, atomic)
//!       append.lock     # present only while an append is in flight
//! ```
//!
//! # Invariants
//!
//! - Sequence numbers are assigned only while `append.lock` is held, so
//!   they are gap-free and strictly increasing per job.
//! - Each append is `write_all` + `flush` + `sync_data` of one full line.
//! - Readers never lock; they drop a trailing fragment without a newline.
//! - Snapshots are written to a temp file in the job directory and renamed
//!   into place.

use std::fs::{self, OpenOptions};
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::ErrorCode;
use crate::event::{parser, writer, Event, EventData};
use crate::lock::{AppendLock, LivenessProbe, LockError, LockOptions, ProcProbe};
use crate::recovery;

const EVENTS_FILE: &str = "events.jsonl";
const SNAPSHOT_FILE: &str = "snapshot.json";
const LOCK_FILE: &str = "append.lock";

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid job id {job_id:?}: {reason}")]
    InvalidJobId { job_id: String, reason: &'static str },

    /// The log moved on since the caller read it.
    #[error("append conflict on job {job_id}: expected last seq {expected}, found {actual}")]
    AppendConflict {
        job_id: String,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("corrupt event log for job {job_id} at line {line}: {reason}")]
    CorruptEvent {
        job_id: String,
        line: usize,
        reason: String,
    },

    #[error("corrupt event log for job {job_id}: expected seq {expected}, found {found}")]
    SequenceGap {
        job_id: String,
        expected: u64,
        found: u64,
    },

    #[error("corrupt snapshot for job {job_id}: {reason}")]
    CorruptSnapshot { job_id: String, reason: String },

    #[error("failed to serialize {what} for job {job_id}: {source}")]
    Serialize {
        job_id: String,
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Machine-readable code associated with this store error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidJobId { .. } | Self::Serialize { .. } => ErrorCode::InvalidInput,
            Self::AppendConflict { .. } => ErrorCode::AppendConflict,
            Self::Lock(err) => err.code(),
            Self::CorruptEvent { .. } | Self::SequenceGap { .. } | Self::CorruptSnapshot { .. } => {
                ErrorCode::StoreCorrupt
            }
            Self::Io { .. } => ErrorCode::Io,
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Latest cached state projection for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_seq: u64,
    pub created_at: DateTime<Utc>,
    pub state: serde_json::Value,
}

/// Reject job ids that could escape the store root or are not plain names.
///
/// Allowed: ASCII letters, digits, `.`, `_`, `-`; no `..` sequence.
///
/// # Errors
///
/// Returns [`StoreError::InvalidJobId`] describing the first violation.
pub fn validate_job_id(job_id: &str) -> Result<(), StoreError> {
    let reject = |reason| {
        Err(StoreError::InvalidJobId {
            job_id: job_id.to_string(),
            reason,
        })
    };
    if job_id.trim().is_empty() {
        return reject("job id must not be empty");
    }
    if !job_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return reject("only [A-Za-z0-9._-] allowed");
    }
    if job_id == "." || job_id.contains("..") {
        return reject("parent-directory references are not allowed");
    }
    Ok(())
}

/// Filesystem-backed event store rooted at a directory.
#[derive(Clone)]
pub struct JobStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    lock_options: LockOptions,
    probe: Arc<dyn LivenessProbe>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("root", &self.root)
            .field("lock_options", &self.lock_options)
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Create a store rooted at `root`. Nothing is created on disk until the
    /// first job is ensured.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock: Arc::new(SystemClock),
            lock_options: LockOptions::default(),
            probe: Arc::new(ProcProbe),
        }
    }

    /// Clock used to stamp and age append locks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    #[must_use]
    pub fn with_liveness_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("jobs").join(job_id)
    }

    #[must_use]
    pub fn events_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(EVENTS_FILE)
    }

    #[must_use]
    pub fn snapshot_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(SNAPSHOT_FILE)
    }

    #[must_use]
    pub fn lock_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(LOCK_FILE)
    }

    /// Create the job directory if needed.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidJobId`] for unsafe ids, [`StoreError::Io`] if
    /// the directory cannot be created.
    pub fn ensure_job(&self, job_id: &str) -> Result<(), StoreError> {
        validate_job_id(job_id)?;
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))
    }

    /// Whether the job directory exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidJobId`] for unsafe ids.
    pub fn job_exists(&self, job_id: &str) -> Result<bool, StoreError> {
        validate_job_id(job_id)?;
        Ok(self.job_dir(job_id).is_dir())
    }

    /// Append an event with the next sequence number.
    ///
    /// # Errors
    ///
    /// Returns lock, serialization, corruption or I/O errors. On error the
    /// log is unchanged.
    pub fn append(
        &self,
        job_id: &str,
        data: EventData,
        ts: DateTime<Utc>,
    ) -> Result<Event, StoreError> {
        self.append_inner(job_id, data, ts, None)
    }

    /// Append only if the log's last sequence number equals
    /// `expected_last_seq` when the lock is taken.
    ///
    /// # Errors
    ///
    /// [`StoreError::AppendConflict`] when the log has moved on; otherwise as
    /// [`append`](Self::append).
    pub fn append_cas(
        &self,
        job_id: &str,
        data: EventData,
        expected_last_seq: u64,
        ts: DateTime<Utc>,
    ) -> Result<Event, StoreError> {
        self.append_inner(job_id, data, ts, Some(expected_last_seq))
    }

    fn append_inner(
        &self,
        job_id: &str,
        data: EventData,
        ts: DateTime<Utc>,
        expected_last_seq: Option<u64>,
    ) -> Result<Event, StoreError> {
        self.ensure_job(job_id)?;

        let lock = AppendLock::acquire(
            &self.lock_path(job_id),
            self.clock.as_ref(),
            &self.lock_options,
            self.probe.as_ref(),
        )?;

        let result = self.append_locked(job_id, data, ts, expected_last_seq);

        if let Err(err) = lock.release() {
            tracing::warn!(job_id, error = %err, "failed to release append lock");
        }
        result
    }

    fn append_locked(
        &self,
        job_id: &str,
        data: EventData,
        ts: DateTime<Utc>,
        expected_last_seq: Option<u64>,
    ) -> Result<Event, StoreError> {
        let path = self.events_path(job_id);
        recovery::repair_torn_tail(&path).map_err(|e| StoreError::io(&path, e))?;

        let last_seq = self.load_events(job_id)?.last().map_or(0, |e| e.seq);
        if let Some(expected) = expected_last_seq.filter(|expected| *expected != last_seq) {
            return Err(StoreError::AppendConflict {
                job_id: job_id.to_string(),
                expected,
                actual: last_seq,
            });
        }

        let event = Event {
            seq: last_seq + 1,
            created_at: ts,
            data,
        };
        let line = writer::encode_line(&event).map_err(|source| StoreError::Serialize {
            job_id: job_id.to_string(),
            what: "event",
            source,
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::trace!(job_id, seq = event.seq, event_type = %event.event_type(), "event appended");
        Ok(event)
    }

    /// Read every complete event, ordered by sequence number.
    ///
    /// A missing log is an empty history. A trailing fragment without a
    /// newline is ignored.
    ///
    /// # Errors
    ///
    /// [`StoreError::CorruptEvent`] for an undecodable complete line,
    /// [`StoreError::SequenceGap`] when sequences are not exactly `1..=N`.
    pub fn load_events(&self, job_id: &str) -> Result<Vec<Event>, StoreError> {
        validate_job_id(job_id)?;
        let path = self.events_path(job_id);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&path, err)),
        };

        let parsed = parser::parse_log_bytes(&content).map_err(|err| StoreError::CorruptEvent {
            job_id: job_id.to_string(),
            line: err.line,
            reason: err.source.to_string(),
        })?;
        if let Some(bytes) = parsed.torn_tail {
            tracing::debug!(job_id, bytes, "ignoring torn trailing line");
        }

        let mut events = parsed.events;
        events.sort_by_key(|e| e.seq);
        for (expected, event) in (1_u64..).zip(&events) {
            if event.seq != expected {
                return Err(StoreError::SequenceGap {
                    job_id: job_id.to_string(),
                    expected,
                    found: event.seq,
                });
            }
        }
        Ok(events)
    }

    /// Atomically replace the job's snapshot.
    ///
    /// # Errors
    ///
    /// Serialization or I/O errors. A failed save leaves the previous
    /// snapshot in place.
    pub fn save_snapshot<T: Serialize>(
        &self,
        job_id: &str,
        last_seq: u64,
        state: &T,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_job(job_id)?;
        let serialize_err = |source| StoreError::Serialize {
            job_id: job_id.to_string(),
            what: "snapshot",
            source,
        };
        let snapshot = Snapshot {
            last_seq,
            created_at: now,
            state: serde_json::to_value(state).map_err(serialize_err)?,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(serialize_err)?;

        let dir = self.job_dir(job_id);
        let path = self.snapshot_path(job_id);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_data())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;
        Ok(())
    }

    /// Read the job's snapshot, if any.
    ///
    /// # Errors
    ///
    /// [`StoreError::CorruptSnapshot`] if the file does not decode.
    pub fn load_snapshot(&self, job_id: &str) -> Result<Option<Snapshot>, StoreError> {
        validate_job_id(job_id)?;
        let path = self.snapshot_path(job_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StoreError::CorruptSnapshot {
                job_id: job_id.to_string(),
                reason: err.to_string(),
            })
    }
}
