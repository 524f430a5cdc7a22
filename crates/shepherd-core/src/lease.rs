//! Lease protocol.
//!
//! Pure decision functions over an optional current [`LeaseRecord`]. Callers
//! supply every timestamp, so the same inputs always produce the same
//! outcome. Nothing here touches the filesystem; the runtime records the
//! returned record as a `lease_set` or `lease_released` event.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Time-bounded single-owner claim on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub worker_id: String,
    pub lease_id: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    /// A lease is live only while its expiry is strictly after `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    #[must_use]
    pub fn is_owned_by(&self, worker_id: &str, lease_id: &str) -> bool {
        self.worker_id == worker_id && self.lease_id == lease_id
    }
}

/// Lease protocol rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    /// A live lease is held by a different `(worker, lease)` pair.
    #[error(
        "lease held by worker {held_worker} (lease {held_lease}); requested by worker {worker_id} (lease {lease_id})"
    )]
    Conflict {
        worker_id: String,
        lease_id: String,
        held_worker: String,
        held_lease: String,
    },

    #[error("no active lease")]
    NoLease,

    #[error("invalid lease request: {0}")]
    InvalidRequest(&'static str),
}

impl LeaseError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Conflict { .. } | Self::NoLease => ErrorCode::LeaseConflict,
            Self::InvalidRequest(_) => ErrorCode::InvalidInput,
        }
    }

    fn conflict(held: &LeaseRecord, worker_id: &str, lease_id: &str) -> Self {
        Self::Conflict {
            worker_id: worker_id.to_string(),
            lease_id: lease_id.to_string(),
            held_worker: held.worker_id.clone(),
            held_lease: held.lease_id.clone(),
        }
    }
}

fn validate_identity(worker_id: &str, lease_id: &str) -> Result<(), LeaseError> {
    if worker_id.trim().is_empty() {
        return Err(LeaseError::InvalidRequest("worker id must not be empty"));
    }
    if lease_id.trim().is_empty() {
        return Err(LeaseError::InvalidRequest("lease id must not be empty"));
    }
    Ok(())
}

fn validate_ttl(ttl: Duration) -> Result<(), LeaseError> {
    if ttl <= Duration::zero() {
        return Err(LeaseError::InvalidRequest("ttl must be positive"));
    }
    Ok(())
}

/// Grant a lease to `(worker_id, lease_id)`.
///
/// Succeeds when there is no current lease, the current lease has expired,
/// or the caller already owns it (re-grant). A fresh record is returned in
/// every success case.
///
/// # Errors
///
/// [`LeaseError::Conflict`] if a live lease belongs to another pair, or
/// [`LeaseError::InvalidRequest`] for empty identities or a non-positive ttl.
pub fn acquire(
    current: Option<&LeaseRecord>,
    worker_id: &str,
    lease_id: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<LeaseRecord, LeaseError> {
    validate_identity(worker_id, lease_id)?;
    validate_ttl(ttl)?;

    if let Some(held) =
        current.filter(|held| held.is_live(now) && !held.is_owned_by(worker_id, lease_id))
    {
        return Err(LeaseError::conflict(held, worker_id, lease_id));
    }

    Ok(LeaseRecord {
        worker_id: worker_id.to_string(),
        lease_id: lease_id.to_string(),
        acquired_at: now,
        heartbeat_at: now,
        expires_at: now + ttl,
    })
}

/// Extend the caller's lease to `now + ttl`.
///
/// # Errors
///
/// [`LeaseError::NoLease`] when nothing is held, [`LeaseError::Conflict`]
/// when the held lease has a different owner.
pub fn heartbeat(
    current: Option<&LeaseRecord>,
    worker_id: &str,
    lease_id: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<LeaseRecord, LeaseError> {
    validate_identity(worker_id, lease_id)?;
    validate_ttl(ttl)?;

    let held = current.ok_or(LeaseError::NoLease)?;
    if !held.is_owned_by(worker_id, lease_id) {
        return Err(LeaseError::conflict(held, worker_id, lease_id));
    }

    Ok(LeaseRecord {
        heartbeat_at: now,
        expires_at: now + ttl,
        ..held.clone()
    })
}

/// Decide whether `(worker_id, lease_id)` may release the current lease.
///
/// Returns `Ok(true)` when the caller owns the lease and a release must be
/// recorded, `Ok(false)` when there is nothing to release (no lease, or an
/// expired lease of someone else).
///
/// # Errors
///
/// [`LeaseError::Conflict`] when a live lease belongs to another pair.
pub fn release(
    current: Option<&LeaseRecord>,
    worker_id: &str,
    lease_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, LeaseError> {
    validate_identity(worker_id, lease_id)?;

    match current {
        None => Ok(false),
        Some(held) if held.is_owned_by(worker_id, lease_id) => Ok(true),
        Some(held) if held.is_live(now) => Err(LeaseError::conflict(held, worker_id, lease_id)),
        Some(_) => Ok(false),
    }
}

/// True when there is no lease or its expiry is not strictly after `now`.
#[must_use]
pub fn is_expired(current: Option<&LeaseRecord>, now: DateTime<Utc>) -> bool {
    current.is_none_or(|held| !held.is_live(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn ttl() -> Duration {
        Duration::seconds(30)
    }

    #[test]
    fn acquire_on_empty_grants() {
        let rec = acquire(None, "w1", "l1", t0(), ttl()).unwrap();
        assert_eq!(rec.worker_id, "w1");
        assert_eq!(rec.expires_at, t0() + ttl());
        assert!(!is_expired(Some(&rec), t0()));
    }

    #[test]
    fn acquire_against_live_foreign_lease_conflicts() {
        let held = acquire(None, "w1", "l1", t0(), ttl()).unwrap();
        let err = acquire(Some(&held), "w2", "l2", t0() + Duration::seconds(5), ttl()).unwrap_err();
        match err {
            LeaseError::Conflict {
                worker_id,
                held_worker,
                held_lease,
                ..
            } => {
                assert_eq!(worker_id, "w2");
                assert_eq!(held_worker, "w1");
                assert_eq!(held_lease, "l1");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn same_worker_new_lease_id_still_conflicts() {
        let held = acquire(None, "w1", "l1", t0(), ttl()).unwrap();
        assert!(acquire(Some(&held), "w1", "l2", t0(), ttl()).is_err());
    }

    #[test]
    fn reacquire_by_owner_regrants() {
        let held = acquire(None, "w1", "l1", t0(), ttl()).unwrap();
        let later = t0() + Duration::seconds(10);
        let again = acquire(Some(&held), "w1", "l1", later, ttl()).unwrap();
        assert_eq!(again.expires_at, later + ttl());
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let held = acquire(None, "w1", "l1", t0(), ttl()).unwrap();
        let at_expiry = held.expires_at;
        assert!(is_expired(Some(&held), at_expiry));
        assert!(!is_expired(Some(&held), at_expiry - Duration::milliseconds(1)));

        let taken = acquire(Some(&held), "w2", "l2", at_expiry, ttl()).unwrap();
        assert_eq!(taken.worker_id, "w2");
        assert_eq!(taken.lease_id, "l2");
    }

    #[test]
    fn heartbeat_requires_exact_owner() {
        assert_eq!(
            heartbeat(None, "w1", "l1", t0(), ttl()).unwrap_err(),
            LeaseError::NoLease
        );

        let held = acquire(None, "w1", "l1", t0(), ttl()).unwrap();
        assert!(matches!(
            heartbeat(Some(&held), "w1", "other", t0(), ttl()),
            Err(LeaseError::Conflict { .. })
        ));

        let later = t0() + Duration::seconds(20);
        let beat = heartbeat(Some(&held), "w1", "l1", later, ttl()).unwrap();
        assert_eq!(beat.acquired_at, t0());
        assert_eq!(beat.heartbeat_at, later);
        assert_eq!(beat.expires_at, later + ttl());
    }

    #[test]
    fn release_semantics() {
        assert!(!release(None, "w1", "l1", t0()).unwrap());

        let held = acquire(None, "w1", "l1", t0(), ttl()).unwrap();
        assert!(release(Some(&held), "w1", "l1", t0()).unwrap());
        assert!(matches!(
            release(Some(&held), "w2", "l2", t0()),
            Err(LeaseError::Conflict { .. })
        ));

        let after = held.expires_at + Duration::seconds(1);
        assert!(!release(Some(&held), "w2", "l2", after).unwrap());
    }

    #[test]
    fn invalid_requests_are_rejected() {
        assert_eq!(
            acquire(None, " ", "l1", t0(), ttl()).unwrap_err().code(),
            ErrorCode::InvalidInput
        );
        assert!(matches!(
            acquire(None, "w1", "l1", t0(), Duration::zero()),
            Err(LeaseError::InvalidRequest(_))
        ));
    }
}
