//! Pure lease transitions.
//!
//! Every function takes the current lease record (if any) and the time
//! of the request, and either returns the record to commit or an error.
//! Nothing here touches storage or the clock, so the manager can retry a
//! transition against a fresh record after a lost compare-and-swap.

use chrono::{DateTime, Duration, Utc};

use super::types::{ceil_secs, lease_state, BreakPeriod, LeaseDuration, LeaseId, LeaseRecord, LeaseState};
use crate::errors::LeaseError;
use crate::storage::backend::ResourceKind;

/// Policy knobs that vary between deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    /// Accept `Renew` on a bounded lease that has already expired, as
    /// long as no other lease has been acquired since.
    pub allow_renew_after_expiry: bool,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            allow_renew_after_expiry: true,
        }
    }
}

/// Outcome of a break: the record to commit and the whole seconds left
/// until the resource is free.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakTransition {
    pub record: LeaseRecord,
    pub remaining_secs: u64,
}

// ── Transitions ─────────────────────────────────────────────────────

/// Acquire a lease.
///
/// Succeeds when the resource is free (no lease, expired, or broken).  A
/// held lease may be re-acquired only by proposing its current ID, which
/// resets the duration.
pub fn acquire(
    current: Option<&LeaseRecord>,
    proposed: Option<LeaseId>,
    duration: LeaseDuration,
    now: DateTime<Utc>,
) -> Result<LeaseRecord, LeaseError> {
    match lease_state(current, now) {
        LeaseState::Available | LeaseState::Expired | LeaseState::Broken => {
            let id = proposed.unwrap_or_else(LeaseId::generate);
            Ok(LeaseRecord::acquired(id, duration, now))
        }
        LeaseState::Leased => match (current, proposed) {
            (Some(record), Some(proposed)) if record.id == proposed => {
                Ok(LeaseRecord::acquired(proposed, duration, now))
            }
            _ => Err(LeaseError::LeaseAlreadyPresent),
        },
        LeaseState::Breaking => Err(LeaseError::LeaseAlreadyPresent),
    }
}

/// Renew a lease, restarting its original duration from `now`.
///
/// A lease that is still breaking can be renewed by its holder; the
/// renewal cancels the break.  Once the break has completed the lease is
/// gone.
pub fn renew(
    current: Option<&LeaseRecord>,
    lease_id: &LeaseId,
    kind: ResourceKind,
    now: DateTime<Utc>,
    policy: LeasePolicy,
) -> Result<LeaseRecord, LeaseError> {
    let record = matching(current, lease_id, kind)?;
    match record.state_at(now) {
        LeaseState::Leased | LeaseState::Breaking => {}
        LeaseState::Expired if policy.allow_renew_after_expiry => {}
        LeaseState::Expired | LeaseState::Broken | LeaseState::Available => {
            return Err(LeaseError::NoActiveLease { kind })
        }
    }
    Ok(LeaseRecord {
        expires_at: record.duration.length().map(|len| now + len),
        break_until: None,
        ..record.clone()
    })
}

/// Swap the lease token.  Timing is unchanged, including a pending
/// break, and the old token stops authorizing anything.
pub fn change(
    current: Option<&LeaseRecord>,
    lease_id: &LeaseId,
    proposed: LeaseId,
    kind: ResourceKind,
    now: DateTime<Utc>,
) -> Result<LeaseRecord, LeaseError> {
    let record = matching(current, lease_id, kind)?;
    match record.state_at(now) {
        LeaseState::Leased | LeaseState::Breaking => Ok(LeaseRecord {
            id: proposed,
            ..record.clone()
        }),
        LeaseState::Expired | LeaseState::Broken | LeaseState::Available => {
            Err(LeaseError::NoActiveLease { kind })
        }
    }
}

/// Release a lease.  The caller commits `None` on success.
pub fn release(
    current: Option<&LeaseRecord>,
    lease_id: &LeaseId,
    kind: ResourceKind,
) -> Result<(), LeaseError> {
    matching(current, lease_id, kind).map(|_| ())
}

/// Break a lease without its token.
///
/// The remaining time is `min(period, time left)`: breaking never
/// extends a lease.  An infinite lease broken without a period breaks
/// immediately.
pub fn break_lease(
    current: Option<&LeaseRecord>,
    period: Option<BreakPeriod>,
    kind: ResourceKind,
    now: DateTime<Utc>,
) -> Result<BreakTransition, LeaseError> {
    let record = current.ok_or(LeaseError::NoActiveLease { kind })?;

    let left = match record.state_at(now) {
        LeaseState::Leased | LeaseState::Breaking => record.remaining_at(now),
        LeaseState::Expired | LeaseState::Broken | LeaseState::Available => Some(Duration::zero()),
    };
    let wait = match (period.map(|p| p.length()), left) {
        (Some(period), Some(left)) => period.min(left),
        (Some(period), None) => period,
        (None, Some(left)) => left,
        (None, None) => Duration::zero(),
    };

    // A lease that already finished breaking keeps its original end.
    let break_until = match record.break_until {
        Some(until) if until <= now => until,
        _ => now + wait,
    };

    Ok(BreakTransition {
        record: LeaseRecord {
            break_until: Some(break_until),
            ..record.clone()
        },
        remaining_secs: ceil_secs(wait),
    })
}

/// Decide whether a content operation may proceed given the resource's
/// lease.
///
/// Locked resources (leased or breaking) require the matching token.
/// Unlocked resources accept requests without a token; a presented token
/// must still name the resource's last lease.  Containers and blobs are
/// treated alike.
pub fn admit_write(
    current: Option<&LeaseRecord>,
    presented: Option<&LeaseId>,
    kind: ResourceKind,
    now: DateTime<Utc>,
) -> Result<(), LeaseError> {
    let locked = lease_state(current, now).is_locked();
    match (current, presented) {
        (Some(record), Some(id)) if record.id == *id => Ok(()),
        (_, Some(_)) => Err(LeaseError::LeaseIdMismatch { kind }),
        (_, None) if !locked => Ok(()),
        (_, None) => Err(LeaseError::LeaseIdMissing { kind }),
    }
}

/// The stored record, provided `lease_id` is its token.
fn matching<'a>(
    current: Option<&'a LeaseRecord>,
    lease_id: &LeaseId,
    kind: ResourceKind,
) -> Result<&'a LeaseRecord, LeaseError> {
    match current {
        None => Err(LeaseError::NoActiveLease { kind }),
        Some(record) if record.id != *lease_id => Err(LeaseError::LeaseIdMismatch { kind }),
        Some(record) => Ok(record),
    }
}
