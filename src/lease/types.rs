//! Lease value types: tokens, durations, break periods, and the stored
//! lease record with its lazily derived state.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::LeaseError;

/// Shortest bounded lease, in seconds.
pub const MIN_LEASE_DURATION_SECS: i64 = 15;

/// Longest bounded lease, in seconds.
pub const MAX_LEASE_DURATION_SECS: i64 = 60;

/// Longest break period, in seconds.
pub const MAX_BREAK_PERIOD_SECS: i64 = 60;

/// Wire value for an infinite lease duration.
pub const INFINITE_DURATION: i64 = -1;

// ── LeaseId ─────────────────────────────────────────────────────────

/// A lease token in canonical hyphenated UUID form.
///
/// Parsing accepts either case and normalizes to lowercase, so tokens
/// compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseId(String);

impl LeaseId {
    /// Validate `value` as a lease token.
    pub fn parse(value: &str) -> Result<Self, LeaseError> {
        let invalid = || LeaseError::InvalidLeaseId {
            id: value.to_string(),
        };
        // Only the 8-4-4-4-12 form; uuid also accepts simple, braced and urn.
        if value.len() != 36 {
            return Err(invalid());
        }
        let uuid = Uuid::try_parse(value).map_err(|_| invalid())?;
        Ok(Self(uuid.hyphenated().to_string()))
    }

    /// Generate a fresh server-side token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── LeaseDuration ───────────────────────────────────────────────────

/// How long a lease lasts without renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDuration {
    Infinite,
    /// Bounded duration in seconds, always within [15, 60].
    Fixed(u32),
}

impl LeaseDuration {
    /// Parse the wire value: `-1` is infinite, [15, 60] is bounded.
    pub fn from_secs(value: i64) -> Result<Self, LeaseError> {
        match value {
            INFINITE_DURATION => Ok(LeaseDuration::Infinite),
            MIN_LEASE_DURATION_SECS..=MAX_LEASE_DURATION_SECS => {
                Ok(LeaseDuration::Fixed(value as u32))
            }
            _ => Err(LeaseError::InvalidLeaseDuration { value }),
        }
    }

    /// Parse an optional wire value; absent means infinite.
    pub fn from_optional(value: Option<i64>) -> Result<Self, LeaseError> {
        value.map_or(Ok(LeaseDuration::Infinite), Self::from_secs)
    }

    /// The wire value (`-1` for infinite).
    pub fn as_secs(&self) -> i64 {
        match self {
            LeaseDuration::Infinite => INFINITE_DURATION,
            LeaseDuration::Fixed(secs) => i64::from(*secs),
        }
    }

    /// The bounded length, or `None` for an infinite lease.
    pub fn length(&self) -> Option<Duration> {
        match self {
            LeaseDuration::Infinite => None,
            LeaseDuration::Fixed(secs) => Some(Duration::seconds(i64::from(*secs))),
        }
    }

    /// `infinite` or `fixed`, as reported in lease properties.
    pub fn kind_str(&self) -> &'static str {
        match self {
            LeaseDuration::Infinite => "infinite",
            LeaseDuration::Fixed(_) => "fixed",
        }
    }
}

// ── BreakPeriod ─────────────────────────────────────────────────────

/// Requested grace period before a broken lease is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakPeriod(u32);

impl BreakPeriod {
    pub fn from_secs(value: i64) -> Result<Self, LeaseError> {
        if (0..=MAX_BREAK_PERIOD_SECS).contains(&value) {
            Ok(Self(value as u32))
        } else {
            Err(LeaseError::InvalidLeaseBreakPeriod { value })
        }
    }

    pub fn secs(&self) -> u32 {
        self.0
    }

    pub fn length(&self) -> Duration {
        Duration::seconds(i64::from(self.0))
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Lease state of a resource at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Available,
    Leased,
    Expired,
    Breaking,
    Broken,
}

impl LeaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Available => "available",
            LeaseState::Leased => "leased",
            LeaseState::Expired => "expired",
            LeaseState::Breaking => "breaking",
            LeaseState::Broken => "broken",
        }
    }

    /// Whether writes require the lease token in this state.
    pub fn is_locked(&self) -> bool {
        matches!(self, LeaseState::Leased | LeaseState::Breaking)
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse lock status reported alongside the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Locked,
    Unlocked,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Locked => "locked",
            LeaseStatus::Unlocked => "unlocked",
        }
    }
}

// ── Record ──────────────────────────────────────────────────────────

/// A lease as persisted by the storage backend.
///
/// The state is never stored: it is derived from the timestamps and the
/// time of the query, so expiry and break completion need no timers.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRecord {
    /// Current token.
    pub id: LeaseId,
    /// Duration requested at acquire; reused by renew.
    pub duration: LeaseDuration,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When a bounded lease lapses; `None` for infinite leases.
    pub expires_at: Option<DateTime<Utc>>,
    /// When a break completes; set once the lease has been broken.
    pub break_until: Option<DateTime<Utc>>,
}

impl LeaseRecord {
    /// Build a newly acquired lease.
    pub fn acquired(id: LeaseId, duration: LeaseDuration, now: DateTime<Utc>) -> Self {
        Self {
            id,
            duration,
            acquired_at: now,
            expires_at: duration.length().map(|len| now + len),
            break_until: None,
        }
    }

    /// Derive the lease state at `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> LeaseState {
        if let Some(until) = self.break_until {
            return if now < until {
                LeaseState::Breaking
            } else {
                LeaseState::Broken
            };
        }
        match self.expires_at {
            Some(expires) if now >= expires => LeaseState::Expired,
            _ => LeaseState::Leased,
        }
    }

    /// Time left before the lease stops holding the resource, or `None`
    /// for an unbroken infinite lease.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let end = self.break_until.or(self.expires_at)?;
        Some((end - now).max(Duration::zero()))
    }
}

/// State of a resource that may or may not carry a lease record.
pub fn lease_state(record: Option<&LeaseRecord>, now: DateTime<Utc>) -> LeaseState {
    record.map_or(LeaseState::Available, |r| r.state_at(now))
}

/// Reported lease properties of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseProperties {
    pub state: LeaseState,
    pub status: LeaseStatus,
    /// Present only while the resource is locked.
    pub duration: Option<LeaseDuration>,
}

impl LeaseProperties {
    pub fn of(record: Option<&LeaseRecord>, now: DateTime<Utc>) -> Self {
        let state = lease_state(record, now);
        if state.is_locked() {
            Self {
                state,
                status: LeaseStatus::Locked,
                duration: record.map(|r| r.duration),
            }
        } else {
            Self {
                state,
                status: LeaseStatus::Unlocked,
                duration: None,
            }
        }
    }
}

/// Round a duration up to whole seconds, clamping negatives to zero.
pub fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}
