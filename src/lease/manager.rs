//! Lease manager.
//!
//! Ties the authorization gate, the pure transitions in
//! [`super::machine`] and the storage backend together.  Every operation
//! runs in the same order:
//!
//! 1. authorize the credential (nothing is read before this);
//! 2. validate lease IDs, duration and break period;
//! 3. reject snapshot targets;
//! 4. load the lease record and resource version;
//! 5. compute the transition at the clock's current time;
//! 6. commit with a compare-and-swap on the version.
//!
//! A lost compare-and-swap recomputes the transition against the fresh
//! record, up to `max_commit_attempts` times.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, warn};

use super::machine::{self, LeasePolicy};
use super::types::{BreakPeriod, LeaseDuration, LeaseId, LeaseProperties, LeaseRecord};
use crate::auth::{authorize, Credential, Permission};
use crate::clock::Clock;
use crate::errors::LeaseError;
use crate::metrics::LEASE_OPERATIONS_TOTAL;
use crate::storage::backend::{CommitOutcome, ResourceRef, StorageBackend};

/// Default bound on compare-and-swap retries per operation.
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 8;

/// Result of acquire, renew and change.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseGrant {
    /// The token now holding the lease.
    pub lease_id: LeaseId,
    /// When the lease lapses unless renewed; `None` for infinite leases.
    pub expires_at: Option<DateTime<Utc>>,
}

impl LeaseGrant {
    fn of(record: &LeaseRecord) -> Self {
        Self {
            lease_id: record.id.clone(),
            expires_at: record.expires_at,
        }
    }
}

/// Result of a break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseBreak {
    /// Whole seconds, rounded up, until the resource can be acquired.
    pub remaining_secs: u64,
}

/// Executes lease operations against a storage backend.
pub struct LeaseManager {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    policy: LeasePolicy,
    max_commit_attempts: u32,
}

impl LeaseManager {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        policy: LeasePolicy,
    ) -> Self {
        Self {
            backend,
            clock,
            policy,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
        }
    }

    /// Override the compare-and-swap retry bound (minimum 1).
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policy(&self) -> LeasePolicy {
        self.policy
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Acquire a lease, optionally proposing its ID.  A missing duration
    /// means infinite.
    pub async fn acquire(
        &self,
        credential: &Credential,
        resource: &ResourceRef,
        proposed: Option<&str>,
        duration: Option<i64>,
    ) -> Result<LeaseGrant, LeaseError> {
        let result: Result<LeaseGrant, LeaseError> = async {
            self.gate(credential, resource, Permission::Write)?;
            let proposed = proposed.map(LeaseId::parse).transpose()?;
            let duration = LeaseDuration::from_optional(duration)?;
            reject_snapshot(resource)?;

            self.commit(resource, |current, now| {
                let record = machine::acquire(current, proposed.clone(), duration, now)?;
                let grant = LeaseGrant::of(&record);
                Ok((Some(record), grant))
            })
            .await
        }
        .await;

        if let Ok(grant) = &result {
            info!(
                "Lease {} acquired on {} ({})",
                grant.lease_id,
                resource,
                duration_label(duration)
            );
        }
        record_outcome("acquire", resource, result)
    }

    /// Renew a lease, restarting its original duration.
    pub async fn renew(
        &self,
        credential: &Credential,
        resource: &ResourceRef,
        lease_id: &str,
    ) -> Result<LeaseGrant, LeaseError> {
        let result: Result<LeaseGrant, LeaseError> = async {
            self.gate(credential, resource, Permission::Write)?;
            let lease_id = LeaseId::parse(lease_id)?;
            reject_snapshot(resource)?;

            let kind = resource.kind();
            let policy = self.policy;
            self.commit(resource, |current, now| {
                let record = machine::renew(current, &lease_id, kind, now, policy)?;
                let grant = LeaseGrant::of(&record);
                Ok((Some(record), grant))
            })
            .await
        }
        .await;

        record_outcome("renew", resource, result)
    }

    /// Replace the lease token with `proposed`.
    pub async fn change(
        &self,
        credential: &Credential,
        resource: &ResourceRef,
        lease_id: &str,
        proposed: &str,
    ) -> Result<LeaseGrant, LeaseError> {
        let result: Result<LeaseGrant, LeaseError> = async {
            self.gate(credential, resource, Permission::Write)?;
            let lease_id = LeaseId::parse(lease_id)?;
            let proposed = LeaseId::parse(proposed)?;
            reject_snapshot(resource)?;

            let kind = resource.kind();
            self.commit(resource, |current, now| {
                let record = machine::change(current, &lease_id, proposed.clone(), kind, now)?;
                let grant = LeaseGrant::of(&record);
                Ok((Some(record), grant))
            })
            .await
        }
        .await;

        if let Ok(grant) = &result {
            info!("Lease on {} changed to {}", resource, grant.lease_id);
        }
        record_outcome("change", resource, result)
    }

    /// Release a lease, leaving the resource available immediately.
    pub async fn release(
        &self,
        credential: &Credential,
        resource: &ResourceRef,
        lease_id: &str,
    ) -> Result<(), LeaseError> {
        let result: Result<(), LeaseError> = async {
            self.gate(credential, resource, Permission::Write)?;
            let lease_id = LeaseId::parse(lease_id)?;
            reject_snapshot(resource)?;

            let kind = resource.kind();
            self.commit(resource, |current, _now| {
                machine::release(current, &lease_id, kind)?;
                Ok((None, ()))
            })
            .await
        }
        .await;

        if result.is_ok() {
            info!("Lease released on {}", resource);
        }
        record_outcome("release", resource, result)
    }

    /// Break a lease without its token.
    pub async fn break_lease(
        &self,
        credential: &Credential,
        resource: &ResourceRef,
        break_period: Option<i64>,
    ) -> Result<LeaseBreak, LeaseError> {
        let result: Result<LeaseBreak, LeaseError> = async {
            self.gate(credential, resource, Permission::Write)?;
            let period = break_period.map(BreakPeriod::from_secs).transpose()?;
            reject_snapshot(resource)?;

            let kind = resource.kind();
            self.commit(resource, |current, now| {
                let transition = machine::break_lease(current, period, kind, now)?;
                let outcome = LeaseBreak {
                    remaining_secs: transition.remaining_secs,
                };
                Ok((Some(transition.record), outcome))
            })
            .await
        }
        .await;

        if let Ok(outcome) = &result {
            info!(
                "Lease on {} broken, {}s remaining",
                resource, outcome.remaining_secs
            );
        }
        record_outcome("break", resource, result)
    }

    /// Report the lease state, status and duration of a resource.
    pub async fn properties(
        &self,
        credential: &Credential,
        resource: &ResourceRef,
    ) -> Result<LeaseProperties, LeaseError> {
        self.gate(credential, resource, Permission::Read)?;
        let snapshot = self
            .backend
            .load_lease(resource)
            .await?
            .ok_or(LeaseError::ResourceNotFound {
                kind: resource.kind(),
            })?;
        Ok(LeaseProperties::of(snapshot.lease.as_ref(), self.clock.now()))
    }

    // ── Internals ───────────────────────────────────────────────────

    fn gate(
        &self,
        credential: &Credential,
        resource: &ResourceRef,
        required: Permission,
    ) -> Result<(), LeaseError> {
        authorize(credential, resource, required, self.clock.now())
    }

    /// Load, transition and compare-and-swap until the commit lands.
    ///
    /// `transition` returns the record to store (`None` clears the lease)
    /// and the value to hand back to the caller.
    async fn commit<T, F>(&self, resource: &ResourceRef, mut transition: F) -> Result<T, LeaseError>
    where
        F: FnMut(Option<&LeaseRecord>, DateTime<Utc>) -> Result<(Option<LeaseRecord>, T), LeaseError>
            + Send,
        T: Send,
    {
        let not_found = || LeaseError::ResourceNotFound {
            kind: resource.kind(),
        };

        for attempt in 1..=self.max_commit_attempts {
            let snapshot = self
                .backend
                .load_lease(resource)
                .await?
                .ok_or_else(not_found)?;
            let now = self.clock.now();
            let (next, output) = transition(snapshot.lease.as_ref(), now)?;

            match self
                .backend
                .store_lease(resource, snapshot.version, next)
                .await?
            {
                CommitOutcome::Committed => return Ok(output),
                CommitOutcome::NotFound => return Err(not_found()),
                CommitOutcome::Conflict => {
                    debug!(
                        "Lease commit on {} lost a race at version {} (attempt {})",
                        resource, snapshot.version, attempt
                    );
                }
            }
        }

        Err(LeaseError::InternalError(anyhow::anyhow!(
            "lease commit on {} did not land after {} attempts",
            resource,
            self.max_commit_attempts
        )))
    }
}

fn reject_snapshot(resource: &ResourceRef) -> Result<(), LeaseError> {
    if resource.is_snapshot() {
        Err(LeaseError::SnapshotNotLeasable)
    } else {
        Ok(())
    }
}

fn duration_label(duration: Option<i64>) -> String {
    match duration {
        Some(secs) if secs >= 0 => format!("{secs}s"),
        _ => "infinite".to_string(),
    }
}

/// Count the operation and log failures.
fn record_outcome<T>(
    operation: &'static str,
    resource: &ResourceRef,
    result: Result<T, LeaseError>,
) -> Result<T, LeaseError> {
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    counter!(LEASE_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);

    match &result {
        Ok(_) => {}
        Err(LeaseError::AuthorizationFailed { .. }) => {
            warn!("Lease {} on {} denied", operation, resource);
        }
        Err(LeaseError::InternalError(e)) => {
            warn!("Lease {} on {} failed: {:#}", operation, resource, e);
        }
        Err(e) => {
            debug!("Lease {} on {} rejected: {}", operation, resource, e.code());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Permissions, SasScope, ServiceSas};
    use crate::clock::ManualClock;
    use crate::lease::{LeaseState, LeaseStatus};
    use crate::storage::backend::{LeaseSnapshot, Metadata, ResourceRecord};
    use crate::storage::memory::MemoryBackend;
    use bytes::Bytes;
    use chrono::{Duration, TimeZone};
    use std::future::Future;
    use std::pin::Pin;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
    }

    fn owner() -> Credential {
        Credential::AccountKey {
            account: "devstoreaccount1".to_string(),
        }
    }

    fn container_token(letters: &str) -> Credential {
        Credential::ServiceSas(ServiceSas {
            scope: SasScope::Container("c".to_string()),
            permissions: Permissions::parse(letters).unwrap(),
            start: None,
            expiry: t0() + Duration::hours(1),
        })
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        manager: LeaseManager,
        container: ResourceRef,
        blob: ResourceRef,
    }

    async fn fixture_with(policy: LeasePolicy) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_container("c", Metadata::new(), t0())
            .await
            .unwrap();
        let blob = ResourceRef::blob("c", "b");
        backend
            .put_blob(&blob, Bytes::from("data"), Metadata::new(), None, t0())
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(t0()));
        let manager = LeaseManager::new(backend, clock.clone(), policy);
        Fixture {
            clock,
            manager,
            container: ResourceRef::container("c"),
            blob,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(LeasePolicy::default()).await
    }

    fn code<T: std::fmt::Debug>(result: Result<T, LeaseError>) -> &'static str {
        result.unwrap_err().code()
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let f = fixture().await;
        let grant = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(30))
            .await
            .unwrap();
        assert_eq!(grant.expires_at, Some(t0() + Duration::seconds(30)));

        assert_eq!(
            code(f.manager.acquire(&owner(), &f.blob, None, Some(30)).await),
            "LeaseAlreadyPresent"
        );
        let other = LeaseId::generate();
        assert_eq!(
            code(
                f.manager
                    .acquire(&owner(), &f.blob, Some(other.as_str()), None)
                    .await
            ),
            "LeaseAlreadyPresent"
        );

        // The holder may re-acquire with its own token.
        let again = f
            .manager
            .acquire(&owner(), &f.blob, Some(grant.lease_id.as_str()), Some(15))
            .await
            .unwrap();
        assert_eq!(again.lease_id, grant.lease_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquires_have_one_winner() {
        let f = fixture().await;
        let manager = Arc::new(f.manager);
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            let blob = f.blob.clone();
            tasks.push(tokio::spawn(async move {
                manager.acquire(&owner(), &blob, None, None).await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert_eq!(e.code(), "LeaseAlreadyPresent"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_change_fences_old_token() {
        let f = fixture().await;
        let old = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(60))
            .await
            .unwrap()
            .lease_id;
        let new = LeaseId::generate();

        let changed = f
            .manager
            .change(&owner(), &f.blob, old.as_str(), new.as_str())
            .await
            .unwrap();
        assert_eq!(changed.lease_id, new);
        assert_eq!(changed.expires_at, Some(t0() + Duration::seconds(60)));

        assert_eq!(
            code(f.manager.renew(&owner(), &f.blob, old.as_str()).await),
            "LeaseIdMismatch"
        );
        assert_eq!(
            code(f.manager.release(&owner(), &f.blob, old.as_str()).await),
            "LeaseIdMismatch"
        );
        let write = f
            .manager
            .backend()
            .set_metadata(&f.blob, Metadata::new(), Some(old.clone()), t0())
            .await;
        assert_eq!(code(write), "LeaseIdMismatch");

        f.manager
            .renew(&owner(), &f.blob, new.as_str())
            .await
            .unwrap();
        f.manager
            .backend()
            .set_metadata(&f.blob, Metadata::new(), Some(new.clone()), t0())
            .await
            .unwrap();
        f.manager
            .release(&owner(), &f.blob, new.as_str())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duration_bounds() {
        let f = fixture().await;
        for bad in [0, 10, 100, -2, 14, 61] {
            assert_eq!(
                code(f.manager.acquire(&owner(), &f.blob, None, Some(bad)).await),
                "InvalidLeaseDuration",
                "duration {bad}"
            );
        }
        for good in 15..=60 {
            let grant = f
                .manager
                .acquire(&owner(), &f.blob, None, Some(good))
                .await
                .unwrap();
            assert_eq!(grant.expires_at, Some(t0() + Duration::seconds(good)));
            f.manager
                .release(&owner(), &f.blob, grant.lease_id.as_str())
                .await
                .unwrap();
        }
        let infinite = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(-1))
            .await
            .unwrap();
        assert_eq!(infinite.expires_at, None);
    }

    #[tokio::test]
    async fn test_break_is_capped_by_remaining_time() {
        let f = fixture().await;
        f.manager
            .acquire(&owner(), &f.blob, None, Some(60))
            .await
            .unwrap();
        f.clock.advance_secs(10);

        let shorter = f
            .manager
            .break_lease(&owner(), &f.blob, Some(20))
            .await
            .unwrap();
        assert_eq!(shorter.remaining_secs, 20);

        f.manager
            .acquire(&owner(), &f.container, None, Some(30))
            .await
            .unwrap();
        f.clock.advance_secs(5);
        let capped = f
            .manager
            .break_lease(&owner(), &f.container, Some(60))
            .await
            .unwrap();
        assert_eq!(capped.remaining_secs, 25);
    }

    #[tokio::test]
    async fn test_break_infinite_lease() {
        let f = fixture().await;
        f.manager
            .acquire(&owner(), &f.blob, None, None)
            .await
            .unwrap();
        let immediate = f
            .manager
            .break_lease(&owner(), &f.blob, None)
            .await
            .unwrap();
        assert_eq!(immediate.remaining_secs, 0);
        let props = f.manager.properties(&owner(), &f.blob).await.unwrap();
        assert_eq!(props.state, LeaseState::Broken);
        assert_eq!(props.status, LeaseStatus::Unlocked);

        f.manager
            .acquire(&owner(), &f.container, None, None)
            .await
            .unwrap();
        let timed = f
            .manager
            .break_lease(&owner(), &f.container, Some(45))
            .await
            .unwrap();
        assert_eq!(timed.remaining_secs, 45);
    }

    #[tokio::test]
    async fn test_break_without_lease() {
        let f = fixture().await;
        assert_eq!(
            code(f.manager.break_lease(&owner(), &f.blob, None).await),
            "NoActiveLease"
        );
        assert_eq!(
            code(f.manager.break_lease(&owner(), &f.blob, Some(61)).await),
            "InvalidLeaseBreakPeriod"
        );
    }

    #[tokio::test]
    async fn test_renew_after_expiry_is_lenient() {
        let f = fixture().await;
        let grant = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(15))
            .await
            .unwrap();
        f.clock.advance_secs(20);
        assert_eq!(
            f.manager.properties(&owner(), &f.blob).await.unwrap().state,
            LeaseState::Expired
        );

        let renewed = f
            .manager
            .renew(&owner(), &f.blob, grant.lease_id.as_str())
            .await
            .unwrap();
        assert_eq!(renewed.lease_id, grant.lease_id);
        assert_eq!(
            renewed.expires_at,
            Some(t0() + Duration::seconds(20 + 15))
        );
        assert_eq!(
            f.manager.properties(&owner(), &f.blob).await.unwrap().state,
            LeaseState::Leased
        );
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_renew_after_expiry() {
        let f = fixture_with(LeasePolicy {
            allow_renew_after_expiry: false,
        })
        .await;
        let grant = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(15))
            .await
            .unwrap();
        f.clock.advance_secs(16);
        assert_eq!(
            code(
                f.manager
                    .renew(&owner(), &f.blob, grant.lease_id.as_str())
                    .await
            ),
            "NoActiveLease"
        );
    }

    #[tokio::test]
    async fn test_reacquire_after_break_elapses() {
        let f = fixture().await;
        let first = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(30))
            .await
            .unwrap();
        let broken = f
            .manager
            .break_lease(&owner(), &f.blob, Some(10))
            .await
            .unwrap();
        assert_eq!(broken.remaining_secs, 10);

        assert_eq!(
            code(f.manager.acquire(&owner(), &f.blob, None, None).await),
            "LeaseAlreadyPresent"
        );

        f.clock.advance_secs(broken.remaining_secs as i64 + 1);
        assert_eq!(
            code(
                f.manager
                    .renew(&owner(), &f.blob, first.lease_id.as_str())
                    .await
            ),
            "NoActiveLease"
        );
        let second = f
            .manager
            .acquire(&owner(), &f.blob, None, None)
            .await
            .unwrap();
        assert_ne!(second.lease_id, first.lease_id);
    }

    #[tokio::test]
    async fn test_infinite_lease_blocks_unfenced_writes() {
        let f = fixture().await;
        let grant = f
            .manager
            .acquire(&owner(), &f.blob, None, None)
            .await
            .unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("k".to_string(), "v".to_string());

        let denied = f
            .manager
            .backend()
            .set_metadata(&f.blob, metadata.clone(), None, f.clock.now())
            .await;
        assert_eq!(code(denied), "LeaseIdMissing");

        f.manager
            .backend()
            .set_metadata(&f.blob, metadata, Some(grant.lease_id), f.clock.now())
            .await
            .unwrap();
        let record = f.manager.backend().get(&f.blob).await.unwrap().unwrap();
        assert_eq!(record.metadata.get("k").map(String::as_str), Some("v"));

        let held = f
            .manager
            .acquire(&owner(), &f.container, None, None)
            .await
            .unwrap();
        let denied = f
            .manager
            .backend()
            .set_metadata(&f.container, Metadata::new(), None, f.clock.now())
            .await;
        assert_eq!(code(denied), "LeaseIdMissing");
        f.manager
            .backend()
            .set_metadata(&f.container, Metadata::new(), Some(held.lease_id), f.clock.now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_holder_can_renew_while_breaking() {
        let f = fixture().await;
        let grant = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(60))
            .await
            .unwrap();
        f.manager
            .break_lease(&owner(), &f.blob, Some(30))
            .await
            .unwrap();
        f.clock.advance_secs(5);

        let renewed = f
            .manager
            .renew(&owner(), &f.blob, grant.lease_id.as_str())
            .await
            .unwrap();
        assert_eq!(renewed.lease_id, grant.lease_id);
        f.clock.advance_secs(40);
        let props = f.manager.properties(&owner(), &f.blob).await.unwrap();
        assert_eq!(props.state, LeaseState::Leased);

        f.manager
            .break_lease(&owner(), &f.blob, Some(0))
            .await
            .unwrap();
        assert_eq!(
            code(
                f.manager
                    .renew(&owner(), &f.blob, grant.lease_id.as_str())
                    .await
            ),
            "NoActiveLease"
        );
    }

    #[tokio::test]
    async fn test_malformed_change_keeps_current_id() {
        let f = fixture().await;
        let grant = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(30))
            .await
            .unwrap();
        assert_eq!(
            code(
                f.manager
                    .change(
                        &owner(),
                        &f.blob,
                        grant.lease_id.as_str(),
                        "abcefggdfdsfsdsddsdds"
                    )
                    .await
            ),
            "InvalidLeaseId"
        );
        let renewed = f
            .manager
            .renew(&owner(), &f.blob, grant.lease_id.as_str())
            .await
            .unwrap();
        assert_eq!(renewed.lease_id, grant.lease_id);
    }

    #[tokio::test]
    async fn test_resources_are_independent() {
        let f = fixture().await;
        let on_container = f
            .manager
            .acquire(&owner(), &f.container, None, None)
            .await
            .unwrap();
        let on_blob = f
            .manager
            .acquire(&owner(), &f.blob, None, Some(15))
            .await
            .unwrap();
        assert_ne!(on_container.lease_id, on_blob.lease_id);

        // The container token means nothing to the blob.
        assert_eq!(
            code(
                f.manager
                    .release(&owner(), &f.blob, on_container.lease_id.as_str())
                    .await
            ),
            "LeaseIdMismatch"
        );
        f.manager
            .release(&owner(), &f.blob, on_blob.lease_id.as_str())
            .await
            .unwrap();

        let container = f.manager.properties(&owner(), &f.container).await.unwrap();
        assert_eq!(container.state, LeaseState::Leased);
        let blob = f.manager.properties(&owner(), &f.blob).await.unwrap();
        assert_eq!(blob.state, LeaseState::Available);
        f.manager
            .renew(&owner(), &f.container, on_container.lease_id.as_str())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_proposed_id_leaves_resource_available() {
        let f = fixture().await;
        assert_eq!(
            code(
                f.manager
                    .acquire(&owner(), &f.blob, Some("abcefggdfdsfsdsddsdds"), None)
                    .await
            ),
            "InvalidLeaseId"
        );
        let props = f.manager.properties(&owner(), &f.blob).await.unwrap();
        assert_eq!(props.state, LeaseState::Available);
        assert_eq!(props.duration, None);
    }

    #[tokio::test]
    async fn test_read_list_token_cannot_break() {
        let f = fixture().await;
        f.manager
            .acquire(&owner(), &f.container, None, Some(60))
            .await
            .unwrap();

        assert_eq!(
            code(
                f.manager
                    .break_lease(&container_token("rl"), &f.container, Some(0))
                    .await
            ),
            "AuthorizationFailed"
        );
        assert_eq!(
            f.manager
                .properties(&owner(), &f.container)
                .await
                .unwrap()
                .state,
            LeaseState::Leased
        );

        let outcome = f
            .manager
            .break_lease(&container_token("rwl"), &f.container, Some(0))
            .await
            .unwrap();
        assert_eq!(outcome.remaining_secs, 0);
    }

    #[tokio::test]
    async fn test_authorization_precedes_everything_else() {
        let f = fixture().await;
        let reader = container_token("rl");
        // Missing resource and malformed input are not revealed.
        assert_eq!(
            code(
                f.manager
                    .acquire(&reader, &ResourceRef::blob("c", "nope"), Some("bad"), None)
                    .await
            ),
            "AuthorizationFailed"
        );
        assert_eq!(
            code(
                f.manager
                    .acquire(&Credential::Anonymous, &f.blob, None, Some(5))
                    .await
            ),
            "AuthorizationFailed"
        );
        // Properties only need read.
        f.manager.properties(&reader, &f.blob).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_resource_and_snapshots() {
        let f = fixture().await;
        assert_eq!(
            code(
                f.manager
                    .acquire(&owner(), &ResourceRef::blob("c", "nope"), None, None)
                    .await
            ),
            "ResourceNotFound"
        );

        let ts = f
            .manager
            .backend()
            .snapshot_blob(&f.blob, None, t0())
            .await
            .unwrap();
        let snapshot = f.blob.clone().with_snapshot(ts);
        assert_eq!(
            code(f.manager.acquire(&owner(), &snapshot, None, None).await),
            "SnapshotNotLeasable"
        );
        assert_eq!(
            f.manager.properties(&owner(), &snapshot).await.unwrap().state,
            LeaseState::Available
        );
    }

    #[tokio::test]
    async fn test_release_frees_immediately() {
        let f = fixture().await;
        let grant = f
            .manager
            .acquire(&owner(), &f.container, None, None)
            .await
            .unwrap();
        f.manager
            .release(&owner(), &f.container, grant.lease_id.as_str())
            .await
            .unwrap();
        let props = f.manager.properties(&owner(), &f.container).await.unwrap();
        assert_eq!(props.state, LeaseState::Available);
        f.manager
            .acquire(&owner(), &f.container, None, None)
            .await
            .unwrap();
    }

    /// Delegates to a memory backend but loses every lease commit.
    struct AlwaysConflicts(MemoryBackend);

    impl StorageBackend for AlwaysConflicts {
        fn create_container(
            &self,
            name: &str,
            metadata: Metadata,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
            self.0.create_container(name, metadata, now)
        }

        fn put_blob(
            &self,
            resource: &ResourceRef,
            content: Bytes,
            metadata: Metadata,
            lease_id: Option<LeaseId>,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<String, LeaseError>> + Send + '_>> {
            self.0.put_blob(resource, content, metadata, lease_id, now)
        }

        fn set_metadata(
            &self,
            resource: &ResourceRef,
            metadata: Metadata,
            lease_id: Option<LeaseId>,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
            self.0.set_metadata(resource, metadata, lease_id, now)
        }

        fn delete(
            &self,
            resource: &ResourceRef,
            lease_id: Option<LeaseId>,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
            self.0.delete(resource, lease_id, now)
        }

        fn snapshot_blob(
            &self,
            resource: &ResourceRef,
            lease_id: Option<LeaseId>,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<String, LeaseError>> + Send + '_>> {
            self.0.snapshot_blob(resource, lease_id, now)
        }

        fn get(
            &self,
            resource: &ResourceRef,
        ) -> Pin<Box<dyn Future<Output = Result<Option<ResourceRecord>, LeaseError>> + Send + '_>>
        {
            self.0.get(resource)
        }

        fn list_blobs(
            &self,
            container: &str,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<Vec<(String, ResourceRecord)>, LeaseError>>
                    + Send
                    + '_,
            >,
        > {
            self.0.list_blobs(container)
        }

        fn load_lease(
            &self,
            resource: &ResourceRef,
        ) -> Pin<Box<dyn Future<Output = Result<Option<LeaseSnapshot>, LeaseError>> + Send + '_>>
        {
            self.0.load_lease(resource)
        }

        fn store_lease(
            &self,
            _resource: &ResourceRef,
            _expected_version: u64,
            _lease: Option<LeaseRecord>,
        ) -> Pin<Box<dyn Future<Output = Result<CommitOutcome, LeaseError>> + Send + '_>> {
            Box::pin(async { Ok(CommitOutcome::Conflict) })
        }
    }

    #[tokio::test]
    async fn test_commit_gives_up_after_bounded_attempts() {
        let inner = MemoryBackend::new();
        inner
            .create_container("c", Metadata::new(), t0())
            .await
            .unwrap();
        let manager = LeaseManager::new(
            Arc::new(AlwaysConflicts(inner)),
            Arc::new(ManualClock::new(t0())),
            LeasePolicy::default(),
        )
        .with_max_commit_attempts(3);

        let err = manager
            .acquire(&owner(), &ResourceRef::container("c"), None, None)
            .await
            .unwrap_err();
        match err {
            LeaseError::InternalError(e) => assert!(e.to_string().contains("3 attempts")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
