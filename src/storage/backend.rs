//! Abstract storage backend trait.
//!
//! Every storage backend must implement [`StorageBackend`].  The backend
//! owns resource existence and content; the lease manager owns lease
//! transitions and commits them through [`StorageBackend::store_lease`],
//! a compare-and-swap keyed on the resource version.
//!
//! Content-mutating calls take the caller's lease ID and must reject the
//! write when the resource is locked by a different lease.  Backends
//! delegate that decision to [`crate::lease::admit_write`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LeaseError;
use crate::lease::{LeaseId, LeaseRecord};

/// User-defined metadata (`x-ms-meta-*`).
pub type Metadata = HashMap<String, String>;

// ── Resource identity ──────────────────────────────────────────────

/// Whether a resource is a container or a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Blob,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Container => "container",
            ResourceKind::Blob => "blob",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a leasable resource: a container, a blob, or a blob
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Container name.
    pub container: String,
    /// Blob name within the container, if this is a blob.
    pub blob: Option<String>,
    /// Snapshot timestamp, if this refers to a blob snapshot.
    pub snapshot: Option<String>,
}

impl ResourceRef {
    pub fn container(name: impl Into<String>) -> Self {
        Self {
            container: name.into(),
            blob: None,
            snapshot: None,
        }
    }

    pub fn blob(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blob: Some(blob.into()),
            snapshot: None,
        }
    }

    /// Point this reference at a snapshot of the same blob.
    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        if self.blob.is_some() {
            ResourceKind::Blob
        } else {
            ResourceKind::Container
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// The reference to the container holding this resource.
    pub fn parent_container(&self) -> ResourceRef {
        ResourceRef::container(self.container.clone())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.container)?;
        if let Some(blob) = &self.blob {
            write!(f, "/{blob}")?;
        }
        if let Some(snapshot) = &self.snapshot {
            write!(f, "?snapshot={snapshot}")?;
        }
        Ok(())
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// A stored container or blob.
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    /// Container or blob.
    pub kind: ResourceKind,
    /// Raw content (always empty for containers).
    pub content: Bytes,
    /// Quoted hex MD5 of the content.
    pub etag: String,
    /// User-defined metadata.
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// The lease, if one was ever acquired and not yet released.
    pub lease: Option<LeaseRecord>,
    /// Bumped on every mutation; used for lease compare-and-swap.
    pub version: u64,
}

impl ResourceRecord {
    /// Build a fresh record with no lease.
    pub fn new(kind: ResourceKind, content: Bytes, metadata: Metadata, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            etag: content_etag(&content),
            content,
            metadata,
            created_at: now,
            last_modified: now,
            lease: None,
            version: 0,
        }
    }
}

/// A lease record together with the resource version it was read at.
#[derive(Debug, Clone)]
pub struct LeaseSnapshot {
    pub lease: Option<LeaseRecord>,
    pub version: u64,
}

/// Result of a lease compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The new lease record was written.
    Committed,
    /// The resource changed since it was read; nothing was written.
    Conflict,
    /// The resource no longer exists.
    NotFound,
}

/// Compute the quoted hex MD5 ETag of `data`.
pub fn content_etag(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Format a snapshot identifier: an ISO 8601 timestamp with seven
/// fractional digits, e.g. `2026-01-01T00:00:00.1234567Z`.
pub fn snapshot_timestamp(now: DateTime<Utc>) -> String {
    format!(
        "{}.{:07}Z",
        now.format("%Y-%m-%dT%H:%M:%S"),
        now.timestamp_subsec_nanos() / 100
    )
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async blob storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Create an empty container.  Fails with `ResourceAlreadyExists`.
    fn create_container(
        &self,
        name: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>>;

    /// Create or overwrite a blob, returning its ETag.  Overwriting a
    /// leased blob requires the matching lease ID.
    fn put_blob(
        &self,
        resource: &ResourceRef,
        content: Bytes,
        metadata: Metadata,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<String, LeaseError>> + Send + '_>>;

    /// Replace the user metadata on a container or blob.
    fn set_metadata(
        &self,
        resource: &ResourceRef,
        metadata: Metadata,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>>;

    /// Delete a container (with all of its blobs) or a blob (with all of
    /// its snapshots), or a single snapshot.
    fn delete(
        &self,
        resource: &ResourceRef,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>>;

    /// Take a read-only snapshot of a blob, returning the snapshot
    /// timestamp.
    fn snapshot_blob(
        &self,
        resource: &ResourceRef,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<String, LeaseError>> + Send + '_>>;

    /// Fetch a resource record.
    fn get(
        &self,
        resource: &ResourceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResourceRecord>, LeaseError>> + Send + '_>>;

    /// List the (non-snapshot) blobs in a container, sorted by name.
    fn list_blobs(
        &self,
        container: &str,
    ) -> Pin<
        Box<dyn Future<Output = Result<Vec<(String, ResourceRecord)>, LeaseError>> + Send + '_>,
    >;

    /// Read the lease record and resource version.  `None` means the
    /// resource does not exist.
    fn load_lease(
        &self,
        resource: &ResourceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LeaseSnapshot>, LeaseError>> + Send + '_>>;

    /// Replace the lease record if the resource is still at
    /// `expected_version`.
    fn store_lease(
        &self,
        resource: &ResourceRef,
        expected_version: u64,
        lease: Option<LeaseRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<CommitOutcome, LeaseError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ref_kind() {
        assert_eq!(ResourceRef::container("c").kind(), ResourceKind::Container);
        assert_eq!(ResourceRef::blob("c", "b").kind(), ResourceKind::Blob);
    }

    #[test]
    fn test_resource_ref_display() {
        assert_eq!(ResourceRef::container("photos").to_string(), "/photos");
        assert_eq!(
            ResourceRef::blob("photos", "a/b.png").to_string(),
            "/photos/a/b.png"
        );
        assert_eq!(
            ResourceRef::blob("photos", "a.png")
                .with_snapshot("2026-01-01T00:00:00.0000000Z")
                .to_string(),
            "/photos/a.png?snapshot=2026-01-01T00:00:00.0000000Z"
        );
    }

    #[test]
    fn test_snapshot_timestamp() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(snapshot_timestamp(at), "2026-01-02T03:04:05.2500000Z");
    }

    #[test]
    fn test_content_etag() {
        assert_eq!(content_etag(b""), "\"d41d8cd98f00b204e9800998ecf8427e\"");
        assert_eq!(
            content_etag(b"hello"),
            "\"5d41402abc4b2a76b9719d911017c592\""
        );
    }
}
