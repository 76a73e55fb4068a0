//! In-memory storage backend.
//!
//! Containers, blobs and snapshots live in ordered maps behind a single
//! `tokio::sync::RwLock`, so every check-and-write (lease admission,
//! version compare-and-swap) happens under one write guard.  Nothing
//! survives a restart.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::backend::{
    content_etag, snapshot_timestamp, CommitOutcome, LeaseSnapshot, Metadata, ResourceKind,
    ResourceRecord, ResourceRef, StorageBackend,
};
use crate::errors::LeaseError;
use crate::lease::{admit_write, LeaseId, LeaseRecord};

type BlobKey = (String, String);
type SnapshotKey = (String, String, String);

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, ResourceRecord>,
    blobs: BTreeMap<BlobKey, ResourceRecord>,
    snapshots: BTreeMap<SnapshotKey, ResourceRecord>,
}

impl Inner {
    fn record(&self, resource: &ResourceRef) -> Option<&ResourceRecord> {
        match (&resource.blob, &resource.snapshot) {
            (None, _) => self.containers.get(&resource.container),
            (Some(blob), None) => self.blobs.get(&(resource.container.clone(), blob.clone())),
            (Some(blob), Some(snapshot)) => self.snapshots.get(&(
                resource.container.clone(),
                blob.clone(),
                snapshot.clone(),
            )),
        }
    }

    fn record_mut(&mut self, resource: &ResourceRef) -> Option<&mut ResourceRecord> {
        match (&resource.blob, &resource.snapshot) {
            (None, _) => self.containers.get_mut(&resource.container),
            (Some(blob), None) => self
                .blobs
                .get_mut(&(resource.container.clone(), blob.clone())),
            (Some(blob), Some(snapshot)) => self.snapshots.get_mut(&(
                resource.container.clone(),
                blob.clone(),
                snapshot.clone(),
            )),
        }
    }

    fn blob_keys(&self, container: &str) -> Vec<BlobKey> {
        self.blobs
            .keys()
            .filter(|(c, _)| c == container)
            .cloned()
            .collect()
    }

    fn snapshot_keys(&self, container: &str, blob: Option<&str>) -> Vec<SnapshotKey> {
        self.snapshots
            .keys()
            .filter(|(c, b, _)| c == container && blob.map_or(true, |blob| b == blob))
            .cloned()
            .collect()
    }
}

/// Volatile storage backend for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: ResourceKind) -> LeaseError {
    LeaseError::ResourceNotFound { kind }
}

fn read_only_snapshot() -> LeaseError {
    LeaseError::InvalidArgument {
        message: "Snapshots are read-only.".to_string(),
    }
}

/// Apply a content change to a stored record.
fn touch(record: &mut ResourceRecord, now: DateTime<Utc>) {
    record.last_modified = now;
    record.version += 1;
}

// ── StorageBackend implementation ──────────────────────────────────

impl StorageBackend for MemoryBackend {
    fn create_container(
        &self,
        name: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if inner.containers.contains_key(&name) {
                return Err(LeaseError::ResourceAlreadyExists {
                    kind: ResourceKind::Container,
                });
            }
            inner.containers.insert(
                name,
                ResourceRecord::new(ResourceKind::Container, Bytes::new(), metadata, now),
            );
            Ok(())
        })
    }

    fn put_blob(
        &self,
        resource: &ResourceRef,
        content: Bytes,
        metadata: Metadata,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<String, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(async move {
            let Some(blob) = resource.blob.clone() else {
                return Err(LeaseError::InvalidArgument {
                    message: "A blob name is required.".to_string(),
                });
            };
            if resource.is_snapshot() {
                return Err(read_only_snapshot());
            }

            let mut inner = self.inner.write().await;
            if !inner.containers.contains_key(&resource.container) {
                return Err(not_found(ResourceKind::Container));
            }

            let etag = content_etag(&content);
            match inner.record_mut(&resource) {
                Some(existing) => {
                    admit_write(
                        existing.lease.as_ref(),
                        lease_id.as_ref(),
                        ResourceKind::Blob,
                        now,
                    )?;
                    existing.content = content;
                    existing.etag = etag.clone();
                    existing.metadata = metadata;
                    touch(existing, now);
                }
                None => {
                    admit_write(
                        None,
                        lease_id.as_ref(),
                        ResourceKind::Blob,
                        now,
                    )?;
                    inner.blobs.insert(
                        (resource.container.clone(), blob),
                        ResourceRecord::new(ResourceKind::Blob, content, metadata, now),
                    );
                }
            }
            Ok(etag)
        })
    }

    fn set_metadata(
        &self,
        resource: &ResourceRef,
        metadata: Metadata,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(async move {
            if resource.is_snapshot() {
                return Err(read_only_snapshot());
            }
            let mut inner = self.inner.write().await;
            let record = inner
                .record_mut(&resource)
                .ok_or_else(|| not_found(resource.kind()))?;
            admit_write(
                record.lease.as_ref(),
                lease_id.as_ref(),
                resource.kind(),
                now,
            )?;
            record.metadata = metadata;
            touch(record, now);
            Ok(())
        })
    }

    fn delete(
        &self,
        resource: &ResourceRef,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let record = inner
                .record(&resource)
                .ok_or_else(|| not_found(resource.kind()))?;
            if !resource.is_snapshot() {
                admit_write(
                    record.lease.as_ref(),
                    lease_id.as_ref(),
                    resource.kind(),
                    now,
                )?;
            }

            match (&resource.blob, &resource.snapshot) {
                (None, _) => {
                    for key in inner.snapshot_keys(&resource.container, None) {
                        inner.snapshots.remove(&key);
                    }
                    for key in inner.blob_keys(&resource.container) {
                        inner.blobs.remove(&key);
                    }
                    inner.containers.remove(&resource.container);
                }
                (Some(blob), None) => {
                    for key in inner.snapshot_keys(&resource.container, Some(blob)) {
                        inner.snapshots.remove(&key);
                    }
                    inner
                        .blobs
                        .remove(&(resource.container.clone(), blob.clone()));
                }
                (Some(blob), Some(snapshot)) => {
                    inner.snapshots.remove(&(
                        resource.container.clone(),
                        blob.clone(),
                        snapshot.clone(),
                    ));
                }
            }
            Ok(())
        })
    }

    fn snapshot_blob(
        &self,
        resource: &ResourceRef,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<String, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(async move {
            let Some(blob) = resource.blob.clone() else {
                return Err(LeaseError::InvalidArgument {
                    message: "Only blobs can be snapshotted.".to_string(),
                });
            };
            if resource.is_snapshot() {
                return Err(read_only_snapshot());
            }

            let mut inner = self.inner.write().await;
            let record = inner
                .record(&resource)
                .ok_or_else(|| not_found(ResourceKind::Blob))?;
            // Snapshots never need a lease ID, but a presented one must match.
            if lease_id.is_some() {
                admit_write(
                    record.lease.as_ref(),
                    lease_id.as_ref(),
                    ResourceKind::Blob,
                    now,
                )?;
            }

            let timestamp = snapshot_timestamp(now);
            let snapshot = ResourceRecord {
                lease: None,
                version: 0,
                created_at: now,
                ..record.clone()
            };
            inner
                .snapshots
                .insert((resource.container.clone(), blob, timestamp.clone()), snapshot);
            Ok(timestamp)
        })
    }

    fn get(
        &self,
        resource: &ResourceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResourceRecord>, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner.record(&resource).cloned())
        })
    }

    fn list_blobs(
        &self,
        container: &str,
    ) -> Pin<
        Box<dyn Future<Output = Result<Vec<(String, ResourceRecord)>, LeaseError>> + Send + '_>,
    > {
        let container = container.to_string();
        Box::pin(async move {
            let inner = self.inner.read().await;
            if !inner.containers.contains_key(&container) {
                return Err(not_found(ResourceKind::Container));
            }
            Ok(inner
                .blobs
                .iter()
                .filter(|((c, _), _)| *c == container)
                .map(|((_, name), record)| (name.clone(), record.clone()))
                .collect())
        })
    }

    fn load_lease(
        &self,
        resource: &ResourceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LeaseSnapshot>, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner.record(&resource).map(|record| LeaseSnapshot {
                lease: record.lease.clone(),
                version: record.version,
            }))
        })
    }

    fn store_lease(
        &self,
        resource: &ResourceRef,
        expected_version: u64,
        lease: Option<LeaseRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<CommitOutcome, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(async move {
            if resource.is_snapshot() {
                return Ok(CommitOutcome::NotFound);
            }
            let mut inner = self.inner.write().await;
            let Some(record) = inner.record_mut(&resource) else {
                return Ok(CommitOutcome::NotFound);
            };
            if record.version != expected_version {
                return Ok(CommitOutcome::Conflict);
            }
            record.lease = lease;
            record.version += 1;
            Ok(CommitOutcome::Committed)
        })
    }
}
