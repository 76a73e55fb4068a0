//! SQLite storage backend.
//!
//! Containers, blobs and snapshots share one `resources` table keyed by
//! `(container, blob, snapshot)`, with empty strings standing in for
//! "no blob" and "no snapshot".  The lease record is stored in nullable
//! columns next to the content, and lease commits are a single
//! `UPDATE ... WHERE version = ?` so a stale writer changes nothing.
//!
//! Because `rusqlite::Connection` is `!Sync`, it is wrapped in a
//! `std::sync::Mutex` behind an `Arc` and every database operation runs
//! in `tokio::task::spawn_blocking`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::backend::{
    content_etag, snapshot_timestamp, CommitOutcome, LeaseSnapshot, Metadata, ResourceKind,
    ResourceRecord, ResourceRef, StorageBackend,
};
use crate::errors::LeaseError;
use crate::lease::{admit_write, LeaseDuration, LeaseId, LeaseRecord};

const RECORD_COLUMNS: &str = "kind, content, etag, metadata, created_at, last_modified, \
     lease_id, lease_duration, lease_acquired_at, lease_expires_at, lease_break_until, version";

/// SQLite-backed resource storage.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a SQLite database at `db_path` and initialise
    /// the schema.
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA busy_timeout=5000;\
             PRAGMA synchronous=NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS resources (\
                 container          TEXT NOT NULL,\
                 blob               TEXT NOT NULL DEFAULT '',\
                 snapshot           TEXT NOT NULL DEFAULT '',\
                 kind               TEXT NOT NULL,\
                 content            BLOB NOT NULL,\
                 etag               TEXT NOT NULL,\
                 metadata           TEXT NOT NULL DEFAULT '{}',\
                 created_at         TEXT NOT NULL,\
                 last_modified      TEXT NOT NULL,\
                 lease_id           TEXT,\
                 lease_duration     INTEGER,\
                 lease_acquired_at  TEXT,\
                 lease_expires_at   TEXT,\
                 lease_break_until  TEXT,\
                 version            INTEGER NOT NULL DEFAULT 0,\
                 PRIMARY KEY (container, blob, snapshot)\
             );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, LeaseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, LeaseError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Mutex poisoned: {e}"))?;
            f(&mut conn)
        })
        .await
        .map_err(anyhow::Error::from)?
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

/// Primary key columns for a resource reference.
fn key(resource: &ResourceRef) -> (String, String, String) {
    (
        resource.container.clone(),
        resource.blob.clone().unwrap_or_default(),
        resource.snapshot.clone().unwrap_or_default(),
    )
}

fn db<T>(result: rusqlite::Result<T>) -> Result<T, LeaseError> {
    result.map_err(|e| LeaseError::InternalError(e.into()))
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(value: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

/// Columns as read from SQLite, before conversion.
struct StoredRow {
    kind: String,
    content: Vec<u8>,
    etag: String,
    metadata: String,
    created_at: String,
    last_modified: String,
    lease_id: Option<String>,
    lease_duration: Option<i64>,
    lease_acquired_at: Option<String>,
    lease_expires_at: Option<String>,
    lease_break_until: Option<String>,
    version: i64,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            kind: row.get(0)?,
            content: row.get(1)?,
            etag: row.get(2)?,
            metadata: row.get(3)?,
            created_at: row.get(4)?,
            last_modified: row.get(5)?,
            lease_id: row.get(6)?,
            lease_duration: row.get(7)?,
            lease_acquired_at: row.get(8)?,
            lease_expires_at: row.get(9)?,
            lease_break_until: row.get(10)?,
            version: row.get(11)?,
        })
    }

    fn lease(&self) -> anyhow::Result<Option<LeaseRecord>> {
        let (Some(id), Some(duration), Some(acquired_at)) = (
            self.lease_id.as_deref(),
            self.lease_duration,
            self.lease_acquired_at.as_deref(),
        ) else {
            return Ok(None);
        };
        Ok(Some(LeaseRecord {
            id: LeaseId::parse(id).map_err(|e| anyhow::anyhow!("stored lease id: {e}"))?,
            duration: LeaseDuration::from_secs(duration)
                .map_err(|e| anyhow::anyhow!("stored lease duration: {e}"))?,
            acquired_at: parse_ts(acquired_at)?,
            expires_at: self.lease_expires_at.as_deref().map(parse_ts).transpose()?,
            break_until: self.lease_break_until.as_deref().map(parse_ts).transpose()?,
        }))
    }

    fn into_record(self) -> anyhow::Result<ResourceRecord> {
        let lease = self.lease()?;
        let kind = match self.kind.as_str() {
            "container" => ResourceKind::Container,
            "blob" => ResourceKind::Blob,
            other => anyhow::bail!("unknown resource kind in database: {other}"),
        };
        Ok(ResourceRecord {
            kind,
            content: Bytes::from(self.content),
            etag: self.etag,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: parse_ts(&self.created_at)?,
            last_modified: parse_ts(&self.last_modified)?,
            lease,
            version: self.version as u64,
        })
    }
}

fn load_record(
    conn: &Connection,
    resource: &ResourceRef,
) -> Result<Option<ResourceRecord>, LeaseError> {
    let (container, blob, snapshot) = key(resource);
    let row = db(conn
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM resources \
                 WHERE container = ?1 AND blob = ?2 AND snapshot = ?3"
            ),
            params![container, blob, snapshot],
            StoredRow::from_row,
        )
        .optional())?;
    Ok(row.map(StoredRow::into_record).transpose()?)
}

fn insert_record(
    conn: &Connection,
    resource: &ResourceRef,
    record: &ResourceRecord,
) -> Result<(), LeaseError> {
    let (container, blob, snapshot) = key(resource);
    let metadata = serde_json::to_string(&record.metadata).map_err(anyhow::Error::from)?;
    db(conn.execute(
        "INSERT INTO resources \
             (container, blob, snapshot, kind, content, etag, metadata, created_at, last_modified, version) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            container,
            blob,
            snapshot,
            record.kind.as_str(),
            record.content.to_vec(),
            record.etag,
            metadata,
            ts(record.created_at),
            ts(record.last_modified),
            record.version as i64,
        ],
    ))?;
    Ok(())
}

fn read_only_snapshot() -> LeaseError {
    LeaseError::InvalidArgument {
        message: "Snapshots are read-only.".to_string(),
    }
}

// ── StorageBackend implementation ──────────────────────────────────

impl StorageBackend for SqliteBackend {
    fn create_container(
        &self,
        name: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
        let resource = ResourceRef::container(name);
        Box::pin(self.with_conn(move |conn| {
            let tx = db(conn.transaction_with_behavior(TransactionBehavior::Immediate))?;
            if load_record(&tx, &resource)?.is_some() {
                return Err(LeaseError::ResourceAlreadyExists {
                    kind: ResourceKind::Container,
                });
            }
            let record = ResourceRecord::new(ResourceKind::Container, Bytes::new(), metadata, now);
            insert_record(&tx, &resource, &record)?;
            db(tx.commit())
        }))
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
        Box::pin(self.with_conn(move |conn| {
            if resource.blob.is_none() {
                return Err(LeaseError::InvalidArgument {
                    message: "A blob name is required.".to_string(),
                });
            }
            if resource.is_snapshot() {
                return Err(read_only_snapshot());
            }

            let tx = db(conn.transaction_with_behavior(TransactionBehavior::Immediate))?;
            if load_record(&tx, &resource.parent_container())?.is_none() {
                return Err(LeaseError::ResourceNotFound {
                    kind: ResourceKind::Container,
                });
            }

            let etag = content_etag(&content);
            match load_record(&tx, &resource)? {
                Some(existing) => {
                    admit_write(
                        existing.lease.as_ref(),
                        lease_id.as_ref(),
                        ResourceKind::Blob,
                        now,
                    )?;
                    let (container, blob, snapshot) = key(&resource);
                    let metadata =
                        serde_json::to_string(&metadata).map_err(anyhow::Error::from)?;
                    db(tx.execute(
                        "UPDATE resources \
                         SET content = ?4, etag = ?5, metadata = ?6, last_modified = ?7, \
                             version = version + 1 \
                         WHERE container = ?1 AND blob = ?2 AND snapshot = ?3",
                        params![
                            container,
                            blob,
                            snapshot,
                            content.to_vec(),
                            etag,
                            metadata,
                            ts(now)
                        ],
                    ))?;
                }
                None => {
                    admit_write(
                        None,
                        lease_id.as_ref(),
                        ResourceKind::Blob,
                        now,
                    )?;
                    let record = ResourceRecord::new(ResourceKind::Blob, content, metadata, now);
                    insert_record(&tx, &resource, &record)?;
                }
            }
            db(tx.commit())?;
            Ok(etag)
        }))
    }

    fn set_metadata(
        &self,
        resource: &ResourceRef,
        metadata: Metadata,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(self.with_conn(move |conn| {
            if resource.is_snapshot() {
                return Err(read_only_snapshot());
            }
            let tx = db(conn.transaction_with_behavior(TransactionBehavior::Immediate))?;
            let record = load_record(&tx, &resource)?.ok_or(LeaseError::ResourceNotFound {
                kind: resource.kind(),
            })?;
            admit_write(
                record.lease.as_ref(),
                lease_id.as_ref(),
                resource.kind(),
                now,
            )?;
            let (container, blob, snapshot) = key(&resource);
            let metadata = serde_json::to_string(&metadata).map_err(anyhow::Error::from)?;
            db(tx.execute(
                "UPDATE resources \
                 SET metadata = ?4, last_modified = ?5, version = version + 1 \
                 WHERE container = ?1 AND blob = ?2 AND snapshot = ?3",
                params![container, blob, snapshot, metadata, ts(now)],
            ))?;
            db(tx.commit())
        }))
    }

    fn delete(
        &self,
        resource: &ResourceRef,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(self.with_conn(move |conn| {
            let tx = db(conn.transaction_with_behavior(TransactionBehavior::Immediate))?;
            let record = load_record(&tx, &resource)?.ok_or(LeaseError::ResourceNotFound {
                kind: resource.kind(),
            })?;
            if !resource.is_snapshot() {
                admit_write(
                    record.lease.as_ref(),
                    lease_id.as_ref(),
                    resource.kind(),
                    now,
                )?;
            }

            let (container, blob, snapshot) = key(&resource);
            match (&resource.blob, &resource.snapshot) {
                (None, _) => db(tx.execute(
                    "DELETE FROM resources WHERE container = ?1",
                    params![container],
                ))?,
                (Some(_), None) => db(tx.execute(
                    "DELETE FROM resources WHERE container = ?1 AND blob = ?2",
                    params![container, blob],
                ))?,
                (Some(_), Some(_)) => db(tx.execute(
                    "DELETE FROM resources WHERE container = ?1 AND blob = ?2 AND snapshot = ?3",
                    params![container, blob, snapshot],
                ))?,
            };
            db(tx.commit())
        }))
    }

    fn snapshot_blob(
        &self,
        resource: &ResourceRef,
        lease_id: Option<LeaseId>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<String, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(self.with_conn(move |conn| {
            let Some(blob) = resource.blob.clone() else {
                return Err(LeaseError::InvalidArgument {
                    message: "Only blobs can be snapshotted.".to_string(),
                });
            };
            if resource.is_snapshot() {
                return Err(read_only_snapshot());
            }

            let tx = db(conn.transaction_with_behavior(TransactionBehavior::Immediate))?;
            let record = load_record(&tx, &resource)?.ok_or(LeaseError::ResourceNotFound {
                kind: ResourceKind::Blob,
            })?;
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
                ..record
            };
            let target = ResourceRef::blob(resource.container.clone(), blob)
                .with_snapshot(timestamp.clone());
            insert_record(&tx, &target, &snapshot)?;
            db(tx.commit())?;
            Ok(timestamp)
        }))
    }

    fn get(
        &self,
        resource: &ResourceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResourceRecord>, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(self.with_conn(move |conn| load_record(conn, &resource)))
    }

    fn list_blobs(
        &self,
        container: &str,
    ) -> Pin<
        Box<dyn Future<Output = Result<Vec<(String, ResourceRecord)>, LeaseError>> + Send + '_>,
    > {
        let container = container.to_string();
        Box::pin(self.with_conn(move |conn| {
            if load_record(conn, &ResourceRef::container(container.clone()))?.is_none() {
                return Err(LeaseError::ResourceNotFound {
                    kind: ResourceKind::Container,
                });
            }
            let mut stmt = db(conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS}, blob FROM resources \
                 WHERE container = ?1 AND blob != '' AND snapshot = '' \
                 ORDER BY blob"
            )))?;
            let rows = db(stmt
                .query_map(params![container], |row| {
                    let name: String = row.get(12)?;
                    Ok((name, StoredRow::from_row(row)?))
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>()))?;

            rows.into_iter()
                .map(|(name, stored)| -> Result<_, LeaseError> {
                    Ok((name, stored.into_record()?))
                })
                .collect()
        }))
    }

    fn load_lease(
        &self,
        resource: &ResourceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LeaseSnapshot>, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(self.with_conn(move |conn| {
            Ok(load_record(conn, &resource)?.map(|record| LeaseSnapshot {
                lease: record.lease,
                version: record.version,
            }))
        }))
    }

    fn store_lease(
        &self,
        resource: &ResourceRef,
        expected_version: u64,
        lease: Option<LeaseRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<CommitOutcome, LeaseError>> + Send + '_>> {
        let resource = resource.clone();
        Box::pin(self.with_conn(move |conn| {
            if resource.is_snapshot() {
                return Ok(CommitOutcome::NotFound);
            }
            let (container, blob, snapshot) = key(&resource);
            let changed = db(conn.execute(
                "UPDATE resources \
                 SET lease_id = ?5, lease_duration = ?6, lease_acquired_at = ?7, \
                     lease_expires_at = ?8, lease_break_until = ?9, version = version + 1 \
                 WHERE container = ?1 AND blob = ?2 AND snapshot = ?3 AND version = ?4",
                params![
                    container,
                    blob,
                    snapshot,
                    expected_version as i64,
                    lease.as_ref().map(|l| l.id.to_string()),
                    lease.as_ref().map(|l| l.duration.as_secs()),
                    lease.as_ref().map(|l| ts(l.acquired_at)),
                    lease.as_ref().and_then(|l| l.expires_at).map(ts),
                    lease.as_ref().and_then(|l| l.break_until).map(ts),
                ],
            ))?;
            if changed == 1 {
                return Ok(CommitOutcome::Committed);
            }

            let exists = db(conn
                .query_row(
                    "SELECT 1 FROM resources WHERE container = ?1 AND blob = ?2 AND snapshot = ?3",
                    params![container, blob, snapshot],
                    |_| Ok(()),
                )
                .optional())?;
            Ok(if exists.is_some() {
                CommitOutcome::Conflict
            } else {
                CommitOutcome::NotFound
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn test_backend() -> (TempDir, SqliteBackend) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leasehold.db");
        let backend = SqliteBackend::new(path.to_str().unwrap()).unwrap();
        (dir, backend)
    }

    async fn seeded() -> (TempDir, SqliteBackend, ResourceRef) {
        let (dir, backend) = test_backend();
        backend
            .create_container("docs", Metadata::new(), t0())
            .await
            .unwrap();
        let blob = ResourceRef::blob("docs", "a.txt");
        backend
            .put_blob(&blob, Bytes::from("hello"), Metadata::new(), None, t0())
            .await
            .unwrap();
        (dir, backend, blob)
    }

    #[tokio::test]
    async fn test_create_container_twice_fails() {
        let (_dir, backend) = test_backend();
        backend
            .create_container("c", Metadata::new(), t0())
            .await
            .unwrap();
        let err = backend
            .create_container("c", Metadata::new(), t0())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ResourceAlreadyExists");
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrips_metadata() {
        let (_dir, backend) = test_backend();
        backend
            .create_container("docs", Metadata::new(), t0())
            .await
            .unwrap();
        let blob = ResourceRef::blob("docs", "a.txt");
        let mut metadata = Metadata::new();
        metadata.insert("owner".to_string(), "ops".to_string());
        backend
            .put_blob(&blob, Bytes::from("hello"), metadata, None, t0())
            .await
            .unwrap();

        let record = backend.get(&blob).await.unwrap().unwrap();
        assert_eq!(record.content, Bytes::from("hello"));
        assert_eq!(record.metadata.get("owner").map(String::as_str), Some("ops"));
        assert_eq!(record.created_at, t0());
        assert!(record.lease.is_none());
    }

    #[tokio::test]
    async fn test_lease_record_persists() {
        let (dir, backend, blob) = seeded().await;
        let snapshot = backend.load_lease(&blob).await.unwrap().unwrap();
        let mut record = LeaseRecord::acquired(LeaseId::generate(), LeaseDuration::Fixed(30), t0());
        record.break_until = Some(t0() + Duration::seconds(10));
        let outcome = backend
            .store_lease(&blob, snapshot.version, Some(record.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
        drop(backend);

        let path = dir.path().join("leasehold.db");
        let reopened = SqliteBackend::new(path.to_str().unwrap()).unwrap();
        let loaded = reopened.load_lease(&blob).await.unwrap().unwrap();
        assert_eq!(loaded.lease, Some(record));
        assert_eq!(loaded.version, snapshot.version + 1);
    }

    #[tokio::test]
    async fn test_store_lease_stale_version_conflicts() {
        let (_dir, backend, blob) = seeded().await;
        let snapshot = backend.load_lease(&blob).await.unwrap().unwrap();
        let first = LeaseRecord::acquired(LeaseId::generate(), LeaseDuration::Infinite, t0());
        let second = LeaseRecord::acquired(LeaseId::generate(), LeaseDuration::Infinite, t0());

        let a = backend
            .store_lease(&blob, snapshot.version, Some(first.clone()))
            .await
            .unwrap();
        let b = backend
            .store_lease(&blob, snapshot.version, Some(second))
            .await
            .unwrap();
        assert_eq!(a, CommitOutcome::Committed);
        assert_eq!(b, CommitOutcome::Conflict);

        let loaded = backend.load_lease(&blob).await.unwrap().unwrap();
        assert_eq!(loaded.lease.unwrap().id, first.id);

        let missing = backend
            .store_lease(&ResourceRef::blob("docs", "nope"), 0, None)
            .await
            .unwrap();
        assert_eq!(missing, CommitOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_leased_writes_need_matching_id() {
        let (_dir, backend, blob) = seeded().await;
        let snapshot = backend.load_lease(&blob).await.unwrap().unwrap();
        let record = LeaseRecord::acquired(LeaseId::generate(), LeaseDuration::Infinite, t0());
        let id = record.id.clone();
        backend
            .store_lease(&blob, snapshot.version, Some(record))
            .await
            .unwrap();

        let err = backend
            .delete(&blob, None, t0())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LeaseIdMissing");
        let err = backend
            .set_metadata(&blob, Metadata::new(), Some(LeaseId::generate()), t0())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LeaseIdMismatch");

        backend.delete(&blob, Some(id), t0()).await.unwrap();
        assert!(backend.get(&blob).await.unwrap().is_none());

        let container = ResourceRef::container("docs");
        let snapshot = backend.load_lease(&container).await.unwrap().unwrap();
        let record = LeaseRecord::acquired(LeaseId::generate(), LeaseDuration::Infinite, t0());
        let id = record.id.clone();
        backend
            .store_lease(&container, snapshot.version, Some(record))
            .await
            .unwrap();
        let err = backend
            .set_metadata(&container, Metadata::new(), None, t0())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LeaseIdMissing");
        backend
            .set_metadata(&container, Metadata::new(), Some(id), t0())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_and_list() {
        let (_dir, backend, blob) = seeded().await;
        let ts = backend.snapshot_blob(&blob, None, t0()).await.unwrap();
        backend
            .put_blob(
                &ResourceRef::blob("docs", "0.txt"),
                Bytes::new(),
                Metadata::new(),
                None,
                t0(),
            )
            .await
            .unwrap();

        let names: Vec<String> = backend
            .list_blobs("docs")
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["0.txt", "a.txt"]);

        let snap = backend
            .get(&blob.clone().with_snapshot(ts))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snap.content, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_delete_container_cascades() {
        let (_dir, backend, blob) = seeded().await;
        backend
            .delete(&ResourceRef::container("docs"), None, t0())
            .await
            .unwrap();
        assert!(backend.get(&blob).await.unwrap().is_none());
        assert!(backend.list_blobs("docs").await.is_err());
    }
}
