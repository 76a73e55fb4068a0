//! Blob-level handlers.
//!
//! Writes to a leased blob must present the lease ID in `x-ms-lease-id`;
//! the backend rejects them otherwise.  Snapshots are addressed with the
//! `snapshot` query parameter and are read-only.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use metrics::counter;
use tracing::{debug, info};

use super::{
    authorize, describe, extract_user_metadata, http_date, insert_header, insert_lease_headers,
    insert_record_headers, lease_id_header,
};
use crate::auth::{Credential, Permission};
use crate::errors::LeaseError;
use crate::metrics::BYTES_RECEIVED_TOTAL;
use crate::storage::backend::ResourceRef;
use crate::AppState;

/// Maximum blob name length in characters.
const MAX_BLOB_NAME_LEN: usize = 1024;

fn blob_ref(container: &str, blob: &str, snapshot: Option<&str>) -> ResourceRef {
    let resource = ResourceRef::blob(container, blob);
    match snapshot {
        Some(snapshot) => resource.with_snapshot(snapshot),
        None => resource,
    }
}

/// `PUT /{container}/{blob}` -- Create or overwrite a block blob.
#[utoipa::path(
    put,
    path = "/{container}/{blob}",
    tag = "Blob",
    operation_id = "PutBlob",
    params(
        ("container" = String, Path, description = "Container name"),
        ("blob" = String, Path, description = "Blob name")
    ),
    responses(
        (status = 201, description = "Blob written"),
        (status = 404, description = "Container not found"),
        (status = 412, description = "Blob is leased and no lease ID was given"),
        (status = 413, description = "Blob too large")
    )
)]
pub async fn put_blob(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    blob: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, LeaseError> {
    let resource = ResourceRef::blob(container, blob);
    authorize(&state, credential, &resource, Permission::Write)?;

    if blob.chars().count() > MAX_BLOB_NAME_LEN {
        return Err(LeaseError::InvalidArgument {
            message: "The specified blob name is too long.".to_string(),
        });
    }
    let limit = state.config.server.max_blob_size;
    if body.len() as u64 > limit {
        return Err(LeaseError::RequestBodyTooLarge { limit });
    }
    let lease_id = lease_id_header(headers)?;

    let size = body.len() as u64;
    let now = state.leases.clock().now();
    let etag = state
        .leases
        .backend()
        .put_blob(
            &resource,
            Bytes::copy_from_slice(body),
            extract_user_metadata(headers),
            lease_id,
            now,
        )
        .await?;
    counter!(BYTES_RECEIVED_TOTAL).increment(size);
    debug!("Put blob {} ({} bytes)", resource, size);

    let mut response = StatusCode::CREATED.into_response();
    let hdrs = response.headers_mut();
    insert_header(hdrs, "etag", &etag);
    insert_header(hdrs, "last-modified", &http_date(now));
    Ok(response)
}

/// `GET /{container}/{blob}` -- Download a blob or snapshot.
#[utoipa::path(
    get,
    path = "/{container}/{blob}",
    tag = "Blob",
    operation_id = "GetBlob",
    params(
        ("container" = String, Path, description = "Container name"),
        ("blob" = String, Path, description = "Blob name")
    ),
    responses(
        (status = 200, description = "Blob content"),
        (status = 404, description = "Blob not found")
    )
)]
pub async fn get_blob(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    blob: &str,
    snapshot: Option<&str>,
) -> Result<Response, LeaseError> {
    let resource = blob_ref(container, blob, snapshot);
    let (record, props) = describe(&state, credential, &resource).await?;

    let mut response = (StatusCode::OK, record.content.clone()).into_response();
    let hdrs = response.headers_mut();
    hdrs.insert(
        "content-type",
        HeaderValue::from_static("application/octet-stream"),
    );
    insert_record_headers(hdrs, &record);
    insert_lease_headers(hdrs, &props);
    Ok(response)
}

/// `HEAD /{container}/{blob}` -- Blob properties, including lease state.
#[utoipa::path(
    head,
    path = "/{container}/{blob}",
    tag = "Blob",
    operation_id = "GetBlobProperties",
    params(
        ("container" = String, Path, description = "Container name"),
        ("blob" = String, Path, description = "Blob name")
    ),
    responses(
        (status = 200, description = "Blob exists"),
        (status = 404, description = "Blob not found")
    )
)]
pub async fn blob_properties(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    blob: &str,
    snapshot: Option<&str>,
) -> Result<Response, LeaseError> {
    let resource = blob_ref(container, blob, snapshot);
    let (record, props) = describe(&state, credential, &resource).await?;

    let mut response = StatusCode::OK.into_response();
    let hdrs = response.headers_mut();
    insert_header(hdrs, "content-length", &record.content.len().to_string());
    insert_record_headers(hdrs, &record);
    insert_lease_headers(hdrs, &props);
    Ok(response)
}

/// `DELETE /{container}/{blob}` -- Delete a blob with its snapshots, or a
/// single snapshot.
#[utoipa::path(
    delete,
    path = "/{container}/{blob}",
    tag = "Blob",
    operation_id = "DeleteBlob",
    params(
        ("container" = String, Path, description = "Container name"),
        ("blob" = String, Path, description = "Blob name")
    ),
    responses(
        (status = 202, description = "Blob deleted"),
        (status = 404, description = "Blob not found"),
        (status = 412, description = "Blob is leased and no lease ID was given")
    )
)]
pub async fn delete_blob(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    blob: &str,
    snapshot: Option<&str>,
    headers: &HeaderMap,
) -> Result<Response, LeaseError> {
    let resource = blob_ref(container, blob, snapshot);
    authorize(&state, credential, &resource, Permission::Delete)?;
    let lease_id = lease_id_header(headers)?;

    let now = state.leases.clock().now();
    state.leases.backend().delete(&resource, lease_id, now).await?;
    info!("Deleted blob {}", resource);

    Ok(StatusCode::ACCEPTED.into_response())
}

/// `PUT /{container}/{blob}?comp=metadata` -- Replace the blob's user
/// metadata.
#[utoipa::path(
    put,
    path = "/{container}/{blob}?comp=metadata",
    tag = "Blob",
    operation_id = "SetBlobMetadata",
    params(
        ("container" = String, Path, description = "Container name"),
        ("blob" = String, Path, description = "Blob name")
    ),
    responses(
        (status = 200, description = "Metadata replaced"),
        (status = 404, description = "Blob not found"),
        (status = 412, description = "Blob is leased and no lease ID was given")
    )
)]
pub async fn set_blob_metadata(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    blob: &str,
    headers: &HeaderMap,
) -> Result<Response, LeaseError> {
    let resource = ResourceRef::blob(container, blob);
    authorize(&state, credential, &resource, Permission::Write)?;
    let lease_id = lease_id_header(headers)?;

    let now = state.leases.clock().now();
    state
        .leases
        .backend()
        .set_metadata(&resource, extract_user_metadata(headers), lease_id, now)
        .await?;

    let mut response = StatusCode::OK.into_response();
    insert_header(response.headers_mut(), "last-modified", &http_date(now));
    Ok(response)
}

/// `PUT /{container}/{blob}?comp=snapshot` -- Take a read-only snapshot.
#[utoipa::path(
    put,
    path = "/{container}/{blob}?comp=snapshot",
    tag = "Blob",
    operation_id = "SnapshotBlob",
    params(
        ("container" = String, Path, description = "Container name"),
        ("blob" = String, Path, description = "Blob name")
    ),
    responses(
        (status = 201, description = "Snapshot created"),
        (status = 404, description = "Blob not found"),
        (status = 409, description = "Lease ID mismatch")
    )
)]
pub async fn snapshot_blob(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    blob: &str,
    headers: &HeaderMap,
) -> Result<Response, LeaseError> {
    let resource = ResourceRef::blob(container, blob);
    authorize(&state, credential, &resource, Permission::Create)?;
    let lease_id = lease_id_header(headers)?;

    let now = state.leases.clock().now();
    let snapshot = state
        .leases
        .backend()
        .snapshot_blob(&resource, lease_id, now)
        .await?;
    info!("Snapshot {} of {}", snapshot, resource);

    let mut response = StatusCode::CREATED.into_response();
    let hdrs = response.headers_mut();
    insert_header(hdrs, "x-ms-snapshot", &snapshot);
    insert_header(hdrs, "last-modified", &http_date(now));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_ref_snapshot() {
        let plain = blob_ref("c", "b", None);
        assert!(!plain.is_snapshot());

        let snap = blob_ref("c", "b", Some("2026-01-01T00:00:00.0000000Z"));
        assert!(snap.is_snapshot());
        assert_eq!(snap.blob.as_deref(), Some("b"));
    }
}
