//! Container-level handlers.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::info;

use super::{
    authorize, describe, extract_user_metadata, http_date, insert_lease_headers,
    insert_record_headers, lease_id_header,
};
use crate::auth::{Credential, Permission};
use crate::errors::LeaseError;
use crate::lease::LeaseProperties;
use crate::storage::backend::ResourceRef;
use crate::xml::{self, BlobListing};
use crate::AppState;

// -- Name validation ----------------------------------------------------------

/// Validate a container name: 3-63 characters of lowercase letters,
/// digits and single hyphens, starting and ending with a letter or digit.
pub fn validate_container_name(name: &str) -> Result<(), LeaseError> {
    let invalid = || LeaseError::InvalidArgument {
        message: format!("The specified container name '{name}' is not valid."),
    };

    if !(3..=63).contains(&name.len()) {
        return Err(invalid());
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
    {
        return Err(invalid());
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(invalid());
    }
    Ok(())
}

// -- Handlers -----------------------------------------------------------------

/// `PUT /{container}?restype=container` -- Create a container.
#[utoipa::path(
    put,
    path = "/{container}",
    tag = "Container",
    operation_id = "CreateContainer",
    params(("container" = String, Path, description = "Container name")),
    responses(
        (status = 201, description = "Container created"),
        (status = 400, description = "Invalid container name"),
        (status = 403, description = "Not authorized"),
        (status = 409, description = "Container already exists")
    )
)]
pub async fn create_container(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    headers: &HeaderMap,
) -> Result<Response, LeaseError> {
    let resource = ResourceRef::container(container);
    authorize(&state, credential, &resource, Permission::Create)?;
    validate_container_name(container)?;

    let now = state.leases.clock().now();
    state
        .leases
        .backend()
        .create_container(container, extract_user_metadata(headers), now)
        .await?;
    info!("Created container {}", container);

    let mut response = StatusCode::CREATED.into_response();
    super::insert_header(response.headers_mut(), "last-modified", &http_date(now));
    Ok(response)
}

/// `DELETE /{container}?restype=container` -- Delete a container and its
/// blobs.  A locked container needs its lease ID.
#[utoipa::path(
    delete,
    path = "/{container}",
    tag = "Container",
    operation_id = "DeleteContainer",
    params(("container" = String, Path, description = "Container name")),
    responses(
        (status = 202, description = "Container deleted"),
        (status = 404, description = "Container not found"),
        (status = 409, description = "Lease ID mismatch"),
        (status = 412, description = "Container is leased and no lease ID was given")
    )
)]
pub async fn delete_container(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    headers: &HeaderMap,
) -> Result<Response, LeaseError> {
    let resource = ResourceRef::container(container);
    authorize(&state, credential, &resource, Permission::Delete)?;
    let lease_id = lease_id_header(headers)?;

    let now = state.leases.clock().now();
    state.leases.backend().delete(&resource, lease_id, now).await?;
    info!("Deleted container {}", container);

    Ok(StatusCode::ACCEPTED.into_response())
}

/// `PUT /{container}?restype=container&comp=metadata` -- Replace the
/// container's user metadata.  A locked container needs its lease ID.
#[utoipa::path(
    put,
    path = "/{container}?restype=container&comp=metadata",
    tag = "Container",
    operation_id = "SetContainerMetadata",
    params(("container" = String, Path, description = "Container name")),
    responses(
        (status = 200, description = "Metadata replaced"),
        (status = 404, description = "Container not found"),
        (status = 409, description = "Lease ID mismatch"),
        (status = 412, description = "Container is leased and no lease ID was given")
    )
)]
pub async fn set_container_metadata(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
    headers: &HeaderMap,
) -> Result<Response, LeaseError> {
    let resource = ResourceRef::container(container);
    authorize(&state, credential, &resource, Permission::Write)?;
    let lease_id = lease_id_header(headers)?;

    let now = state.leases.clock().now();
    state
        .leases
        .backend()
        .set_metadata(&resource, extract_user_metadata(headers), lease_id, now)
        .await?;

    let mut response = StatusCode::OK.into_response();
    super::insert_header(response.headers_mut(), "last-modified", &http_date(now));
    Ok(response)
}

/// `HEAD /{container}?restype=container` -- Container properties,
/// including lease state.
#[utoipa::path(
    head,
    path = "/{container}",
    tag = "Container",
    operation_id = "GetContainerProperties",
    params(("container" = String, Path, description = "Container name")),
    responses(
        (status = 200, description = "Container exists"),
        (status = 404, description = "Container not found")
    )
)]
pub async fn container_properties(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
) -> Result<Response, LeaseError> {
    let resource = ResourceRef::container(container);
    let (record, props) = describe(&state, credential, &resource).await?;

    let mut response = StatusCode::OK.into_response();
    let hdrs = response.headers_mut();
    insert_record_headers(hdrs, &record);
    insert_lease_headers(hdrs, &props);
    Ok(response)
}

/// `GET /{container}?restype=container&comp=list` -- List the blobs in a
/// container with their lease state.
#[utoipa::path(
    get,
    path = "/{container}?restype=container&comp=list",
    tag = "Container",
    operation_id = "ListBlobs",
    params(("container" = String, Path, description = "Container name")),
    responses(
        (status = 200, description = "Blob listing"),
        (status = 404, description = "Container not found")
    )
)]
pub async fn list_blobs(
    state: Arc<AppState>,
    credential: &Credential,
    container: &str,
) -> Result<Response, LeaseError> {
    let resource = ResourceRef::container(container);
    authorize(&state, credential, &resource, Permission::List)?;

    let now = state.leases.clock().now();
    let blobs = state.leases.backend().list_blobs(container).await?;

    // Owned strings first; the listing borrows from them.
    let rows: Vec<(String, LeaseProperties)> = blobs
        .iter()
        .map(|(_, record)| {
            (
                http_date(record.last_modified),
                LeaseProperties::of(record.lease.as_ref(), now),
            )
        })
        .collect();
    let listing: Vec<BlobListing<'_>> = blobs
        .iter()
        .zip(rows.iter())
        .map(|((name, record), (last_modified, props))| BlobListing {
            name,
            etag: &record.etag,
            content_length: record.content.len() as u64,
            last_modified,
            lease_status: props.status.as_str(),
            lease_state: props.state.as_str(),
            lease_duration: props.duration.map(|d| d.kind_str()),
        })
        .collect();

    let body = xml::render_blob_list(container, &listing);
    Ok((
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_container_names() {
        assert!(validate_container_name("photos").is_ok());
        assert!(validate_container_name("logs-2026").is_ok());
        assert!(validate_container_name("abc").is_ok());
    }

    #[test]
    fn test_invalid_container_names() {
        assert!(validate_container_name("ab").is_err());
        assert!(validate_container_name(&"a".repeat(64)).is_err());
        assert!(validate_container_name("Photos").is_err());
        assert!(validate_container_name("-photos").is_err());
        assert!(validate_container_name("photos-").is_err());
        assert!(validate_container_name("pho--tos").is_err());
        assert!(validate_container_name("pho.tos").is_err());
    }
}
