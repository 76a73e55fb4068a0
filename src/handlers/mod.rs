//! HTTP handlers for the container, blob and lease endpoints.
//!
//! Handlers are plain async functions called from the dispatchers in
//! [`crate::server`] once the route and query have been resolved.  They
//! take the shared [`crate::AppState`], the request credential and the
//! decoded request parts, and return `Result<Response, LeaseError>`.

pub mod blob;
pub mod container;
pub mod lease;

use std::time::SystemTime;

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};

use crate::auth::{self, Credential, Permission};
use crate::errors::LeaseError;
use crate::lease::{LeaseId, LeaseProperties};
use crate::storage::backend::{Metadata, ResourceRecord, ResourceRef};
use crate::AppState;

/// Prefix of user metadata headers.
pub const META_PREFIX: &str = "x-ms-meta-";

// -- Request helpers ----------------------------------------------------------

/// Check `credential` against `resource` using the manager's clock.
pub(crate) fn authorize(
    state: &AppState,
    credential: &Credential,
    resource: &ResourceRef,
    required: Permission,
) -> Result<(), LeaseError> {
    auth::authorize(credential, resource, required, state.leases.clock().now())
}

/// Read a header as a string, ignoring values that are not visible ASCII.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Read an integer header such as `x-ms-lease-duration`.
pub(crate) fn header_i64(headers: &HeaderMap, name: &str) -> Result<Option<i64>, LeaseError> {
    match header_str(headers, name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LeaseError::InvalidArgument {
                message: format!("The value '{raw}' of header {name} is not a valid integer."),
            }),
    }
}

/// Parse the `x-ms-lease-id` header presented with a write.
pub(crate) fn lease_id_header(headers: &HeaderMap) -> Result<Option<LeaseId>, LeaseError> {
    header_str(headers, "x-ms-lease-id")
        .map(LeaseId::parse)
        .transpose()
}

/// Extract user metadata from `x-ms-meta-*` headers.  Keys are stored
/// lowercased and without the prefix.
pub(crate) fn extract_user_metadata(headers: &HeaderMap) -> Metadata {
    let mut meta = Metadata::new();
    for (name, value) in headers.iter() {
        if let Some(key) = name.as_str().strip_prefix(META_PREFIX) {
            if let Ok(val) = value.to_str() {
                meta.insert(key.to_string(), val.to_string());
            }
        }
    }
    meta
}

// -- Response helpers ---------------------------------------------------------

/// Format a timestamp as an RFC 7231 HTTP date.
pub(crate) fn http_date(at: DateTime<Utc>) -> String {
    httpdate::fmt_http_date(SystemTime::from(at))
}

/// Insert a header, skipping values that cannot be encoded.
pub(crate) fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(val) = HeaderValue::from_str(value) {
        headers.insert(name, val);
    }
}

/// Add `x-ms-lease-state`, `x-ms-lease-status` and, while locked,
/// `x-ms-lease-duration`.
pub(crate) fn insert_lease_headers(headers: &mut HeaderMap, props: &LeaseProperties) {
    headers.insert(
        "x-ms-lease-state",
        HeaderValue::from_static(props.state.as_str()),
    );
    headers.insert(
        "x-ms-lease-status",
        HeaderValue::from_static(props.status.as_str()),
    );
    if let Some(duration) = props.duration {
        headers.insert(
            "x-ms-lease-duration",
            HeaderValue::from_static(duration.kind_str()),
        );
    }
}

/// Add the ETag, Last-Modified and user metadata of a stored record.
pub(crate) fn insert_record_headers(headers: &mut HeaderMap, record: &ResourceRecord) {
    insert_header(headers, "etag", &record.etag);
    insert_header(headers, "last-modified", &http_date(record.last_modified));
    for (key, value) in &record.metadata {
        let name = format!("{META_PREFIX}{key}");
        if let (Ok(name), Ok(val)) = (
            axum::http::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, val);
        }
    }
}

/// Load a resource together with its lease properties.  Requires read
/// permission.
pub(crate) async fn describe(
    state: &AppState,
    credential: &Credential,
    resource: &ResourceRef,
) -> Result<(ResourceRecord, LeaseProperties), LeaseError> {
    let props = state.leases.properties(credential, resource).await?;
    let record = state
        .leases
        .backend()
        .get(resource)
        .await?
        .ok_or(LeaseError::ResourceNotFound {
            kind: resource.kind(),
        })?;
    Ok((record, props))
}
