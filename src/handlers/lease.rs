//! Lease endpoint: `comp=lease` on a container or blob.
//!
//! The action comes from `x-ms-lease-action`.  Acquire, renew and change
//! answer with `x-ms-lease-id`; break answers with `x-ms-lease-time`.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use super::{authorize, header_i64, header_str, insert_header};
use crate::auth::{Credential, Permission};
use crate::errors::LeaseError;
use crate::storage::backend::ResourceRef;
use crate::AppState;

/// Parsed `x-ms-lease-action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    Acquire,
    Renew,
    Change,
    Release,
    Break,
}

impl LeaseAction {
    pub fn parse(value: &str) -> Result<Self, LeaseError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "acquire" => Ok(LeaseAction::Acquire),
            "renew" => Ok(LeaseAction::Renew),
            "change" => Ok(LeaseAction::Change),
            "release" => Ok(LeaseAction::Release),
            "break" => Ok(LeaseAction::Break),
            _ => Err(LeaseError::InvalidArgument {
                message: format!("The lease action '{value}' is not valid."),
            }),
        }
    }
}

/// `PUT /{container}?restype=container&comp=lease` and
/// `PUT /{container}/{blob}?comp=lease` -- Run a lease operation.
#[utoipa::path(
    put,
    path = "/{container}/{blob}?comp=lease",
    tag = "Lease",
    operation_id = "Lease",
    params(
        ("container" = String, Path, description = "Container name"),
        ("blob" = String, Path, description = "Blob name (omit for a container lease)"),
        ("x-ms-lease-action" = String, Header, description = "acquire, renew, change, release or break"),
        ("x-ms-lease-id" = Option<String>, Header, description = "Current lease ID"),
        ("x-ms-proposed-lease-id" = Option<String>, Header, description = "Proposed lease ID"),
        ("x-ms-lease-duration" = Option<i64>, Header, description = "-1 or 15..=60 seconds"),
        ("x-ms-lease-break-period" = Option<i64>, Header, description = "0..=60 seconds")
    ),
    responses(
        (status = 200, description = "Lease renewed, changed or released"),
        (status = 201, description = "Lease acquired"),
        (status = 202, description = "Lease broken"),
        (status = 400, description = "Invalid lease ID, duration or break period"),
        (status = 403, description = "Not authorized"),
        (status = 409, description = "Lease conflict")
    )
)]
pub async fn lease(
    state: Arc<AppState>,
    credential: &Credential,
    resource: &ResourceRef,
    headers: &HeaderMap,
) -> Result<Response, LeaseError> {
    // Every lease action needs write; check it before any header is
    // parsed so a caller without rights only ever sees AuthorizationFailed.
    authorize(&state, credential, resource, Permission::Write)?;

    let action = header_str(headers, "x-ms-lease-action")
        .ok_or_else(|| LeaseError::InvalidArgument {
            message: "The required header x-ms-lease-action is missing.".to_string(),
        })
        .and_then(LeaseAction::parse)?;
    // Missing IDs reach the manager as empty strings and fail there as
    // InvalidLeaseId.
    let lease_id = header_str(headers, "x-ms-lease-id").unwrap_or("");
    let proposed = header_str(headers, "x-ms-proposed-lease-id");
    let leases = &state.leases;

    let (status, id, time) = match action {
        LeaseAction::Acquire => {
            let duration = header_i64(headers, "x-ms-lease-duration")?;
            let grant = leases
                .acquire(credential, resource, proposed, duration)
                .await?;
            (StatusCode::CREATED, Some(grant.lease_id), None)
        }
        LeaseAction::Renew => {
            let grant = leases.renew(credential, resource, lease_id).await?;
            (StatusCode::OK, Some(grant.lease_id), None)
        }
        LeaseAction::Change => {
            let grant = leases
                .change(credential, resource, lease_id, proposed.unwrap_or(""))
                .await?;
            (StatusCode::OK, Some(grant.lease_id), None)
        }
        LeaseAction::Release => {
            leases.release(credential, resource, lease_id).await?;
            (StatusCode::OK, None, None)
        }
        LeaseAction::Break => {
            let period = header_i64(headers, "x-ms-lease-break-period")?;
            let outcome = leases.break_lease(credential, resource, period).await?;
            (StatusCode::ACCEPTED, None, Some(outcome.remaining_secs))
        }
    };

    let mut response = status.into_response();
    let hdrs = response.headers_mut();
    if let Some(id) = id {
        insert_header(hdrs, "x-ms-lease-id", id.as_str());
    }
    if let Some(secs) = time {
        insert_header(hdrs, "x-ms-lease-time", &secs.to_string());
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lease_action() {
        assert_eq!(LeaseAction::parse("acquire").unwrap(), LeaseAction::Acquire);
        assert_eq!(LeaseAction::parse("Break").unwrap(), LeaseAction::Break);
        assert_eq!(LeaseAction::parse(" release ").unwrap(), LeaseAction::Release);
        assert_eq!(LeaseAction::parse("steal").unwrap_err().code(), "InvalidArgument");
    }
}
