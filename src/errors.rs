//! Lease error types.
//!
//! Every variant maps to a stable error code and message.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(LeaseError::LeaseAlreadyPresent)`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::storage::backend::ResourceKind;
use crate::xml::render_error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Lease and resource errors surfaced to callers.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The target container or blob does not exist.
    #[error("The specified {kind} does not exist.")]
    ResourceNotFound { kind: ResourceKind },

    /// The container or blob being created already exists.
    #[error("The specified {kind} already exists.")]
    ResourceAlreadyExists { kind: ResourceKind },

    /// A supplied or proposed lease ID is not a well-formed token.
    #[error("The lease ID '{id}' is not in the correct format.")]
    InvalidLeaseId { id: String },

    /// Duration outside {-1} and [15, 60].
    #[error("The lease duration must be -1 (infinite) or between 15 and 60 seconds.")]
    InvalidLeaseDuration { value: i64 },

    /// Break period outside [0, 60].
    #[error("The break period must be between 0 and 60 seconds.")]
    InvalidLeaseBreakPeriod { value: i64 },

    /// Acquire attempted while another lease is held or breaking.
    #[error("There is already a lease present.")]
    LeaseAlreadyPresent,

    /// Renew, change, release or break on a resource without a lease.
    #[error("There is currently no lease on the {kind}.")]
    NoActiveLease { kind: ResourceKind },

    /// The presented lease ID is not the active one.
    #[error("The lease ID specified did not match the lease ID for the {kind}.")]
    LeaseIdMismatch { kind: ResourceKind },

    /// A write was attempted on a locked resource without a lease ID.
    #[error("There is currently a lease on the {kind} and no lease ID was specified in the request.")]
    LeaseIdMissing { kind: ResourceKind },

    /// Lease operations cannot target a blob snapshot.
    #[error("Snapshots cannot be leased.")]
    SnapshotNotLeasable,

    /// The credential lacks the scope or permission for the operation.
    #[error("This request is not authorized to perform this operation.")]
    AuthorizationFailed { reason: String },

    /// The request body exceeds the configured blob size limit.
    #[error("The request body is too large and exceeds the maximum permissible limit of {limit} bytes.")]
    RequestBodyTooLarge { limit: u64 },

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl LeaseError {
    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            LeaseError::ResourceNotFound { .. } => "ResourceNotFound",
            LeaseError::ResourceAlreadyExists { .. } => "ResourceAlreadyExists",
            LeaseError::InvalidLeaseId { .. } => "InvalidLeaseId",
            LeaseError::InvalidLeaseDuration { .. } => "InvalidLeaseDuration",
            LeaseError::InvalidLeaseBreakPeriod { .. } => "InvalidLeaseBreakPeriod",
            LeaseError::LeaseAlreadyPresent => "LeaseAlreadyPresent",
            LeaseError::NoActiveLease { .. } => "NoActiveLease",
            LeaseError::LeaseIdMismatch { .. } => "LeaseIdMismatch",
            LeaseError::LeaseIdMissing { .. } => "LeaseIdMissing",
            LeaseError::SnapshotNotLeasable => "SnapshotNotLeasable",
            LeaseError::AuthorizationFailed { .. } => "AuthorizationFailed",
            LeaseError::RequestBodyTooLarge { .. } => "RequestBodyTooLarge",
            LeaseError::InvalidArgument { .. } => "InvalidArgument",
            LeaseError::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            LeaseError::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            LeaseError::ResourceAlreadyExists { .. } => StatusCode::CONFLICT,
            LeaseError::InvalidLeaseId { .. } => StatusCode::BAD_REQUEST,
            LeaseError::InvalidLeaseDuration { .. } => StatusCode::BAD_REQUEST,
            LeaseError::InvalidLeaseBreakPeriod { .. } => StatusCode::BAD_REQUEST,
            LeaseError::LeaseAlreadyPresent => StatusCode::CONFLICT,
            LeaseError::NoActiveLease { .. } => StatusCode::CONFLICT,
            LeaseError::LeaseIdMismatch { .. } => StatusCode::CONFLICT,
            LeaseError::LeaseIdMissing { .. } => StatusCode::PRECONDITION_FAILED,
            LeaseError::SnapshotNotLeasable => StatusCode::BAD_REQUEST,
            LeaseError::AuthorizationFailed { .. } => StatusCode::FORBIDDEN,
            LeaseError::RequestBodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            LeaseError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            LeaseError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LeaseError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        let body = render_error(self.code(), &self.to_string(), &request_id);

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-ms-error-code", self.code().to_string()),
                ("x-ms-request-id", request_id),
                ("date", date),
                ("server", "Leasehold".to_string()),
            ],
            body,
        )
            .into_response()
    }
}
