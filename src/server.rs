//! Axum router construction and blob-service route mapping.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].
//!
//! The blob service distinguishes operations by query parameters, not
//! just path and method.  `PUT /:container` is CreateContainer with
//! `restype=container`, SetContainerMetadata with `comp=metadata`, or a
//! container lease with `comp=lease`.  We use a single handler per
//! method+path that dispatches internally based on the query.

use axum::{
    extract::{DefaultBodyLimit, Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, head, put},
    Extension, Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::OpenApi;

use crate::auth::{self, Credential};
use crate::errors::{generate_request_id, LeaseError};
use crate::handlers::{blob, container, lease};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::storage::backend::ResourceRef;
use crate::AppState;

/// Service version reported in `x-ms-version`.
pub const SERVICE_VERSION: &str = "2021-08-06";

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the Leasehold HTTP API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Leasehold Blob Lease API",
        version = "0.1.0",
        description = "Container and blob lease manager"
    ),
    paths(
        health_check,
        // Container operations
        crate::handlers::container::create_container,
        crate::handlers::container::delete_container,
        crate::handlers::container::set_container_metadata,
        crate::handlers::container::container_properties,
        crate::handlers::container::list_blobs,
        // Blob operations
        crate::handlers::blob::put_blob,
        crate::handlers::blob::get_blob,
        crate::handlers::blob::blob_properties,
        crate::handlers::blob::delete_blob,
        crate::handlers::blob::set_blob_metadata,
        crate::handlers::blob::snapshot_blob,
        // Leases
        crate::handlers::lease::lease,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Container", description = "Container operations"),
        (name = "Blob", description = "Blob operations"),
        (name = "Lease", description = "Container and blob leases"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new();

    if state.config.observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .route("/openapi.json", get(openapi_json))
        // Container-level routes
        .route("/:container", get(handle_get_container))
        .route("/:container", put(handle_put_container))
        .route("/:container", delete(handle_delete_container))
        .route("/:container", head(handle_head_container))
        // Blob-level routes (wildcard name captures slashes)
        .route("/:container/*blob", get(handle_get_blob))
        .route("/:container/*blob", put(handle_put_blob))
        .route("/:container/*blob", delete(handle_delete_blob))
        .route("/:container/*blob", head(handle_head_blob))
        // Application state shared across all handlers.
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        // credential_middleware is innermost (closest to handlers).
        .layer(middleware::from_fn_with_state(state, credential_middleware))
        // common_headers_middleware is next (adds standard service headers).
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware captures the full request lifecycle.
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Blob size is enforced in the handler against `max_blob_size`.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Tower middleware that adds common response headers to every response:
/// - `x-ms-request-id`: 16-character uppercase hex string
/// - `x-ms-version`: service version
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `Leasehold`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Error responses already carry the request ID echoed in their body.
    if !headers.contains_key("x-ms-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-ms-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("x-ms-version", HeaderValue::from_static(SERVICE_VERSION));
    headers.insert("server", HeaderValue::from_static("Leasehold"));

    response
}

// -- Credential middleware ---------------------------------------------------

/// Paths that carry no credential.
const AUTH_SKIP_PATHS: &[&str] = &["/health", "/metrics", "/openapi.json"];

/// Resolve the request credential and attach it as an extension.
///
/// A `SharedKey` authorization header or a `sig` query parameter that
/// does not resolve is rejected here with `AuthorizationFailed`.  A
/// request with neither proceeds as anonymous; whether that is enough is
/// decided per operation by the authorization gate.
async fn credential_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, LeaseError> {
    let path = req.uri().path();
    if AUTH_SKIP_PATHS.contains(&path) {
        return Ok(next.run(req).await);
    }

    let authorization = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    let query = parse_query(req.uri().query().map(str::to_string));
    let sig = query.get("sig").map(String::as_str);

    let credential =
        auth::resolve_credential(authorization, sig, &state.config.auth, &state.tokens)?;
    debug!("{} {} as {}", req.method(), req.uri().path(), credential_kind(&credential));

    req.extensions_mut().insert(credential);
    Ok(next.run(req).await)
}

fn credential_kind(credential: &Credential) -> &'static str {
    match credential {
        Credential::AccountKey { .. } => "account key",
        Credential::AccountSas(_) => "account token",
        Credential::ServiceSas(_) => "service token",
        Credential::Anonymous => "anonymous",
    }
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json` -- The OpenAPI document.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse raw query string into a HashMap.
fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&') {
            if let Some((k, v)) = part.split_once('=') {
                let decoded_k = percent_encoding::percent_decode_str(k)
                    .decode_utf8_lossy()
                    .into_owned();
                let decoded_v = percent_encoding::percent_decode_str(v)
                    .decode_utf8_lossy()
                    .into_owned();
                map.insert(decoded_k, decoded_v);
            } else if !part.is_empty() {
                let decoded = percent_encoding::percent_decode_str(part)
                    .decode_utf8_lossy()
                    .into_owned();
                map.insert(decoded, String::new());
            }
        }
    }
    map
}

fn comp(query: &HashMap<String, String>) -> Option<&str> {
    query.get("comp").map(String::as_str)
}

/// Container operations need `restype=container`.
fn require_container_restype(query: &HashMap<String, String>) -> Result<(), LeaseError> {
    match query.get("restype").map(String::as_str) {
        Some("container") => Ok(()),
        _ => Err(LeaseError::InvalidArgument {
            message: "The restype query parameter must be 'container'.".to_string(),
        }),
    }
}

fn unsupported_comp(value: &str) -> LeaseError {
    LeaseError::InvalidArgument {
        message: format!("The comp value '{value}' is not supported here."),
    }
}

// -- Container-level dispatch ------------------------------------------------

/// `GET /:container` -- `comp=list` -> ListBlobs, otherwise container
/// properties.
async fn handle_get_container(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(name): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, LeaseError> {
    let query = parse_query(raw_query);
    require_container_restype(&query)?;

    match comp(&query) {
        Some("list") => container::list_blobs(state, &credential, &name).await,
        None => container::container_properties(state, &credential, &name).await,
        Some(other) => Err(unsupported_comp(other)),
    }
}

/// `PUT /:container` -- dispatches based on `comp`:
/// - `comp=lease` -> container lease operation
/// - `comp=metadata` -> SetContainerMetadata
/// - default -> CreateContainer
async fn handle_put_container(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(name): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, LeaseError> {
    let query = parse_query(raw_query);
    require_container_restype(&query)?;

    match comp(&query) {
        Some("lease") => {
            lease::lease(state, &credential, &ResourceRef::container(name), &headers).await
        }
        Some("metadata") => {
            container::set_container_metadata(state, &credential, &name, &headers).await
        }
        None => container::create_container(state, &credential, &name, &headers).await,
        Some(other) => Err(unsupported_comp(other)),
    }
}

/// `DELETE /:container` -- DeleteContainer
async fn handle_delete_container(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(name): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, LeaseError> {
    let query = parse_query(raw_query);
    require_container_restype(&query)?;
    container::delete_container(state, &credential, &name, &headers).await
}

/// `HEAD /:container` -- GetContainerProperties
async fn handle_head_container(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path(name): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, LeaseError> {
    let query = parse_query(raw_query);
    require_container_restype(&query)?;
    container::container_properties(state, &credential, &name).await
}

// -- Blob-level dispatch -----------------------------------------------------

/// `GET /:container/*blob` -- GetBlob (optionally `snapshot=...`)
async fn handle_get_blob(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path((name, blob_name)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, LeaseError> {
    let query = parse_query(raw_query);
    let snapshot = query.get("snapshot").map(String::as_str);
    blob::get_blob(state, &credential, &name, &blob_name, snapshot).await
}

/// `PUT /:container/*blob` -- dispatches based on `comp`:
/// - `comp=lease` -> blob lease operation (on `snapshot=...`, rejected)
/// - `comp=metadata` -> SetBlobMetadata
/// - `comp=snapshot` -> SnapshotBlob
/// - default -> PutBlob
async fn handle_put_blob(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path((name, blob_name)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, LeaseError> {
    let query = parse_query(raw_query);

    match comp(&query) {
        Some("lease") => {
            let mut resource = ResourceRef::blob(name, blob_name);
            if let Some(snapshot) = query.get("snapshot") {
                resource = resource.with_snapshot(snapshot.clone());
            }
            lease::lease(state, &credential, &resource, &headers).await
        }
        Some("metadata") => {
            blob::set_blob_metadata(state, &credential, &name, &blob_name, &headers).await
        }
        Some("snapshot") => {
            blob::snapshot_blob(state, &credential, &name, &blob_name, &headers).await
        }
        None => blob::put_blob(state, &credential, &name, &blob_name, &headers, &body).await,
        Some(other) => Err(unsupported_comp(other)),
    }
}

/// `DELETE /:container/*blob` -- DeleteBlob (optionally `snapshot=...`)
async fn handle_delete_blob(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path((name, blob_name)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, LeaseError> {
    let query = parse_query(raw_query);
    let snapshot = query.get("snapshot").map(String::as_str);
    blob::delete_blob(state, &credential, &name, &blob_name, snapshot, &headers).await
}

/// `HEAD /:container/*blob` -- GetBlobProperties
async fn handle_head_blob(
    State(state): State<Arc<AppState>>,
    Extension(credential): Extension<Credential>,
    Path((name, blob_name)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, LeaseError> {
    let query = parse_query(raw_query);
    let snapshot = query.get("snapshot").map(String::as_str);
    blob::blob_properties(state, &credential, &name, &blob_name, snapshot).await
}
