// HTTP request handlers

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection},
        DefaultBodyLimit, Path, State,
    },
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::DaemonContext;
use crate::store::StoreError;

/// Value of the `Allow` header on unsupported methods
pub const ALLOWED_METHODS: &str = "GET, PUT";

/// Body returned by `/shutdown`
pub const SHUTDOWN_ACK: &str = "Shutting down";

/// Create the daemon router
pub fn create_router(context: Arc<DaemonContext>) -> Router {
    let body_limit = context.max_object_size();

    Router::new()
        .route("/shutdown", any(shutdown))
        .route(
            "/*key",
            get(get_object)
                .put(put_object)
                .head(unsupported_method)
                .delete(unsupported_method),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(context)
}

/// Handle GET /{key}
///
/// A missing key and a failing store both answer 404; only a body that
/// could not be collected after the store answered is a 500.
async fn get_object(
    State(context): State<Arc<DaemonContext>>,
    key: Result<Path<String>, PathRejection>,
) -> Response {
    let Some(key) = object_key(key) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    info!(key = %key, "GET");

    match context.store().get(&key).await {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(StoreError::NotFound(_)) => {
            info!(key = %key, "No such key");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e @ StoreError::Read(_)) => {
            error!(key = %key, error = %e, "Internal server error");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(key = %key, error = %e, "S3 error");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Handle PUT /{key}
///
/// Answers as soon as the body is buffered; the store write runs detached.
async fn put_object(
    State(context): State<Arc<DaemonContext>>,
    key: Result<Path<String>, PathRejection>,
    body: Result<Bytes, BytesRejection>,
) -> StatusCode {
    // S3 keys are UTF-8; there is nowhere to store anything else
    let Some(key) = object_key(key) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    info!(key = %key, "PUT");

    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            error!(
                key = %key,
                limit = context.max_object_size(),
                "Not uploading: artifact is bigger than the size limit"
            );
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
        Err(rejection) => {
            error!(key = %key, error = %rejection.body_text(), "Internal server error reading body");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    context.spawn_upload(key, body);
    StatusCode::OK
}

/// Handle HEAD and DELETE on any path
async fn unsupported_method(method: Method, uri: Uri) -> Response {
    info!(method = %method, path = %uri.path(), "Request");
    warn!(method = %method, "Method not implemented");
    (StatusCode::NOT_FOUND, [(header::ALLOW, ALLOWED_METHODS)]).into_response()
}

/// Decoded object key, or `None` when the path is not valid UTF-8
fn object_key(path: Result<Path<String>, PathRejection>) -> Option<String> {
    match path {
        Ok(Path(key)) => Some(key),
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Unusable object key");
            None
        }
    }
}

/// Handle /shutdown (any method)
async fn shutdown(State(context): State<Arc<DaemonContext>>) -> &'static str {
    info!("Shutting down");
    context.request_shutdown();
    SHUTDOWN_ACK
}

/// Paths outside `/{key}` (including `/` itself)
async fn not_found(method: Method, uri: Uri) -> Response {
    if method == Method::HEAD || method == Method::DELETE {
        return unsupported_method(method, uri).await;
    }
    StatusCode::NOT_FOUND.into_response()
}
