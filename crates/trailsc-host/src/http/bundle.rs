use std::path::Path as FsPath;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, LAST_MODIFIED};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use trailsc_core::fs::FileSystem;

use super::AppState;

pub async fn in_env(
    State(state): State<AppState>,
    Path((env, bundle)): Path<(String, String)>,
) -> Response {
    serve(&state, &env, &bundle)
}

/// `/{segment}` is a file in the default environment, unless no such file
/// exists and the segment names an environment: then the bundle is missing.
pub async fn in_default_env(State(state): State<AppState>, Path(bundle): Path<String>) -> Response {
    if state.environments.is_valid(&bundle.to_ascii_lowercase())
        && !state
            .fs
            .snapshot()
            .metadata(FsPath::new(&bundle))
            .is_ok_and(|meta| meta.is_file())
    {
        debug!(env = %bundle, "environment without a bundle");
        return StatusCode::NOT_FOUND.into_response();
    }
    serve(&state, &state.default_env, &bundle)
}

/// Anything that is not a known environment plus an existing file is left to
/// the dynamic API, which does not exist yet: 501.
fn serve(state: &AppState, env: &str, bundle: &str) -> Response {
    let env = env.to_ascii_lowercase();
    if !state.environments.is_valid(&env) {
        debug!(env = %env, "environment not whitelisted");
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }

    let snapshot = state.fs.snapshot();
    let path = FsPath::new(bundle);
    let meta = match snapshot.metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => {
            debug!(bundle, "not a regular file");
            return StatusCode::NOT_IMPLEMENTED.into_response();
        }
        Err(err) => {
            info!(bundle, error = %err, "file not found");
            return StatusCode::NOT_IMPLEMENTED.into_response();
        }
    };
    let data = match snapshot.read(path) {
        Ok(data) => data,
        Err(err) => {
            warn!(bundle, error = %err, "failed to read bundle");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(env = %env, bundle, size = data.len(), "sending to fileserver");
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(bundle)));
    if let Some(modified) = meta.modified.and_then(http_date) {
        headers.insert(LAST_MODIFIED, modified);
    }
    (StatusCode::OK, headers, Body::from(data)).into_response()
}

fn content_type(name: &str) -> &'static str {
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".gz") {
        "application/gzip"
    } else if name.ends_with(".tar") {
        "application/x-tar"
    } else if name.ends_with(".pem") {
        "application/x-pem-file"
    } else {
        "application/octet-stream"
    }
}

fn http_date(time: SystemTime) -> Option<HeaderValue> {
    let time: DateTime<Utc> = time.into();
    HeaderValue::from_str(&time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).ok()
}
