pub mod access_log;
pub mod bundle;

use std::sync::Arc;

use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use trailsc_core::{EnvWhitelist, LayeredFs};

use crate::config::ServeConfig;

static FAVICON: &[u8] = include_bytes!("../../assets/favicon.ico");

/// Shared, read-only state behind every request.
#[derive(Clone, Debug)]
pub struct AppState {
    pub fs: Arc<LayeredFs>,
    pub environments: EnvWhitelist,
    pub default_env: String,
}

impl AppState {
    pub fn new(fs: Arc<LayeredFs>, cfg: &ServeConfig) -> Self {
        Self {
            fs,
            environments: cfg.environments.clone(),
            default_env: cfg.default_env.clone(),
        }
    }
}

/// Builds the distribution router; `GET` routes answer `HEAD` as well.
pub fn router(state: AppState, color: bool) -> Router {
    Router::new()
        .route("/favicon.ico", get(favicon))
        .route("/{env}/{bundle}", get(bundle::in_env))
        .route("/{bundle}", get(bundle::in_default_env))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            access_log::AccessLog { color },
            access_log::log_request,
        ))
}

async fn favicon() -> impl IntoResponse {
    ([(CONTENT_TYPE, "image/x-icon")], FAVICON)
}
