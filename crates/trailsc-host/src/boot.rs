use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trailsc_core::{CertificateSet, LayeredFs, OsFs, parse_certificates};

use crate::config::ServeConfig;
use crate::debounce::{self, DebounceGate};
use crate::http::{self, AppState};
use crate::pipeline::Pipeline;
use crate::watcher::{self, WatchFilter, WatchHandle};

/// Binds `cfg.addr` and serves until Ctrl-C.
pub async fn run(cfg: ServeConfig) -> Result<()> {
    let listener = TcpListener::bind(cfg.addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.addr))?;
    serve(cfg, listener, shutdown_signal()).await
}

/// Builds the initial bundle, starts the watcher and serves on `listener`
/// until `shutdown` resolves.
pub async fn serve<F>(cfg: ServeConfig, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let base = OsFs::new(&cfg.source_dir)
        .with_context(|| format!("unable to open directory {}", cfg.source_dir.display()))?;
    let fs = Arc::new(LayeredFs::new(base));

    let mut watching = None;
    if cfg.raw {
        info!(dir = %cfg.source_dir.display(), "raw mode, serving the directory as-is");
    } else {
        let certs = load_certificates(&cfg)?;
        let pipeline = Arc::new(Pipeline::new(fs.clone(), certs, cfg.container.clone()));

        info!(container = %cfg.container, "building the config bundles");
        let initial = pipeline.clone();
        tokio::task::spawn_blocking(move || initial.rebuild_logged())
            .await
            .context("initial bundle build panicked")?;

        info!("creating the config change listener");
        let filter = WatchFilter::new(&cfg.effective_glob())?;
        let (tx, rx) = mpsc::unbounded_channel();
        let watch = watcher::spawn(&cfg.source_dir, filter, tx)
            .context("failed to start the change watcher")?;
        let drain = tokio::spawn(debounce::drain(rx, DebounceGate::new(cfg.debounce), move |_| {
            let pipeline = pipeline.clone();
            tokio::task::spawn_blocking(move || pipeline.rebuild_logged());
        }));
        watching = Some((watch, drain));
    }

    let app = http::router(AppState::new(fs, &cfg), cfg.color);
    let local = listener.local_addr().context("listener has no local address")?;
    info!(addr = %local, envs = %cfg.environments, "trailsc listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server error");

    if let Some((watch, drain)) = watching {
        stop_watching(watch, drain).await;
    }
    served
}

/// Stops the watcher thread; the drain task ends once the event channel closes.
async fn stop_watching(watch: WatchHandle, drain: JoinHandle<()>) {
    if let Err(err) = tokio::task::spawn_blocking(move || watch.stop()).await {
        warn!(error = %err, "failed to stop the change watcher");
    }
    if let Err(err) = drain.await {
        warn!(error = %err, "change drain task failed");
    }
    debug!("change watching stopped");
}

fn load_certificates(cfg: &ServeConfig) -> Result<CertificateSet> {
    let file = File::open(&cfg.cert_path)
        .with_context(|| format!("failed to open cert file {}", cfg.cert_path.display()))?;
    let certs = parse_certificates(Some(BufReader::new(file)))
        .with_context(|| format!("failed to parse certificate {}", cfg.cert_path.display()))?;
    if certs.leaf.is_empty() {
        bail!("{} contains no certificate", cfg.cert_path.display());
    }
    if certs.intermediates.is_empty() {
        warn!(cert = %cfg.cert_path.display(), "no intermediate certificates found");
    }
    Ok(certs)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
