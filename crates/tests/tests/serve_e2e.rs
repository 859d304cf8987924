use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use trailsc_core::{sha256_digest, verify_digest};
use trailsc_host::{ServeConfig, serve};
use trailsc_tests::{fixture_path, inflate};

struct Running {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await?
    }
}

fn config_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("osquery")).unwrap();
    std::fs::write(dir.path().join("osquery/packs.conf"), b"{\"packs\":{}}").unwrap();
    std::fs::write(dir.path().join("osquery.conf"), b"{\"options\":{}}").unwrap();
    dir
}

fn config_for(dir: &Path) -> ServeConfig {
    let mut cfg = ServeConfig::new(dir.canonicalize().unwrap()).with_cert(fixture_path("bundle.pem"));
    cfg.color = false;
    cfg
}

async fn start(cfg: ServeConfig) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(serve(cfg, listener, async move {
        let _ = stopped.await;
    }));
    Running {
        addr,
        stop: Some(stop),
        task,
    }
}

async fn fetch(url: &str) -> (StatusCode, Vec<u8>) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status();
    (status, response.bytes().await.unwrap().to_vec())
}

#[tokio::test]
async fn bundle_is_built_signed_and_served() {
    let dir = config_tree();
    let server = start(config_for(dir.path())).await;

    let (status, bytes) = fetch(&server.url("/qa/trails-config.tar.gz")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!bytes.is_empty());

    let container = inflate(&bytes).unwrap();
    let leaf = &container["trails-config/certs/cert.pem"];
    let signature = &container["trails-config/config.sign"];
    let config = &container["trails-config/config.tar.gz"];
    assert!(container.contains_key("trails-config/certs/intermediate.pem"));
    verify_digest(leaf, &sha256_digest(config), signature).unwrap();

    let inner = inflate(config).unwrap();
    assert_eq!(inner["config/osquery.conf"], b"{\"options\":{}}");
    assert_eq!(inner["config/osquery/packs.conf"], b"{\"packs\":{}}");

    assert!(!dir.path().join("trails-config.tar.gz").exists());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unresolvable_and_empty_requests() {
    let dir = config_tree();
    let server = start(config_for(dir.path())).await;

    let (status, body) = fetch(&server.url("/unknown-env/anything")).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert!(body.is_empty());

    let (status, _) = fetch(&server.url("/qa/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.shutdown().await.unwrap();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn config_change_triggers_a_rebuild() {
    let dir = config_tree();
    let mut cfg = config_for(dir.path());
    cfg.debounce = Duration::from_millis(50);
    let server = start(cfg).await;
    let url = server.url("/qa/trails-config.tar.gz");

    let (status, _) = fetch(&url).await;
    assert_eq!(status, StatusCode::OK);

    let added = dir.path().join("osquery/fim.conf");
    let mut rebuilt = false;
    for _ in 0..100 {
        std::fs::write(&added, b"{\"file_paths\":{}}").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (_, bytes) = fetch(&url).await;
        let container = inflate(&bytes).unwrap();
        let inner = inflate(&container["trails-config/config.tar.gz"]).unwrap();
        if inner.contains_key("config/osquery/fim.conf") {
            rebuilt = true;
            break;
        }
    }
    assert!(rebuilt, "bundle never picked up the new file");
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn raw_mode_serves_the_tree_as_is() {
    let dir = config_tree();
    let cfg = config_for(dir.path())
        .with_cert(dir.path().join("no-such-cert.pem"))
        .with_raw(true);
    let server = start(cfg).await;

    let (status, body) = fetch(&server.url("/dev/osquery.conf")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"{\"options\":{}}");

    let (status, _) = fetch(&server.url("/dev/trails-config.tar.gz")).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_certificate_is_fatal() {
    let dir = config_tree();
    let cfg = config_for(dir.path()).with_cert(dir.path().join("no-such-cert.pem"));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let err = serve(cfg, listener, std::future::pending()).await.unwrap_err();
    assert!(format!("{err:#}").contains("cert"));
}

#[tokio::test]
async fn key_without_certificates_is_fatal() {
    let dir = config_tree();
    let cfg = config_for(dir.path()).with_cert(fixture_path("signer.key"));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    assert!(serve(cfg, listener, std::future::pending()).await.is_err());
}
