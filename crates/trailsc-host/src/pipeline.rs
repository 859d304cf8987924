use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, error, info};
use trailsc_core::fs::FileSystem;
use trailsc_core::{BundleFormat, CertificateSet, LayeredFs, build_archive, sha256_digest};

/// Entry prefix used inside `config.tar.gz`.
const CONFIG_PREFIX: &str = "config";
const FILE_MODE: u32 = 0o644;

/// Outcome of a rebuild request.
#[derive(Debug)]
pub enum RebuildOutcome {
    Built(BuildReport),
    /// Another rebuild held the lock; this trigger was dropped.
    Skipped,
}

#[derive(Clone, Debug)]
pub struct BuildReport {
    pub artifact: PathBuf,
    pub size: u64,
    pub last_modified: Option<SystemTime>,
}

/// Rebuilds the container and its distributable archive into the overlay.
///
/// Every artifact of one rebuild is written to a private staging copy and
/// published in a single commit, and at most one rebuild runs at a time.
#[derive(Debug)]
pub struct Pipeline {
    fs: Arc<LayeredFs>,
    certs: CertificateSet,
    container: String,
    running: Mutex<()>,
}

impl Pipeline {
    pub fn new(fs: Arc<LayeredFs>, certs: CertificateSet, container: impl Into<String>) -> Self {
        Self {
            fs,
            certs,
            container: container.into(),
            running: Mutex::new(()),
        }
    }

    /// Path of `<container>.tar.gz` at the root of the served filesystem.
    pub fn artifact_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}.{}",
            self.container,
            BundleFormat::Gzip.extension()
        ))
    }

    /// Runs a rebuild unless one is already in flight.
    pub fn try_rebuild(&self) -> Result<RebuildOutcome> {
        let Some(_running) = self.running.try_lock() else {
            debug!(container = %self.container, "rebuild already running, dropping trigger");
            return Ok(RebuildOutcome::Skipped);
        };
        self.rebuild_locked().map(RebuildOutcome::Built)
    }

    /// [`Pipeline::try_rebuild`] with failures logged; the previous container stays served.
    pub fn rebuild_logged(&self) {
        if let Err(err) = self.try_rebuild() {
            error!(container = %self.container, error = ?err, "bundle rebuild failed");
        }
    }

    fn rebuild_locked(&self) -> Result<BuildReport> {
        let container = Path::new(&self.container);
        let certs_dir = container.join("certs");

        let config = build_archive(self.fs.base(), Path::new(""), CONFIG_PREFIX, BundleFormat::Gzip)
            .context("failed to archive the config tree")?;

        let mut staging = self.fs.stage();
        staging
            .create_dir_all(&certs_dir)
            .context("failed to create the container certs directory")?;
        staging
            .write_file(&container.join("config.tar.gz"), config.as_bytes().to_vec(), FILE_MODE)
            .context("failed to write config.tar.gz")?;
        staging
            .write_file(&certs_dir.join("cert.pem"), self.certs.leaf.clone(), FILE_MODE)
            .context("failed to write certs/cert.pem")?;
        staging
            .write_file(
                &certs_dir.join("intermediate.pem"),
                self.certs.intermediate_chain(),
                FILE_MODE,
            )
            .context("failed to write certs/intermediate.pem")?;

        let digest = sha256_digest(config.as_bytes());
        let signature = self
            .certs
            .signer
            .sign_digest(&digest)
            .context("failed to sign the config archive")?;
        staging
            .write_file(&container.join("config.sign"), signature, FILE_MODE)
            .context("failed to write config.sign")?;

        let bundle = build_archive(&staging, container, &self.container, BundleFormat::Gzip)
            .context("failed to archive the container")?;
        let artifact = self.artifact_path();
        staging
            .write_file(&artifact, bundle.into_bytes(), FILE_MODE)
            .with_context(|| format!("failed to write {}", artifact.display()))?;
        staging.commit();

        let meta = self
            .fs
            .metadata(&artifact)
            .with_context(|| format!("failed to stat {}", artifact.display()))?;
        let last_modified = meta
            .modified
            .map(|time| humantime::format_rfc3339_seconds(time).to_string())
            .unwrap_or_else(|| "unknown".into());
        info!(
            bundle = %artifact.display(),
            size = meta.len,
            last_modified = %last_modified,
            "bundle built"
        );
        Ok(BuildReport {
            artifact,
            size: meta.len,
            last_modified: meta.modified,
        })
    }
}
