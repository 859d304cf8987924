use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use trailsc_core::EnvWhitelist;

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_CERT: &str = "cert.pem";
pub const DEFAULT_CONTAINER: &str = "trails-config";
pub const DEFAULT_ENV: &str = "qa";
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Everything `run` needs, resolved up front by the caller.
#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub addr: SocketAddr,
    pub source_dir: PathBuf,
    pub cert_path: PathBuf,
    pub container: String,
    /// Serve `source_dir` as-is: no certificates, no build, no watcher.
    pub raw: bool,
    pub environments: EnvWhitelist,
    /// Environment assumed for `/{bundle}` requests.
    pub default_env: String,
    pub debounce: Duration,
    /// Glob a changed path must match; `None` means everything under `source_dir`.
    pub watch_glob: Option<String>,
    pub color: bool,
}

impl ServeConfig {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            source_dir: source_dir.into(),
            cert_path: PathBuf::from(DEFAULT_CERT),
            container: DEFAULT_CONTAINER.to_string(),
            raw: false,
            environments: EnvWhitelist::default(),
            default_env: DEFAULT_ENV.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            watch_glob: None,
            color: true,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_cert(mut self, cert_path: impl Into<PathBuf>) -> Self {
        self.cert_path = cert_path.into();
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Glob actually applied by the watcher.
    pub fn effective_glob(&self) -> String {
        match &self.watch_glob {
            Some(glob) => glob.clone(),
            None => default_glob(&self.source_dir),
        }
    }

    /// File name of the distributable artifact, e.g. `trails-config.tar.gz`.
    pub fn bundle_name(&self) -> String {
        format!("{}.tar.gz", self.container)
    }
}

fn default_glob(root: &Path) -> String {
    let root = root.to_string_lossy();
    format!("{}/**", globset::escape(root.trim_end_matches('/')))
}
