use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use trailsc_core::EnvWhitelist;
use trailsc_host::{ServeConfig, run as run_host};

const VERSION: &str = env!("TRAILSC_VERSION");

#[derive(Debug, Parser)]
#[command(name = "trailsc", version = VERSION, about = "Build, sign and serve trails config bundles")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the config bundles over HTTP, rebuilding on change
    Serve(ServeArgs),
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
    /// Serve the directory as-is: no signing, no watching
    #[arg(short, long)]
    raw: bool,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:9000", value_parser = parse_addr)]
    addr: SocketAddr,

    /// Config directory to bundle and serve (defaults to the current directory)
    #[arg(short, long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Stacked PEM file: private key, leaf, intermediates
    #[arg(short, long, value_name = "FILE", default_value = trailsc_host::config::DEFAULT_CERT)]
    cert: PathBuf,

    /// Name of the container directory and of the distributable archive
    #[arg(short = 'n', long, default_value = trailsc_host::config::DEFAULT_CONTAINER)]
    container: String,

    /// Minimum time between two rebuilds, e.g. `1s` or `500ms`
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    debounce: Duration,

    /// Glob changed paths must match (defaults to `<DIR>/**`)
    #[arg(long, value_name = "GLOB")]
    glob: Option<String>,

    /// Allowed environment prefix; repeat to replace the default prod/qa/dev
    #[arg(long = "env", value_name = "NAME")]
    envs: Vec<String>,

    /// Disable colored access logs
    #[arg(long)]
    no_color: bool,
}

impl ServeArgs {
    fn into_config(self) -> Result<ServeConfig> {
        let dir = match self.dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("failed to read the current directory")?,
        };
        let source_dir = dir
            .canonicalize()
            .with_context(|| format!("unable to stat directory {}", dir.display()))?;

        let mut cfg = ServeConfig::new(source_dir)
            .with_addr(self.addr)
            .with_cert(self.cert)
            .with_container(self.container)
            .with_raw(self.raw);
        cfg.debounce = self.debounce;
        cfg.watch_glob = self.glob;
        cfg.color = !self.no_color;
        if !self.envs.is_empty() {
            cfg.environments = EnvWhitelist::new(&self.envs);
        }
        Ok(cfg)
    }
}

fn parse_addr(value: &str) -> Result<SocketAddr, String> {
    value
        .to_socket_addrs()
        .map_err(|err| format!("invalid address `{value}`: {err}"))?
        .next()
        .ok_or_else(|| format!("`{value}` did not resolve to any address"))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run(cli).await {
        tracing::error!(error = ?err, "trailsc failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => run_host(args.into_config()?).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serial_test::serial;

    fn serve_args(args: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(std::iter::once("trailsc").chain(args.iter().copied()))
            .unwrap();
        match cli.command {
            Command::Serve(args) => args,
        }
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn version_has_release_build_and_commit() {
        let (version, rest) = VERSION.split_once('-').unwrap();
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
        let (_release, build_commit) = rest.split_once('+').unwrap();
        assert!(build_commit.contains('.'));
    }

    #[test]
    fn serve_defaults() {
        let args = serve_args(&["serve"]);
        assert!(!args.raw);
        assert_eq!(args.addr.to_string(), "127.0.0.1:9000");
        assert_eq!(args.cert, PathBuf::from("cert.pem"));
        assert_eq!(args.container, "trails-config");
        assert_eq!(args.debounce, Duration::from_secs(1));
        assert!(args.envs.is_empty());
    }

    #[test]
    fn short_flags_and_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let dir_arg = dir.path().to_string_lossy().into_owned();
        let args = serve_args(&[
            "serve", "-r", "-a", "127.0.0.1:8443", "-d", &dir_arg, "-c", "bundle.pem", "-n",
            "fleet", "--debounce", "250ms", "--env", "canary", "--env", "prod", "--no-color",
        ]);
        let cfg = args.into_config().unwrap();
        assert!(cfg.raw);
        assert_eq!(cfg.addr.port(), 8443);
        assert_eq!(cfg.source_dir, dir.path().canonicalize().unwrap());
        assert_eq!(cfg.cert_path, PathBuf::from("bundle.pem"));
        assert_eq!(cfg.container, "fleet");
        assert_eq!(cfg.debounce, Duration::from_millis(250));
        assert!(cfg.environments.is_valid("canary-1"));
        assert!(!cfg.environments.is_valid("qa"));
        assert!(!cfg.color);
    }

    #[test]
    #[serial]
    fn dir_defaults_to_the_working_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let cfg = serve_args(&["serve"]).into_config();
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(cfg.unwrap().source_dir, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn missing_directory_is_fatal() {
        let args = serve_args(&["serve", "-d", "/definitely/not/here"]);
        assert!(args.into_config().is_err());
    }
}
