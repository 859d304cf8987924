//! Runtime half of trailsc.
//!
//! [`run`] loads the signer, builds the first bundle into the in-memory
//! overlay, starts the change watcher behind a debounce gate and serves the
//! container over HTTP.

pub mod boot;
pub mod config;
pub mod debounce;
pub mod http;
pub mod pipeline;
pub mod watcher;

pub use boot::{run, serve};
pub use config::ServeConfig;
pub use pipeline::{BuildReport, Pipeline, RebuildOutcome};
pub use watcher::{WatchEvent, WatchFilter, WatchOp};
