//! Bundle building blocks for trailsc.
//!
//! This crate holds the stateless pieces behind a signed config bundle:
//! archiving a directory tree, loading the signer and its certificate chain,
//! and the layered filesystem generated artifacts are written to. It does no
//! scheduling or serving of its own; `trailsc-host` wires these helpers into
//! the rebuild pipeline and the HTTP server.

pub mod archive;
pub mod certs;
pub mod env;
pub mod fs;
pub mod signer;

pub use archive::{Archive, ArchiveError, BundleFormat, build_archive};
pub use certs::{CertError, CertificateSet, parse_certificates};
pub use env::EnvWhitelist;
pub use fs::{FileSystem, FsError, LayeredFs, MemFs, OsFs};
pub use signer::{BundleSigner, RsaSigner, SignError, sha256_digest, verify_digest};
