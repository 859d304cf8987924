//! Stamps `TRAILSC_VERSION` as `<version>-<release>+<build>.<commit>`.

fn main() {
    let field = |name: &str, default: &str| {
        println!("cargo:rerun-if-env-changed={name}");
        std::env::var(name)
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())
    };
    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.1.0".into());
    let release = field("TRAILSC_RELEASE", "dirty");
    let build = field("TRAILSC_BUILD", "0");
    let commit = field("TRAILSC_COMMIT", "000000");
    println!("cargo:rustc-env=TRAILSC_VERSION={version}-{release}+{build}.{commit}");
}
