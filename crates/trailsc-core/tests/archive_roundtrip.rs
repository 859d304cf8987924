use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use proptest::prelude::*;
use tempfile::TempDir;
use trailsc_core::{BundleFormat, OsFs, build_archive};

fn tree_strategy() -> impl Strategy<Value = BTreeMap<PathBuf, Vec<u8>>> {
    let segment = "[a-z][a-z0-9_]{0,7}";
    let path = prop::collection::vec(segment, 1..4).prop_map(|parts| {
        let mut path: PathBuf = parts.iter().collect();
        path.set_extension("conf");
        path
    });
    prop::collection::btree_map(path, prop::collection::vec(any::<u8>(), 0..512), 1..12)
}

fn write_tree(root: &Path, tree: &BTreeMap<PathBuf, Vec<u8>>) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut written = BTreeMap::new();
    for (relative, body) in tree {
        let target = root.join(relative);
        // A generated file may collide with a generated directory; keep the first writer.
        if let Some(parent) = target.parent()
            && std::fs::create_dir_all(parent).is_err()
        {
            continue;
        }
        if target.is_dir() || std::fs::write(&target, body).is_err() {
            continue;
        }
        written.insert(relative.clone(), body.clone());
    }
    written
}

fn inflate(bytes: &[u8]) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut tar_bytes = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut tar_bytes)
        .expect("gzip stream");
    let mut archive = tar::Archive::new(tar_bytes.as_slice());
    let mut files = BTreeMap::new();
    for entry in archive.entries().expect("tar entries") {
        let mut entry = entry.expect("tar entry");
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().expect("entry path").into_owned();
        let mut body = Vec::new();
        entry.read_to_end(&mut body).expect("entry body");
        files.insert(path, body);
    }
    files
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn archived_tree_inflates_to_the_same_files(tree in tree_strategy()) {
        let temp = TempDir::new().expect("temp dir");
        let written = write_tree(temp.path(), &tree);
        let source = OsFs::new(temp.path()).expect("os fs");

        let archive = build_archive(&source, Path::new("."), "trails-config", BundleFormat::Gzip)
            .expect("archive");
        let files = inflate(archive.as_bytes());

        let expected: BTreeMap<PathBuf, Vec<u8>> = written
            .into_iter()
            .map(|(path, body)| (Path::new("trails-config").join(path), body))
            .collect();
        prop_assert_eq!(files, expected);
    }
}

#[test]
fn unreadable_file_keeps_its_entry() {
    let temp = TempDir::new().expect("temp dir");
    std::fs::write(temp.path().join("ok.conf"), b"fine").unwrap();
    let locked = temp.path().join("locked.conf");
    std::fs::write(&locked, b"secret").unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    }

    let source = OsFs::new(temp.path()).expect("os fs");
    let archive =
        build_archive(&source, Path::new("."), "c", BundleFormat::Gzip).expect("archive");
    let files = inflate(archive.as_bytes());
    assert_eq!(files[Path::new("c/ok.conf")], b"fine");
    assert!(files.contains_key(Path::new("c/locked.conf")));

    #[cfg(unix)]
    {
        if !nix::unistd::geteuid().is_root() {
            assert!(files[Path::new("c/locked.conf")].is_empty());
        }
    }
}
