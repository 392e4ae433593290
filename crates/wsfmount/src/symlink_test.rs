// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use rstest::rstest;

use super::{apply, prime_lookup_cache, replace_symlink};
use crate::descriptor::{BackendKind, MountPlan, PrimeWalk, SymlinkChain, TopologyMode};
use crate::fixtures::*;
use crate::{Error, ErrorCategory};

#[rstest]
fn test_replace_symlink_creates_and_replaces(tmpdir: tempfile::TempDir) {
    let root = tmpdir.path();
    std::fs::create_dir(root.join("first")).unwrap();
    std::fs::create_dir(root.join("second")).unwrap();
    let link = root.join("nested/alias");

    replace_symlink(&link, &root.join("first")).expect("should create link and parents");
    assert_eq!(std::fs::read_link(&link).unwrap(), root.join("first"));

    replace_symlink(&link, &root.join("second")).expect("should replace existing link");
    assert_eq!(std::fs::read_link(&link).unwrap(), root.join("second"));

    replace_symlink(&link, &root.join("second")).expect("should be idempotent");
    assert_eq!(std::fs::read_link(&link).unwrap(), root.join("second"));
}

#[rstest]
fn test_replace_symlink_never_clobbers_directories(tmpdir: tempfile::TempDir) {
    let root = tmpdir.path();
    let occupied = root.join("occupied");
    std::fs::create_dir(&occupied).unwrap();
    std::fs::write(occupied.join("keep"), "data").unwrap();

    let err = replace_symlink(&occupied, root).expect_err("should refuse to replace a directory");
    assert!(matches!(err, Error::AliasOccupied(ref p) if p == &occupied), "{err:?}");
    assert!(occupied.join("keep").exists());
}

#[rstest]
fn test_replace_symlink_replaces_empty_directory(tmpdir: tempfile::TempDir) {
    let root = tmpdir.path();
    let target = root.join("target");
    std::fs::create_dir(&target).unwrap();
    let leftover = root.join("wsfs");
    std::fs::create_dir(&leftover).unwrap();

    replace_symlink(&leftover, &target).expect("an empty directory should be replaced");
    assert_eq!(std::fs::read_link(&leftover).unwrap(), target);
}

#[rstest]
fn test_replace_symlink_never_clobbers_files(tmpdir: tempfile::TempDir) {
    let root = tmpdir.path();
    let file = root.join("wsfs");
    std::fs::write(&file, "").unwrap();

    let err = replace_symlink(&file, root).expect_err("should refuse to replace a file");
    assert!(matches!(err, Error::AliasOccupied(ref p) if p == &file), "{err:?}");
    assert!(file.is_file());
}

#[rstest]
fn test_prime_lookup_cache_lists_every_component(tmpdir: tempfile::TempDir) {
    init_logging();
    let base = tmpdir.path().join("local");
    std::fs::create_dir_all(base.join("a/b/c")).unwrap();
    let walk = PrimeWalk {
        base,
        sub_path: "a/b/c".into(),
    };
    prime_lookup_cache(&walk).expect("every directory exists");
}

#[rstest]
fn test_prime_lookup_cache_names_failing_path(tmpdir: tempfile::TempDir) {
    let base = tmpdir.path().join("local");
    std::fs::create_dir_all(base.join("a")).unwrap();
    let walk = PrimeWalk {
        base: base.clone(),
        sub_path: "a/missing/deeper".into(),
    };
    let err = prime_lookup_cache(&walk).expect_err("missing directory should fail");
    match err {
        Error::CachePriming { ref path, .. } => assert_eq!(path, &base.join("a/missing")),
        _ => panic!("expected a cache priming error, got {err:?}"),
    }
    assert_eq!(err.category(), ErrorCategory::Verification);
}

#[rstest]
fn test_apply_verifies_aliases_without_walk(tmpdir: tempfile::TempDir) {
    let root = tmpdir.path();
    let mut links = SymlinkChain::default();
    links.push(root.join("alias"), root.join("missing"));
    let plan = MountPlan {
        kind: BackendKind::WorkspaceFs,
        mode: TopologyMode::MultiPath,
        targets: Vec::new(),
        links,
        prime: None,
    };
    let err = apply(&plan).expect_err("alias to nothing cannot be listed");
    assert!(matches!(err, Error::CachePriming { ref path, .. } if path == &root.join("alias")));

    std::fs::create_dir(root.join("missing")).unwrap();
    apply(&plan).expect("alias now resolves");
}

#[rstest]
fn test_apply_without_links_does_nothing(tmpdir: tempfile::TempDir) {
    let plan = MountPlan {
        kind: BackendKind::BlobStore,
        mode: TopologyMode::SinglePath,
        targets: Vec::new(),
        links: SymlinkChain::default(),
        prime: Some(PrimeWalk {
            base: tmpdir.path().join("never-listed"),
            sub_path: String::new(),
        }),
    };
    apply(&plan).expect("nothing to do");
}
