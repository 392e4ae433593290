// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use rstest::rstest;

use super::{
    ensure_destination,
    is_mounted,
    DriverCommand,
    MountDriver,
    MountStatus,
    NUMA_NODE_VAR,
};
use crate::config;
use crate::descriptor::{BackendKind, CpuRange, MountTarget, NumaHint};
use crate::fixtures::*;
use crate::{Error, ErrorCategory};

fn target(kind: BackendKind, source_path: &str, destination: &Path) -> MountTarget {
    MountTarget {
        kind,
        source_uri: format!("wsfs://gtn.wsfs.internal/{source_path}"),
        source_path: source_path.to_string(),
        destination: destination.to_owned(),
        numa: None,
        extra_flags: Vec::new(),
    }
}

fn args(command: &DriverCommand) -> Vec<String> {
    command
        .args
        .iter()
        .map(|a| a.to_string_lossy().to_string())
        .collect()
}

#[rstest]
fn test_wrapper_binary_command() {
    let options = config::Driver {
        identity: "svc-training".into(),
        ..Default::default()
    };
    let runner = RecordingRunner::new();
    let driver = MountDriver::new(&options, Path::new("/bin/blobfs"), &runner);
    let mut target = target(BackendKind::WorkspaceFs, "workspace", Path::new("/mnt/wsfs"));
    target.extra_flags = vec!["--read-only".into(), "--cache-size=4G".into()];

    let command = driver.command_for(&target);
    assert_eq!(command.program, PathBuf::from("/usr/local/bin/wsf-mount"));
    assert_eq!(
        args(&command),
        vec![
            "mount",
            "--profile",
            "wsf",
            "--log-level",
            "warning",
            "--identity",
            "svc-training",
            "--read-only",
            "--cache-size=4G",
            "wsfs://gtn.wsfs.internal/workspace",
            "/mnt/wsfs",
        ]
    );
    assert!(command.envs.is_empty());
}

#[rstest]
fn test_wrapper_script_command_for_backend_root() {
    let options = config::Driver {
        legacy: true,
        log_level: "debug".into(),
        ..Default::default()
    };
    let runner = RecordingRunner::new();
    let driver = MountDriver::new(&options, Path::new("/bin/blobfs"), &runner);
    let target = target(BackendKind::BlobStore, "", Path::new("/mnt/manifold"));

    let command = driver.command_for(&target);
    assert_eq!(command.program, PathBuf::from("/usr/local/bin/wsf_mount.sh"));
    assert_eq!(
        args(&command),
        vec![
            "-o",
            "profile=manifold",
            "-o",
            "log_level=debug",
            "-o",
            "mount_root",
            "wsfs://gtn.wsfs.internal/",
            "/mnt/manifold",
        ]
    );
}

#[rstest]
fn test_legacy_blobfs_uses_its_own_driver() {
    let options = config::Driver {
        legacy: true,
        ..Default::default()
    };
    let runner = RecordingRunner::new();
    let driver = MountDriver::new(&options, Path::new("/opt/blobfs/bin/mount"), &runner);
    let target = target(BackendKind::LegacyBlobFs, "shard", Path::new("/mnt/blobfs"));

    let command = driver.command_for(&target);
    assert_eq!(command.program, PathBuf::from("/opt/blobfs/bin/mount"));
    assert_eq!(args(&command)[..2], ["--log-level", "warning"]);
    assert_eq!(command.destination(), Some(Path::new("/mnt/blobfs")));
}

#[rstest]
#[case(None, vec!["--membind=1", "/usr/local/bin/wsf-mount"])]
#[case(
    Some(CpuRange { first: 24, last: 47 }),
    vec!["--membind=1", "--physcpubind=24-47", "/usr/local/bin/wsf-mount"]
)]
fn test_numa_pinned_command(#[case] cpus: Option<CpuRange>, #[case] prefix: Vec<&str>) {
    let options = config::Driver::default();
    let runner = RecordingRunner::new();
    let driver = MountDriver::new(&options, Path::new("/bin/blobfs"), &runner);
    let mut target = target(BackendKind::WorkspaceFs, "workspace", Path::new("/mnt/wsfs1"));
    target.numa = Some(NumaHint { node: 1, cpus });

    let command = driver.command_for(&target);
    assert_eq!(command.program, PathBuf::from("numactl"));
    let args = args(&command);
    assert_eq!(args[..prefix.len()], prefix[..]);
    assert!(
        !args.iter().any(|a| a.starts_with("--cpunodebind")),
        "no cpu affinity without a known layout: {args:?}"
    );
    assert_eq!(args.last().map(String::as_str), Some("/mnt/wsfs1"));
    assert_eq!(
        command.envs,
        vec![(OsString::from(NUMA_NODE_VAR), OsString::from("1"))]
    );
}

#[rstest]
fn test_numa_duplicates_with_unknown_layout_only_bind_memory() {
    let options = config::Driver::default();
    let runner = RecordingRunner::new();
    let driver = MountDriver::new(&options, Path::new("/bin/blobfs"), &runner);
    for node in [0, 1] {
        let mut target = target(BackendKind::WorkspaceFs, "workspace", Path::new("/mnt/wsfs"));
        target.numa = Some(NumaHint::for_node(node, Some(16)));
        let args = args(&driver.command_for(&target));
        assert_eq!(args[0], format!("--membind={node}"));
        assert_eq!(args[1], "/usr/local/bin/wsf-mount");
    }
}

#[rstest]
fn test_ensure_destination_is_idempotent(tmpdir: tempfile::TempDir) {
    let destination = tmpdir.path().join("a/b/mnt");
    ensure_destination(&destination).expect("should create");
    ensure_destination(&destination).expect("should accept existing directory");
    assert!(destination.is_dir());
    let entries = std::fs::read_dir(tmpdir.path().join("a/b")).unwrap().count();
    assert_eq!(entries, 1);
}

#[rstest]
fn test_ensure_destination_replaces_stale_alias(tmpdir: tempfile::TempDir) {
    let target = tmpdir.path().join("elsewhere");
    std::fs::create_dir(&target).unwrap();
    let destination = tmpdir.path().join("wsfs");
    std::os::unix::fs::symlink(&target, &destination).unwrap();

    ensure_destination(&destination).expect("should replace the symlink");
    let meta = destination.symlink_metadata().unwrap();
    assert!(meta.is_dir());
    assert!(target.is_dir(), "the old link target is left alone");
}

#[rstest]
fn test_ensure_destination_rejects_files(tmpdir: tempfile::TempDir) {
    let destination = tmpdir.path().join("file");
    std::fs::write(&destination, "").unwrap();
    let err = ensure_destination(&destination).expect_err("files are not destinations");
    assert!(matches!(err, Error::DestinationNotADirectory(_)), "{err:?}");
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[rstest]
fn test_invoke_runs_driver(tmpdir: tempfile::TempDir) {
    init_logging();
    let options = config::Driver::default();
    let runner = RecordingRunner::new();
    let driver = MountDriver::new(&options, Path::new("/bin/blobfs"), &runner);
    let destination = tmpdir.path().join("wsfs");
    let target = target(BackendKind::WorkspaceFs, "workspace", &destination);

    let status = driver.invoke(&target).expect("driver should succeed");
    assert_eq!(status, MountStatus::Mounted);
    assert!(destination.is_dir());
    assert_eq!(runner.count(), 1);
}

#[rstest]
fn test_invoke_driver_failure_is_fatal(tmpdir: tempfile::TempDir) {
    let options = config::Driver::default();
    let runner = RecordingRunner::failing(3);
    let driver = MountDriver::new(&options, Path::new("/bin/blobfs"), &runner);
    let destination = tmpdir.path().join("wsfs");
    let target = target(BackendKind::WorkspaceFs, "workspace", &destination);

    let err = driver.invoke(&target).expect_err("driver exited non-zero");
    match &err {
        Error::DriverFailed { code, destination, .. } => {
            assert_eq!(*code, Some(3));
            assert!(destination.ends_with("wsfs"));
        }
        err => panic!("expected a driver failure, got {err:?}"),
    }
    assert_eq!(err.category(), ErrorCategory::Driver);
    assert_eq!(runner.count(), 1, "failures are not retried");
}

#[rstest]
fn test_invoke_missing_driver(tmpdir: tempfile::TempDir) {
    let options = config::Driver {
        wrapper_binary: tmpdir.path().join("no-such-driver"),
        ..Default::default()
    };
    let driver = MountDriver::new(&options, Path::new("/bin/blobfs"), &crate::ProcessRunner);
    let target = target(BackendKind::WorkspaceFs, "workspace", &tmpdir.path().join("wsfs"));

    let err = driver.invoke(&target).expect_err("driver does not exist");
    assert!(matches!(err, Error::DriverSpawn { .. }), "{err:?}");
}

#[rstest]
fn test_is_mounted_plain_directory(tmpdir: tempfile::TempDir) {
    let dir = tmpdir.path().join("plain");
    std::fs::create_dir(&dir).unwrap();
    assert!(!is_mounted(&dir).unwrap());
}
