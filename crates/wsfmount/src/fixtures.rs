// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::cell::RefCell;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;

use rstest::fixture;

use crate::config::Config;
use crate::driver::{CommandRunner, DriverCommand};

pub fn init_logging() {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::TRACE)
        .without_time()
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(sub);
}

#[fixture]
pub fn tmpdir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("wsfmount-test-")
        .tempdir()
        .expect("failed to create dir for test")
}

/// A config with every destination placed under the given root.
pub fn config_in(root: &Path) -> Config {
    let mut config = Config::default();
    config.wsf.destination = root.join("wsfs");
    config.wsf.paths_root = root.join("wsfs_paths");
    config.wsf.regions_root = root.join("wsfs_regions");
    config.airstore.destination = root.join("airstore");
    config.blobfs.destination = root.join("blobfs");
    config.blobfs.paths_root = root.join("blobfs_paths");
    config.manifuse.destination = root.join("manifold");
    config.manifuse.paths_root = root.join("manifold_paths");
    config
}

/// Records every command instead of running it.
///
/// Successful commands stand in for a mount by creating the configured
/// directories inside of the destination.
#[derive(Default)]
pub struct RecordingRunner {
    pub commands: RefCell<Vec<DriverCommand>>,
    populate: Vec<String>,
    exit_code: i32,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create these backend paths in each destination that is mounted.
    pub fn populating(paths: &[&str]) -> Self {
        Self {
            populate: paths.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Exit with this code from every command.
    pub fn failing(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.commands.borrow().len()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &DriverCommand) -> std::io::Result<ExitStatus> {
        self.commands.borrow_mut().push(command.clone());
        if self.exit_code == 0 {
            if let Some(destination) = command.destination() {
                for path in self.populate.iter() {
                    std::fs::create_dir_all(destination.join(path))?;
                }
            }
        }
        Ok(ExitStatus::from_raw(self.exit_code << 8))
    }
}
