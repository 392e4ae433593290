// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Invocation of the external mount drivers.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use crate::config;
use crate::descriptor::{BackendKind, MountTarget, NumaHint};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./driver_test.rs"]
mod driver_test;

/// Exported to a driver that has been pinned to a NUMA node.
pub const NUMA_NODE_VAR: &str = "WSF_NUMA_NODE";

/// A fully formed external command, with every argument kept separate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
}

impl DriverCommand {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(&mut self, key: K, value: V) -> &mut Self {
        self.envs
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// The final argument of every driver command is its destination.
    pub fn destination(&self) -> Option<&Path> {
        self.args.last().map(Path::new)
    }

    pub fn to_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

impl std::fmt::Display for DriverCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in self.envs.iter() {
            write!(f, "{}={} ", key.to_string_lossy(), value.to_string_lossy())?;
        }
        write!(f, "{}", self.program.display())?;
        for arg in self.args.iter() {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs external commands to completion.
pub trait CommandRunner {
    fn run(&self, command: &DriverCommand) -> std::io::Result<ExitStatus>;
}

/// Runs commands as child processes of this one, blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &DriverCommand) -> std::io::Result<ExitStatus> {
        // the driver output is left attached to ours, some drivers
        // stay in the background and would keep a captured pipe open
        command.to_command().status()
    }
}

/// The outcome of asking for a single target to be mounted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountStatus {
    Mounted,
    AlreadyMounted,
}

/// Calls the configured mount driver for each target.
pub struct MountDriver<'a> {
    options: &'a config::Driver,
    blobfs_driver: &'a Path,
    runner: &'a dyn CommandRunner,
}

impl<'a> MountDriver<'a> {
    pub fn new(
        options: &'a config::Driver,
        blobfs_driver: &'a Path,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            options,
            blobfs_driver,
            runner,
        }
    }

    /// Mount a single target, creating its destination as needed.
    pub fn invoke(&self, target: &MountTarget) -> Result<MountStatus> {
        ensure_destination(&target.destination)?;
        if self.options.skip_mounted && is_mounted(&target.destination)? {
            tracing::info!(destination = ?target.destination, "already mounted, skipping");
            return Ok(MountStatus::AlreadyMounted);
        }

        let command = self.command_for(target);
        tracing::debug!("{command}");
        let status = self.runner.run(&command).map_err(|source| Error::DriverSpawn {
            program: command.program.clone(),
            source,
        })?;
        if !status.success() {
            return Err(Error::DriverFailed {
                program: command.program,
                destination: target.destination.clone(),
                code: status.code(),
            });
        }
        tracing::info!(
            source = %target.source_uri,
            destination = ?target.destination,
            "mounted {}",
            target.kind
        );
        Ok(MountStatus::Mounted)
    }

    /// Build the driver command that would mount the given target.
    pub fn command_for(&self, target: &MountTarget) -> DriverCommand {
        let mut command = match target.kind {
            BackendKind::LegacyBlobFs => self.legacy_blobfs_command(target),
            _ if self.options.legacy => self.wrapper_script_command(target),
            _ => self.wrapper_binary_command(target),
        };
        for flag in target.extra_flags.iter() {
            command.arg(flag);
        }
        command.arg(&target.source_uri);
        command.arg(&target.destination);

        match target.numa {
            Some(numa) => self.pin_to_node(command, numa),
            None => command,
        }
    }

    fn wrapper_binary_command(&self, target: &MountTarget) -> DriverCommand {
        let mut command = DriverCommand::new(&self.options.wrapper_binary);
        command
            .arg("mount")
            .arg("--profile")
            .arg(target.kind.profile())
            .arg("--log-level")
            .arg(&self.options.log_level);
        if !self.options.identity.is_empty() {
            command.arg("--identity").arg(&self.options.identity);
        }
        if target.mounts_backend_root() {
            command.arg("--mount-root");
        }
        command
    }

    fn wrapper_script_command(&self, target: &MountTarget) -> DriverCommand {
        let mut command = DriverCommand::new(&self.options.wrapper_script);
        command
            .arg("-o")
            .arg(format!("profile={}", target.kind.profile()))
            .arg("-o")
            .arg(format!("log_level={}", self.options.log_level));
        if !self.options.identity.is_empty() {
            command
                .arg("-o")
                .arg(format!("identity={}", self.options.identity));
        }
        if target.mounts_backend_root() {
            command.arg("-o").arg("mount_root");
        }
        command
    }

    fn legacy_blobfs_command(&self, target: &MountTarget) -> DriverCommand {
        let mut command = DriverCommand::new(self.blobfs_driver);
        command.arg("--log-level").arg(&self.options.log_level);
        if !self.options.identity.is_empty() {
            command.arg("--identity").arg(&self.options.identity);
        }
        if target.mounts_backend_root() {
            command.arg("--mount-root");
        }
        command
    }

    fn pin_to_node(&self, inner: DriverCommand, numa: NumaHint) -> DriverCommand {
        let mut command = DriverCommand::new(&self.options.numactl);
        command.arg(format!("--membind={}", numa.node));
        // without a known cpu layout only the memory is bound
        if let Some(cpus) = numa.cpus {
            command.arg(format!("--physcpubind={cpus}"));
        }
        command.arg(&inner.program);
        command.args.extend(inner.args);
        command.envs = inner.envs;
        command.env(NUMA_NODE_VAR, numa.node.to_string());
        command
    }
}

/// Make sure that a mount destination exists as a directory.
///
/// A symlink left behind by a different topology is replaced with a
/// new directory, anything else that is not a directory is an error.
pub fn ensure_destination(path: &Path) -> Result<()> {
    let create_err = |err| Error::CreateDestination(path.to_owned(), err);
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(meta) if meta.file_type().is_symlink() => {
            tracing::info!(?path, "replacing stale alias with a mount destination");
            std::fs::remove_file(path).map_err(create_err)?;
        }
        Ok(_) => return Err(Error::DestinationNotADirectory(path.to_owned())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(create_err(err)),
    }
    tracing::debug!(?path, "creating mount destination");
    std::fs::create_dir_all(path).map_err(create_err)
}

/// True if something is mounted at the given directory.
pub fn is_mounted<P: AsRef<Path>>(target: P) -> Result<bool> {
    let target = target.as_ref();
    let Some(parent) = target.parent() else {
        return Ok(false);
    };

    let stat = |path: &Path| {
        nix::sys::stat::stat(path)
            .map_err(|errno| Error::InvalidPath(path.to_owned(), std::io::Error::from(errno)))
    };
    let st_parent = stat(parent)?;
    let st_target = stat(target)?;

    Ok(st_target.st_dev != st_parent.st_dev)
}
