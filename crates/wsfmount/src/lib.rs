// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Attach remote workspace filesystems and blob stores to this machine.

#![deny(unsafe_op_in_unsafe_fn)]

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod fixtures;

pub mod config;
pub mod descriptor;
pub mod driver;
mod error;
pub mod region;
pub mod session;
pub mod symlink;

pub use descriptor::{
    BackendKind,
    DescriptorBuilder,
    MountPlan,
    MountTarget,
    NumaHint,
    SymlinkChain,
    Topology,
    TopologyMode,
};
pub use driver::{CommandRunner, DriverCommand, MountDriver, ProcessRunner};
pub use error::{Error, ErrorCategory, Result};
pub use region::{HostIdentity, RegionCode, RegionResolver, StaticHost, SystemHost};
pub use session::{MountSession, SessionReport, Stage, StageOutcome};

pub use self::config::{load_config, Config};

/// The host identity described by the given config.
///
/// A configured hostname takes the place of the real one.
pub fn host_identity(config: &Config) -> Box<dyn HostIdentity> {
    match config.host.hostname.as_deref().map(str::trim) {
        Some(hostname) if !hostname.is_empty() => Box::new(StaticHost::new(hostname)),
        _ => Box::new(SystemHost),
    }
}
