// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Diagnostic, Debug, Error)]
#[diagnostic(
    url(
        "https://spkenv.dev/error_codes#{}",
        self.code().unwrap_or_else(|| Box::new("wsfmount::generic"))
    )
)]
pub enum Error {
    #[error("Could not determine a region for host '{hostname}'")]
    #[diagnostic(
        code("wsfmount::unresolved_region"),
        help("Set WSFMOUNT_HOST_REGION (or pass --region) to one of: pci, eag, gtn, nha, snb, nao")
    )]
    UnresolvedRegion { hostname: String },
    #[error("Unrecognized region code: {0:?}")]
    #[diagnostic(code("wsfmount::unknown_region"))]
    UnknownRegion(String),
    #[error("Malformed {option} list: {value:?}")]
    #[diagnostic(
        code("wsfmount::malformed_selector"),
        help("Provide a comma-separated list with no empty or duplicate entries")
    )]
    MalformedSelector { option: &'static str, value: String },
    #[error("Failed to determine the hostname of this machine")]
    Hostname(#[source] io::Error),

    #[error("Failed to create mount destination {0}")]
    CreateDestination(PathBuf, #[source] io::Error),
    #[error("Mount destination exists and is not a directory: {0}")]
    DestinationNotADirectory(PathBuf),
    #[error("Failed to launch mount driver {program}")]
    DriverSpawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Mount driver {program} failed for {destination} with code {code:?}")]
    #[diagnostic(code("wsfmount::driver_failed"))]
    DriverFailed {
        program: PathBuf,
        destination: PathBuf,
        code: Option<i32>,
    },

    #[error("Failed to create symlink {link} -> {target}")]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Refusing to replace {0}, it exists and is not a symlink")]
    #[diagnostic(
        code("wsfmount::alias_occupied"),
        help("Remove the existing entry, or choose another wsf.destination")
    )]
    AliasOccupied(PathBuf),
    #[error("Failed to list {path} while priming the lookup cache")]
    #[diagnostic(
        code("wsfmount::cache_priming"),
        help(
            "This usually means the attribution identity cannot read this path, \
             or the driver never materialized the directory entry"
        )
    )]
    CachePriming {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid path {0}")]
    InvalidPath(PathBuf, #[source] io::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

/// The broad kind of failure, used to describe how a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorCategory {
    /// The options given to the session cannot describe a mount.
    Configuration,
    /// An external mount driver could not be run or exited non-zero.
    Driver,
    /// A mounted tree could not be verified after the fact.
    Verification,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UnresolvedRegion { .. }
            | Error::UnknownRegion(_)
            | Error::MalformedSelector { .. }
            | Error::Hostname(_)
            | Error::DestinationNotADirectory(_)
            | Error::AliasOccupied(_)
            | Error::InvalidPath(..)
            | Error::Config(_) => ErrorCategory::Configuration,
            Error::CreateDestination(..)
            | Error::DriverSpawn { .. }
            | Error::DriverFailed { .. } => ErrorCategory::Driver,
            Error::Symlink { .. } | Error::CachePriming { .. } => ErrorCategory::Verification,
        }
    }
}
