// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use wsfmount::Config;

#[cfg(test)]
#[path = "./args_test.rs"]
mod args_test;

/// Read by [`configure_logging`] when no verbosity flags are given.
pub const WSFMOUNT_LOG: &str = "WSFMOUNT_LOG";

/// Attach remote workspace filesystems and blob stores to this machine
#[derive(Debug, Parser)]
#[clap(name = "wsfmount", version = wsfmount::VERSION)]
pub struct Opt {
    /// Make output more verbose, can be specified more than once
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Load this configuration file after the system and user ones
    #[clap(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use this region instead of deriving one from the hostname
    #[clap(long, global = true, env = "WSFMOUNT_HOST_REGION")]
    pub region: Option<String>,

    #[clap(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Mount(super::cmd_mount::CmdMount),
    Plan(super::cmd_plan::CmdPlan),
    Region(super::cmd_region::CmdRegion),
}

impl Opt {
    /// Load the configuration, with command line flags taking precedence.
    pub fn load_config(&self) -> wsfmount::Result<Config> {
        let mut config = wsfmount::load_config(self.config.as_deref())?;
        if let Some(region) = self.region.as_deref().filter(|r| !r.trim().is_empty()) {
            config.host.region = Some(region.to_string());
        }
        Ok(config)
    }

    pub fn run(&self, config: &Config) -> Result<i32> {
        match &self.cmd {
            None => super::cmd_mount::CmdMount::default().run(config),
            Some(Command::Mount(cmd)) => cmd.run(config),
            Some(Command::Plan(cmd)) => cmd.run(config),
            Some(Command::Region(cmd)) => cmd.run(config),
        }
    }
}

/// The tracing filter directives for the given verbosity.
///
/// With no verbosity, any existing `WSFMOUNT_LOG` value is used, and
/// `RUST_LOG` is always appended as a set of overrides.
pub fn log_directives(
    verbosity: u8,
    existing: Option<String>,
    overrides: Option<String>,
) -> String {
    let mut config = match verbosity {
        0 => existing.unwrap_or_else(|| "wsfmount=info,warn".to_string()),
        1 => "wsfmount=debug,info".to_string(),
        2 => "wsfmount=trace,info".to_string(),
        _ => "trace".to_string(),
    };
    if let Some(overrides) = overrides {
        config.push(',');
        config.push_str(&overrides);
    }
    config
}

pub fn configure_logging(verbosity: u8) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Layer;

    let config = log_directives(
        verbosity,
        std::env::var(WSFMOUNT_LOG).ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let env_filter = tracing_subscriber::filter::EnvFilter::new(config);
    let stderr_log = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(verbosity > 2)
        .with_writer(std::io::stderr);
    let sub = tracing_subscriber::registry().with(stderr_log.with_filter(env_filter));
    if let Err(err) = tracing::subscriber::set_global_default(sub) {
        eprintln!("failed to initialize logging: {err}");
    }
}

/// Report the outcome of a command, returning the process exit code.
pub fn handle_result(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<wsfmount::Error>() {
                Some(inner) => {
                    tracing::error!(category = %inner.category(), "mount session failed")
                }
                None => tracing::error!("mount session failed"),
            }
            eprintln!("{err:?}");
            1
        }
    }
}
