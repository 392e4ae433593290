// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use clap::Args;
use miette::Result;
use wsfmount::{Config, MountSession, ProcessRunner};

/// Mount every configured backend (the default)
#[derive(Debug, Default, Args)]
pub struct CmdMount {
    /// Mount onto destinations even if something is already mounted there
    #[clap(long)]
    remount: bool,
}

impl CmdMount {
    pub fn run(&self, config: &Config) -> Result<i32> {
        let mut config = config.clone();
        if self.remount {
            config.driver.skip_mounted = false;
        }

        let host = wsfmount::host_identity(&config);
        let runner = ProcessRunner;
        let report = MountSession::new(&config, host.as_ref(), &runner).run()?;

        for switch in report.kill_switches.iter().filter(|k| k.engaged) {
            tracing::info!(stage = %switch.stage, "kill switch was set");
        }
        tracing::info!(mounted = report.mounted.len(), "all mounts complete");
        Ok(0)
    }
}
