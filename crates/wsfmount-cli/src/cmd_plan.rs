// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use clap::Args;
use miette::{IntoDiagnostic, Result};
use wsfmount::{Config, MountSession, ProcessRunner, Stage};

/// Print the mounts that would be made as json, without mounting anything
#[derive(Debug, Default, Args)]
pub struct CmdPlan {
    /// Only print the plans for this stage (workspace_fs, legacy_blob_fs, manifuse)
    #[clap(long)]
    stage: Option<Stage>,
}

impl CmdPlan {
    pub fn run(&self, config: &Config) -> Result<i32> {
        let host = wsfmount::host_identity(config);
        let runner = ProcessRunner;
        let session = MountSession::new(config, host.as_ref(), &runner);

        let mut plans = Vec::new();
        for stage in Stage::ALL {
            if self.stage.is_some_and(|only| only != stage) {
                continue;
            }
            plans.extend(session.plan_stage(stage)?);
        }
        let out = serde_json::to_string_pretty(&plans).into_diagnostic()?;
        println!("{out}");
        Ok(0)
    }
}
