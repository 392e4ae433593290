// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use clap::Args;
use miette::Result;
use wsfmount::{Config, RegionResolver};

/// Print the region code that this host resolves to
#[derive(Debug, Default, Args)]
pub struct CmdRegion {}

impl CmdRegion {
    pub fn run(&self, config: &Config) -> Result<i32> {
        let host = wsfmount::host_identity(config);
        let resolver = RegionResolver::new(host.as_ref(), config.host.region.clone());
        println!("{}", resolver.host_region()?);
        Ok(0)
    }
}
