// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Sequencing of every configured backend mount for one invocation.

use crate::config::Config;
use crate::descriptor::{BackendKind, DescriptorBuilder, Endpoint, MountPlan, MountTarget};
use crate::driver::{CommandRunner, MountDriver, MountStatus};
use crate::region::{HostIdentity, RegionCode, RegionResolver};
use crate::{symlink, Result};

#[cfg(test)]
#[path = "./session_test.rs"]
mod session_test;

/// The stages of a session, in the order that they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// The workspace filesystem, followed by airstore when requested
    WorkspaceFs,
    LegacyBlobFs,
    Manifuse,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::WorkspaceFs, Stage::LegacyBlobFs, Stage::Manifuse];
}

/// How a single stage finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage's kill switch was set
    Skipped,
    Completed { mounted: usize },
}

/// A kill switch that was checked, and whether it was set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KillSwitch {
    pub stage: Stage,
    pub engaged: bool,
}

/// What a completed session did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub mounted: Vec<MountTarget>,
    pub kill_switches: Vec<KillSwitch>,
}

/// Mounts every configured backend, one target at a time.
///
/// The first failure ends the session. Nothing that was mounted before
/// the failure is undone.
pub struct MountSession<'a> {
    config: &'a Config,
    resolver: RegionResolver<'a>,
    driver: MountDriver<'a>,
    report: SessionReport,
}

impl<'a> MountSession<'a> {
    pub fn new(
        config: &'a Config,
        host: &'a dyn HostIdentity,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            resolver: RegionResolver::new(host, config.host.region.clone()),
            driver: MountDriver::new(&config.driver, &config.blobfs.driver, runner),
            report: SessionReport::default(),
        }
    }

    /// The region of this host, as resolved for the workspace filesystem.
    pub fn host_region(&self) -> Result<RegionCode> {
        self.resolver.host_region()
    }

    /// Run every stage in order, stopping at the first failure.
    pub fn run(mut self) -> Result<SessionReport> {
        for stage in Stage::ALL {
            match self.run_stage(stage)? {
                StageOutcome::Skipped => {}
                StageOutcome::Completed { mounted } => {
                    tracing::debug!(%stage, mounted, "stage complete");
                }
            }
        }
        Ok(self.report)
    }

    /// Run a single stage, honoring its kill switch.
    pub fn run_stage(&mut self, stage: Stage) -> Result<StageOutcome> {
        let engaged = self.kill_switch(stage);
        self.report.kill_switches.push(KillSwitch { stage, engaged });
        if engaged {
            tracing::info!("{stage} is disabled, skipping");
            return Ok(StageOutcome::Skipped);
        }

        let mut mounted = 0;
        for plan in self.plan_stage(stage)? {
            mounted += self.mount_plan(&plan)?;
        }
        Ok(StageOutcome::Completed { mounted })
    }

    /// The plans that a stage would mount, without mounting anything.
    ///
    /// A stage that has been disabled has no plans.
    pub fn plan_stage(&self, stage: Stage) -> Result<Vec<MountPlan>> {
        if self.kill_switch(stage) {
            return Ok(Vec::new());
        }
        match stage {
            Stage::WorkspaceFs => self.plan_workspace_fs(),
            Stage::LegacyBlobFs => self.plan_legacy_blobfs(),
            Stage::Manifuse => self.plan_manifuse(),
        }
    }

    fn kill_switch(&self, stage: Stage) -> bool {
        match stage {
            Stage::WorkspaceFs => self.config.wsf.disabled,
            Stage::LegacyBlobFs => self.config.blobfs.disabled,
            Stage::Manifuse => self.config.manifuse.disabled,
        }
    }

    fn plan_workspace_fs(&self) -> Result<Vec<MountPlan>> {
        let wsf = &self.config.wsf;
        let mut plans = vec![
            DescriptorBuilder::new(
                BackendKind::WorkspaceFs,
                Endpoint::Regional(&wsf.uri_template),
                wsf.selectors(),
            )
            .build(&self.resolver)?,
        ];

        let airstore = &self.config.airstore;
        if !airstore.enabled {
            tracing::debug!("airstore was not requested, skipping");
            return Ok(plans);
        }
        plans.push(
            DescriptorBuilder::new(
                BackendKind::Airstore,
                Endpoint::Regional(&airstore.uri_template),
                airstore.selectors(),
            )
            .build(&self.resolver)?,
        );
        Ok(plans)
    }

    fn plan_legacy_blobfs(&self) -> Result<Vec<MountPlan>> {
        let blobfs = &self.config.blobfs;
        if blobfs.bucket.trim().is_empty() {
            tracing::info!("no bucket configured for blobfs, nothing to mount");
            return Ok(Vec::new());
        }
        let plan = DescriptorBuilder::new(
            BackendKind::LegacyBlobFs,
            Endpoint::bucket(&blobfs.uri_template, blobfs.bucket.trim()),
            blobfs.selectors(),
        )
        .build(&self.resolver)?;
        Ok(vec![plan])
    }

    fn plan_manifuse(&self) -> Result<Vec<MountPlan>> {
        let manifuse = &self.config.manifuse;
        if manifuse.bucket.trim().is_empty() {
            tracing::info!("no bucket configured for manifuse, nothing to mount");
            return Ok(Vec::new());
        }
        let plan = DescriptorBuilder::new(
            BackendKind::BlobStore,
            Endpoint::bucket(&manifuse.uri_template, manifuse.bucket.trim()),
            manifuse.selectors(),
        )
        .build(&self.resolver)?;
        Ok(vec![plan])
    }

    fn mount_plan(&mut self, plan: &MountPlan) -> Result<usize> {
        tracing::debug!(
            kind = %plan.kind,
            mode = %plan.mode,
            targets = plan.targets.len(),
            "mounting"
        );
        let mut mounted = 0;
        for target in plan.targets.iter() {
            if self.driver.invoke(target)? == MountStatus::Mounted {
                self.report.mounted.push(target.clone());
                mounted += 1;
            }
        }
        symlink::apply(plan)?;
        Ok(mounted)
    }
}
