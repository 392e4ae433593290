// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Turning configured selectors into the concrete set of mounts to make.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::region::{RegionCode, RegionResolver};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./descriptor_test.rs"]
mod descriptor_test;

/// The `regions` selector value that stands for every known region.
pub const ALL_REGIONS: &str = "all";

/// The name of the link in a regional root that points at this host's region.
pub const LOCAL_LINK: &str = "local";

/// The kinds of backend that can be mounted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    WorkspaceFs,
    Airstore,
    BlobStore,
    LegacyBlobFs,
}

impl BackendKind {
    /// The access profile requested from the mount driver.
    pub fn profile(&self) -> &'static str {
        match self {
            BackendKind::WorkspaceFs => "wsf",
            BackendKind::Airstore => "airstore",
            BackendKind::BlobStore => "manifold",
            BackendKind::LegacyBlobFs => "blobfs",
        }
    }
}

/// An inclusive range of cpu ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CpuRange {
    pub first: u32,
    pub last: u32,
}

impl std::fmt::Display for CpuRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// Pins a mount driver to a single NUMA node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NumaHint {
    pub node: u8,
    /// The cpus of the node, when the node layout is known
    pub cpus: Option<CpuRange>,
}

impl NumaHint {
    /// Only nodes of 12 or 24 cores have a known cpu layout.
    pub fn for_node(node: u8, cores_per_node: Option<u32>) -> Self {
        let cpus = match cores_per_node {
            Some(cores @ (12 | 24)) => {
                let first = u32::from(node) * cores;
                Some(CpuRange {
                    first,
                    last: first + cores - 1,
                })
            }
            Some(cores) => {
                tracing::debug!(cores, "unknown numa layout, no cpu affinity will be set");
                None
            }
            None => None,
        };
        Self { node, cpus }
    }
}

/// A single mount to be made by an external driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MountTarget {
    pub kind: BackendKind,
    pub source_uri: String,
    /// The backend-relative path of `source_uri`, empty for the backend root
    pub source_path: String,
    pub destination: PathBuf,
    pub numa: Option<NumaHint>,
    pub extra_flags: Vec<String>,
}

impl MountTarget {
    /// True when the whole backend is mounted rather than a path within it.
    pub fn mounts_backend_root(&self) -> bool {
        self.source_path.is_empty()
    }
}

/// The layout that a set of mounts takes on the local machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TopologyMode {
    SinglePath,
    MultiPath,
    RegionalRoots,
}

/// A selected topology along with the values that it was selected from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Topology {
    RegionalRoots(Vec<RegionCode>),
    MultiPath(Vec<String>),
    SinglePath,
}

impl Topology {
    /// Select the active topology, regions winning over multiple
    /// source paths, which win over a single path.
    pub fn select(selectors: &Selectors<'_>) -> Result<Self> {
        if let Some(regions) = selectors.regions {
            return Ok(Self::RegionalRoots(parse_regions(regions)?));
        }
        if let Some(paths) = selectors.source_paths {
            return Ok(Self::MultiPath(parse_source_paths(paths)?));
        }
        Ok(Self::SinglePath)
    }

    pub fn mode(&self) -> TopologyMode {
        match self {
            Self::RegionalRoots(_) => TopologyMode::RegionalRoots,
            Self::MultiPath(_) => TopologyMode::MultiPath,
            Self::SinglePath => TopologyMode::SinglePath,
        }
    }
}

/// The options of one backend that decide what gets mounted where.
#[derive(Clone, Copy, Debug)]
pub struct Selectors<'a> {
    pub source_path: &'a str,
    pub source_paths: Option<&'a str>,
    pub regions: Option<&'a str>,
    pub destination: &'a Path,
    pub paths_root: &'a Path,
    /// Only backends that are sharded by region have one
    pub regions_root: Option<&'a Path>,
    pub numa_duplicate: bool,
    pub numa_cores: Option<u32>,
    pub extra_flags: &'a [String],
}

/// Parse a comma-separated list of region codes, or `all`.
pub fn parse_regions(value: &str) -> Result<Vec<RegionCode>> {
    if value.trim().eq_ignore_ascii_case(ALL_REGIONS) {
        return Ok(RegionCode::ALL.to_vec());
    }
    let mut regions = Vec::new();
    for entry in value.split(',').map(str::trim) {
        if entry.is_empty() {
            return Err(malformed("regions", value));
        }
        let region = RegionCode::parse(entry)?;
        if regions.contains(&region) {
            return Err(malformed("regions", value));
        }
        regions.push(region);
    }
    Ok(regions)
}

/// Parse a comma-separated list of backend-relative paths.
pub fn parse_source_paths(value: &str) -> Result<Vec<String>> {
    let mut paths: Vec<String> = Vec::new();
    for entry in value.split(',') {
        let path = normalize_source_path(entry);
        if path.is_empty() || escapes_root(&path) || paths.contains(&path) {
            return Err(malformed("source_paths", value));
        }
        paths.push(path);
    }
    Ok(paths)
}

/// Parse a single backend-relative path, where empty is the backend root.
pub fn parse_source_path(value: &str) -> Result<String> {
    let path = normalize_source_path(value);
    if escapes_root(&path) {
        return Err(malformed("source_path", value));
    }
    Ok(path)
}

fn escapes_root(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
}

/// Backend paths are always relative to the backend root.
pub fn normalize_source_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

fn malformed(option: &'static str, value: &str) -> Error {
    Error::MalformedSelector {
        option,
        value: value.to_string(),
    }
}

/// A symlink to create, from `link` to `target`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Link {
    pub link: PathBuf,
    pub target: PathBuf,
}

/// Symlinks that must be established in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SymlinkChain(Vec<Link>);

impl SymlinkChain {
    pub fn push<L: Into<PathBuf>, T: Into<PathBuf>>(&mut self, link: L, target: T) {
        self.0.push(Link {
            link: link.into(),
            target: target.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A backend-relative path to list one directory at a time, starting at `base`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PrimeWalk {
    pub base: PathBuf,
    pub sub_path: String,
}

impl PrimeWalk {
    /// Every directory on the walk, from the base down to the full path.
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut current = self.base.clone();
        let mut dirs = vec![current.clone()];
        for component in self.sub_path.split('/').filter(|c| !c.is_empty()) {
            current.push(component);
            dirs.push(current.clone());
        }
        dirs
    }
}

/// Everything that needs to happen to mount one backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MountPlan {
    pub kind: BackendKind,
    pub mode: TopologyMode,
    pub targets: Vec<MountTarget>,
    /// Aliases to establish once all targets are mounted
    pub links: SymlinkChain,
    /// Directories to list once the aliases are in place
    pub prime: Option<PrimeWalk>,
}

/// Where a backend is reached.
#[derive(Clone, Debug)]
pub enum Endpoint<'a> {
    /// A uri template with a `{region}` placeholder
    Regional(&'a str),
    /// A uri that is the same no matter the region
    Fixed(String),
}

impl<'a> Endpoint<'a> {
    /// A bucket endpoint from a uri template with a `{bucket}` placeholder.
    pub fn bucket(template: &str, bucket: &str) -> Self {
        Self::Fixed(template.replace("{bucket}", bucket))
    }
}

/// Builds the mount plan for one backend.
pub struct DescriptorBuilder<'a> {
    kind: BackendKind,
    endpoint: Endpoint<'a>,
    selectors: Selectors<'a>,
}

impl<'a> DescriptorBuilder<'a> {
    pub fn new(kind: BackendKind, endpoint: Endpoint<'a>, selectors: Selectors<'a>) -> Self {
        Self {
            kind,
            endpoint,
            selectors,
        }
    }

    pub fn build(&self, resolver: &RegionResolver<'_>) -> Result<MountPlan> {
        let topology = Topology::select(&self.selectors)?;
        tracing::debug!(kind = %self.kind, mode = %topology.mode(), "selected mount topology");
        if self.selectors.numa_duplicate && topology.mode() != TopologyMode::SinglePath {
            tracing::debug!("numa duplicate mounts only apply to a single path, ignoring");
        }
        let mode = topology.mode();
        let (targets, links, prime) = match topology {
            Topology::SinglePath => (self.single_path(resolver)?, SymlinkChain::default(), None),
            Topology::MultiPath(paths) => {
                let (targets, links) = self.multi_path(&paths, resolver)?;
                (targets, links, None)
            }
            Topology::RegionalRoots(regions) => self.regional_roots(&regions, resolver)?,
        };
        Ok(MountPlan {
            kind: self.kind,
            mode,
            targets,
            links,
            prime,
        })
    }

    fn base_uri(&self, resolver: &RegionResolver<'_>) -> Result<String> {
        match &self.endpoint {
            Endpoint::Regional(template) => Ok(expand_region(template, resolver.host_region()?)),
            Endpoint::Fixed(uri) => Ok(uri.clone()),
        }
    }

    fn target(
        &self,
        base_uri: &str,
        source_path: String,
        destination: PathBuf,
        numa: Option<NumaHint>,
    ) -> MountTarget {
        MountTarget {
            kind: self.kind,
            source_uri: join_uri(base_uri, &source_path),
            source_path,
            destination,
            numa,
            extra_flags: self.selectors.extra_flags.to_vec(),
        }
    }

    fn single_path(&self, resolver: &RegionResolver<'_>) -> Result<Vec<MountTarget>> {
        let source_path = parse_source_path(self.selectors.source_path)?;
        let base = self.base_uri(resolver)?;
        let destination = self.selectors.destination.to_owned();
        if !self.selectors.numa_duplicate {
            return Ok(vec![self.target(&base, source_path, destination, None)]);
        }

        let mut second = OsString::from(destination.as_os_str());
        second.push("1");
        let cores = self.selectors.numa_cores;
        Ok(vec![
            self.target(
                &base,
                source_path.clone(),
                destination,
                Some(NumaHint::for_node(0, cores)),
            ),
            self.target(
                &base,
                source_path,
                PathBuf::from(second),
                Some(NumaHint::for_node(1, cores)),
            ),
        ])
    }

    fn multi_path(
        &self,
        paths: &[String],
        resolver: &RegionResolver<'_>,
    ) -> Result<(Vec<MountTarget>, SymlinkChain)> {
        let base = self.base_uri(resolver)?;
        let targets: Vec<_> = paths
            .iter()
            .map(|path| {
                let destination = self.selectors.paths_root.join(path);
                self.target(&base, path.clone(), destination, None)
            })
            .collect();

        let mut links = SymlinkChain::default();
        if let Some(first) = targets.first() {
            links.push(self.selectors.destination, &first.destination);
        }
        Ok((targets, links))
    }

    fn regional_roots(
        &self,
        regions: &[RegionCode],
        resolver: &RegionResolver<'_>,
    ) -> Result<(Vec<MountTarget>, SymlinkChain, Option<PrimeWalk>)> {
        let (Endpoint::Regional(template), Some(root)) =
            (&self.endpoint, self.selectors.regions_root)
        else {
            return Err(malformed("regions", self.selectors.regions.unwrap_or_default()));
        };
        let sub_path = parse_source_path(self.selectors.source_path)?;

        let targets = regions
            .iter()
            .map(|region| {
                let base = expand_region(template, *region);
                self.target(&base, String::new(), root.join(region.as_str()), None)
            })
            .collect();

        let mut links = SymlinkChain::default();
        let host = resolver.host_region()?;
        if !regions.contains(&host) {
            tracing::warn!(
                %host,
                "this host's region is not being mounted, no local aliases will be created"
            );
            return Ok((targets, links, None));
        }

        let local = root.join(LOCAL_LINK);
        let alias_target = if sub_path.is_empty() {
            local.clone()
        } else {
            local.join(&sub_path)
        };
        links.push(&local, root.join(host.as_str()));
        links.push(self.selectors.destination, alias_target);
        let prime = PrimeWalk {
            base: local,
            sub_path,
        };
        Ok((targets, links, Some(prime)))
    }
}

fn expand_region(template: &str, region: RegionCode) -> String {
    template.replace("{region}", region.as_str())
}

fn join_uri(base: &str, path: &str) -> String {
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }
}
