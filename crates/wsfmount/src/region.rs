// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Mapping of host identity onto the backend region that serves it.

use std::str::FromStr;

use once_cell::unsync::OnceCell;
use serde::Serialize;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./region_test.rs"]
mod region_test;

/// Region aliases that are no longer in use, and the code that replaced them.
pub const DEPRECATED_REGION_ALIASES: &[(&str, &str)] = &[("ftw", "nao")];

/// A datacenter or cluster that hosts its own backend endpoints.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegionCode {
    Pci,
    Eag,
    Gtn,
    Nha,
    Snb,
    Nao,
}

impl RegionCode {
    /// Every known region, in the order that hostnames are matched against them.
    pub const ALL: [RegionCode; 6] = [
        RegionCode::Pci,
        RegionCode::Eag,
        RegionCode::Gtn,
        RegionCode::Nha,
        RegionCode::Snb,
        RegionCode::Nao,
    ];

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Parse a region code, rewriting deprecated aliases first.
    pub fn parse<S: AsRef<str>>(value: S) -> Result<Self> {
        let normalized = normalize_alias(&value.as_ref().trim().to_lowercase());
        RegionCode::from_str(&normalized).map_err(|_| Error::UnknownRegion(normalized))
    }
}

/// Rewrite any deprecated region alias found in the given value.
pub fn normalize_alias(value: &str) -> String {
    let mut value = value.to_string();
    for (deprecated, replacement) in DEPRECATED_REGION_ALIASES {
        if value.contains(deprecated) {
            let rewritten = value.replace(deprecated, replacement);
            tracing::warn!("region {value:?} is deprecated, using {rewritten:?} instead");
            value = rewritten;
        }
    }
    value
}

/// Determine the region for a host.
///
/// An explicit override always wins over the hostname. A hostname that
/// does not contain any of the known region tokens cannot be resolved.
pub fn resolve(hostname: &str, explicit_override: Option<&str>) -> Result<RegionCode> {
    if let Some(region) = explicit_override.filter(|r| !r.trim().is_empty()) {
        tracing::debug!(%region, "using explicit region override");
        return RegionCode::parse(region);
    }
    let lowered = hostname.to_lowercase();
    RegionCode::ALL
        .into_iter()
        .find(|code| lowered.contains(code.as_str()))
        .ok_or_else(|| Error::UnresolvedRegion {
            hostname: hostname.to_string(),
        })
}

/// A source of the identity of the current machine.
pub trait HostIdentity {
    fn hostname(&self) -> Result<String>;
}

/// Identifies the machine that this process is running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl HostIdentity for SystemHost {
    fn hostname(&self) -> Result<String> {
        whoami::fallible::hostname().map_err(Error::Hostname)
    }
}

/// A fixed host identity, used when the hostname is configured explicitly.
#[derive(Debug, Clone)]
pub struct StaticHost(String);

impl StaticHost {
    pub fn new<S: Into<String>>(hostname: S) -> Self {
        Self(hostname.into())
    }
}

impl HostIdentity for StaticHost {
    fn hostname(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Resolves the region of the current host at most once.
pub struct RegionResolver<'a> {
    host: &'a dyn HostIdentity,
    explicit_override: Option<String>,
    resolved: OnceCell<RegionCode>,
}

impl<'a> RegionResolver<'a> {
    pub fn new(host: &'a dyn HostIdentity, explicit_override: Option<String>) -> Self {
        Self {
            host,
            explicit_override,
            resolved: OnceCell::new(),
        }
    }

    /// The region of this host, resolving it on first use.
    pub fn host_region(&self) -> Result<RegionCode> {
        self.resolved
            .get_or_try_init(|| -> Result<RegionCode> {
                let hostname = match self.explicit_override.as_deref() {
                    Some(r) if !r.trim().is_empty() => String::new(),
                    _ => self.host.hostname()?,
                };
                let region = resolve(&hostname, self.explicit_override.as_deref())?;
                tracing::debug!(%region, %hostname, "resolved host region");
                Ok(region)
            })
            .copied()
    }
}
