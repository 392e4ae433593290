// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};

use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::{Deserialize, Deserializer};

use crate::descriptor::Selectors;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

/// Environment variables with this prefix are loaded as configuration
/// overrides, eg: `WSFMOUNT_WSF_REGIONS=all` sets `wsf.regions`.
pub const ENV_PREFIX: &str = "WSFMOUNT_";

static SYSTEM_CONFIG: &str = "/etc/wsfmount";

/// Identity of the machine that mounts are being made on.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Host {
    /// Use this region instead of deriving one from the hostname
    pub region: Option<String>,
    /// Use this hostname instead of asking the operating system
    pub hostname: Option<String>,
}

/// How the external mount drivers are invoked.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Driver {
    /// Call the legacy wrapper script instead of the wrapper binary
    pub legacy: bool,
    pub wrapper_binary: PathBuf,
    pub wrapper_script: PathBuf,
    /// Used to pin a driver to a single NUMA node
    pub numactl: PathBuf,
    /// Verbosity passed along to every driver
    pub log_level: String,
    /// Attribution identity passed along to every driver, if not empty
    pub identity: String,
    /// Leave destinations that already have something mounted on them alone
    pub skip_mounted: bool,
}

impl Default for Driver {
    fn default() -> Self {
        Self {
            legacy: false,
            wrapper_binary: PathBuf::from("/usr/local/bin/wsf-mount"),
            wrapper_script: PathBuf::from("/usr/local/bin/wsf_mount.sh"),
            numactl: PathBuf::from("numactl"),
            log_level: String::from("warning"),
            identity: String::new(),
            skip_mounted: true,
        }
    }
}

/// The region-sharded workspace filesystem.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorkspaceFs {
    /// Skip this backend entirely
    pub disabled: bool,
    /// The backend endpoint, where `{region}` is replaced with a region code
    pub uri_template: String,
    pub source_path: String,
    /// Comma-separated backend paths, each mounted under `paths_root`
    pub source_paths: Option<String>,
    /// Comma-separated region codes, or `all`, each mounted under `regions_root`
    pub regions: Option<String>,
    pub destination: PathBuf,
    pub paths_root: PathBuf,
    pub regions_root: PathBuf,
    /// Mount a second copy of a single path, one per NUMA node
    pub numa_duplicate: bool,
    /// Cores per NUMA node, used to pin each duplicate mount
    pub numa_cores: Option<u32>,
    #[serde(deserialize_with = "string_or_list")]
    pub extra_flags: Vec<String>,
}

impl Default for WorkspaceFs {
    fn default() -> Self {
        Self {
            disabled: false,
            uri_template: String::from("wsfs://{region}.wsfs.internal"),
            source_path: String::from("workspace"),
            source_paths: None,
            regions: None,
            destination: PathBuf::from("/mnt/wsfs"),
            paths_root: PathBuf::from("/mnt/wsfs_paths"),
            regions_root: PathBuf::from("/mnt/wsfs_regions"),
            numa_duplicate: false,
            numa_cores: None,
            extra_flags: Vec::new(),
        }
    }
}

impl WorkspaceFs {
    pub fn selectors(&self) -> Selectors<'_> {
        Selectors {
            source_path: &self.source_path,
            source_paths: non_empty(&self.source_paths),
            regions: non_empty(&self.regions),
            destination: &self.destination,
            paths_root: &self.paths_root,
            regions_root: Some(&self.regions_root),
            numa_duplicate: self.numa_duplicate,
            numa_cores: self.numa_cores,
            extra_flags: &self.extra_flags,
        }
    }
}

/// The regional airstore cache, mounted alongside the workspace filesystem.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Airstore {
    /// Airstore is only mounted when explicitly requested
    pub enabled: bool,
    pub uri_template: String,
    pub source_path: String,
    pub destination: PathBuf,
    #[serde(deserialize_with = "string_or_list")]
    pub extra_flags: Vec<String>,
}

impl Default for Airstore {
    fn default() -> Self {
        Self {
            enabled: false,
            uri_template: String::from("airstore://{region}.airstore.internal"),
            source_path: String::new(),
            destination: PathBuf::from("/mnt/airstore"),
            extra_flags: Vec::new(),
        }
    }
}

impl Airstore {
    pub fn selectors(&self) -> Selectors<'_> {
        Selectors {
            source_path: &self.source_path,
            source_paths: None,
            regions: None,
            destination: &self.destination,
            paths_root: &self.destination,
            regions_root: None,
            numa_duplicate: false,
            numa_cores: None,
            extra_flags: &self.extra_flags,
        }
    }
}

/// A blob store bucket mounted through the legacy blob filesystem driver.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LegacyBlobFs {
    pub disabled: bool,
    /// The legacy driver executable
    pub driver: PathBuf,
    /// Nothing is mounted until a bucket is named
    pub bucket: String,
    /// The bucket endpoint, where `{bucket}` is replaced with the bucket name
    pub uri_template: String,
    pub source_path: String,
    pub source_paths: Option<String>,
    pub destination: PathBuf,
    pub paths_root: PathBuf,
    pub numa_duplicate: bool,
    pub numa_cores: Option<u32>,
    #[serde(deserialize_with = "string_or_list")]
    pub extra_flags: Vec<String>,
}

impl Default for LegacyBlobFs {
    fn default() -> Self {
        Self {
            disabled: false,
            driver: PathBuf::from("/usr/local/bin/blobfs-mount"),
            bucket: String::new(),
            uri_template: String::from("blobfs://{bucket}"),
            source_path: String::new(),
            source_paths: None,
            destination: PathBuf::from("/mnt/blobfs"),
            paths_root: PathBuf::from("/mnt/blobfs_paths"),
            numa_duplicate: false,
            numa_cores: None,
            extra_flags: Vec::new(),
        }
    }
}

impl LegacyBlobFs {
    pub fn selectors(&self) -> Selectors<'_> {
        Selectors {
            source_path: &self.source_path,
            source_paths: non_empty(&self.source_paths),
            regions: None,
            destination: &self.destination,
            paths_root: &self.paths_root,
            regions_root: None,
            numa_duplicate: self.numa_duplicate,
            numa_cores: self.numa_cores,
            extra_flags: &self.extra_flags,
        }
    }
}

/// A blob store bucket mounted through the manifold access profile.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Manifuse {
    pub disabled: bool,
    /// Nothing is mounted until a bucket is named
    pub bucket: String,
    pub uri_template: String,
    pub source_path: String,
    pub source_paths: Option<String>,
    pub destination: PathBuf,
    pub paths_root: PathBuf,
    pub numa_duplicate: bool,
    pub numa_cores: Option<u32>,
    #[serde(deserialize_with = "string_or_list")]
    pub extra_flags: Vec<String>,
}

impl Default for Manifuse {
    fn default() -> Self {
        Self {
            disabled: false,
            bucket: String::new(),
            uri_template: String::from("manifold://{bucket}"),
            source_path: String::new(),
            source_paths: None,
            destination: PathBuf::from("/mnt/manifold"),
            paths_root: PathBuf::from("/mnt/manifold_paths"),
            numa_duplicate: false,
            numa_cores: None,
            extra_flags: Vec::new(),
        }
    }
}

impl Manifuse {
    pub fn selectors(&self) -> Selectors<'_> {
        Selectors {
            source_path: &self.source_path,
            source_paths: non_empty(&self.source_paths),
            regions: None,
            destination: &self.destination,
            paths_root: &self.paths_root,
            regions_root: None,
            numa_duplicate: self.numa_duplicate,
            numa_cores: self.numa_cores,
            extra_flags: &self.extra_flags,
        }
    }
}

/// Configuration values for wsfmount.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    // These sub-types should only have one level of values within
    // them, otherwise they cannot be addressed with environment variables.
    pub host: Host,
    pub driver: Driver,
    pub wsf: WorkspaceFs,
    pub airstore: Airstore,
    pub blobfs: LegacyBlobFs,
    pub manifuse: Manifuse,
}

impl Config {
    /// Build a config from defaults and the given environment-style variables only.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let builder = apply_env_overrides(config::Config::builder(), vars)?;
        Ok(Config::deserialize(builder.build()?)?)
    }
}

/// Load the wsfmount configuration.
///
/// This includes the system and user configurations (if they exist),
/// the given file, and finally any `WSFMOUNT_*` environment variables.
pub fn load_config(extra_file: Option<&Path>) -> Result<Config> {
    use config::File;

    // the config files can be in any supported format: toml, yaml, json, ini, etc
    let mut builder =
        config::Config::builder().add_source(File::with_name(SYSTEM_CONFIG).required(false));
    if let Some(dir) = dirs::config_dir() {
        let user_config = dir.join("wsfmount").join("wsfmount");
        builder = builder
            .add_source(File::with_name(&format!("{}", user_config.display())).required(false));
    }
    if let Some(path) = extra_file {
        path.metadata()
            .map_err(|err| Error::InvalidPath(path.to_owned(), err))?;
        builder = builder.add_source(File::from(path).required(true));
    }

    let builder = apply_env_overrides(builder, std::env::vars())?;
    let config = builder.build()?;
    tracing::trace!(?config, "loaded raw configuration");
    Ok(Config::deserialize(config)?)
}

fn apply_env_overrides<I, K, V>(
    mut builder: ConfigBuilder<DefaultState>,
    vars: I,
) -> Result<ConfigBuilder<DefaultState>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (var, value) in vars {
        let Some(tail) = var.as_ref().strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let Some((section, name)) = tail.split_once('_') else {
            // a value with no section is not a configuration
            // value, and can be skipped (eg: WSFMOUNT_LOG)
            continue;
        };

        let key = format!("{}.{}", section.to_lowercase(), name.to_lowercase());
        builder = builder.set_override(key, value.into())?;
    }
    Ok(builder)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Accept either a list of strings or a single comma-separated string.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        String(String),
        List(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        StringOrList::List(list) => list,
    })
}
