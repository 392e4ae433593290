// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Backwards compatible aliases for mounted trees, and the directory
//! walk that forces the driver to populate its lookup cache.

use std::path::Path;

use crate::descriptor::{MountPlan, PrimeWalk, SymlinkChain};
use crate::driver::is_mounted;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./symlink_test.rs"]
mod symlink_test;

/// Establish the aliases of a mounted plan and verify that they resolve.
///
/// When the plan has a priming walk, every directory along it is listed
/// after the links are made. Otherwise, each link is listed once.
pub fn apply(plan: &MountPlan) -> Result<()> {
    if plan.links.is_empty() {
        return Ok(());
    }
    establish(&plan.links)?;
    match &plan.prime {
        Some(walk) => prime_lookup_cache(walk),
        None => {
            for link in plan.links.iter() {
                list_directory(&link.link)?;
            }
            Ok(())
        }
    }
}

/// Create every link in the chain, in order, replacing existing symlinks.
pub fn establish(chain: &SymlinkChain) -> Result<()> {
    for link in chain.iter() {
        replace_symlink(&link.link, &link.target)?;
    }
    Ok(())
}

/// Point `link` at `target`, replacing it if it is already a symlink.
///
/// An empty directory that nothing is mounted on is also replaced.
/// Anything else already present at `link` is left alone and reported.
pub fn replace_symlink(link: &Path, target: &Path) -> Result<()> {
    let symlink_err = |source| Error::Symlink {
        link: link.to_owned(),
        target: target.to_owned(),
        source,
    };

    match link.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => {
            if std::fs::read_link(link).ok().as_deref() == Some(target) {
                tracing::debug!(?link, ?target, "symlink already in place");
                return Ok(());
            }
            tracing::debug!(?link, "removing existing symlink");
            std::fs::remove_file(link).map_err(symlink_err)?;
        }
        Ok(meta) if meta.is_dir() => replace_empty_directory(link)?,
        Ok(_) => return Err(Error::AliasOccupied(link.to_owned())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = link.parent() {
                std::fs::create_dir_all(parent).map_err(symlink_err)?;
            }
        }
        Err(err) => return Err(symlink_err(err)),
    }

    tracing::debug!(?link, ?target, "creating symlink");
    std::os::unix::fs::symlink(target, link).map_err(symlink_err)
}

/// Remove a directory left behind at an alias by a different topology.
///
/// Only an empty directory with nothing mounted on it is removed.
fn replace_empty_directory(link: &Path) -> Result<()> {
    if is_mounted(link)? {
        return Err(Error::AliasOccupied(link.to_owned()));
    }
    match std::fs::remove_dir(link) {
        Ok(()) => {
            tracing::info!(?link, "replacing empty mount destination with an alias");
            Ok(())
        }
        Err(err) => {
            tracing::debug!(?link, ?err, "directory could not be removed");
            Err(Error::AliasOccupied(link.to_owned()))
        }
    }
}

/// List each directory along the walk, one component at a time.
///
/// The mount driver does not reliably populate entries for directories
/// that have never been listed, so lookups through the aliases can fail
/// until each parent has been read at least once.
pub fn prime_lookup_cache(walk: &PrimeWalk) -> Result<()> {
    for dir in walk.directories() {
        list_directory(&dir)?;
    }
    tracing::debug!(base = ?walk.base, sub_path = %walk.sub_path, "lookup cache primed");
    Ok(())
}

fn list_directory(path: &Path) -> Result<()> {
    let cache_err = |source| Error::CachePriming {
        path: path.to_owned(),
        source,
    };
    let mut count = 0;
    for entry in std::fs::read_dir(path).map_err(cache_err)? {
        entry.map_err(cache_err)?;
        count += 1;
    }
    tracing::trace!(?path, entries = count, "listed");
    Ok(())
}
