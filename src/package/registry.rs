//! In-memory index of installed packages.
//!
//! Built by a single scan of the packages directory at startup, then kept in
//! step with the disk by the operations that change it.

use anyhow::{Result, bail};
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::runtime::{Runtime, real_path};

use super::{MAX_ENVIRONMENTS, MetadataRecord, MetadataStore};

/// Number of an environment directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvId(u32);

impl EnvId {
    pub fn new(id: u32) -> Result<Self> {
        if id == 0 || id > MAX_ENVIRONMENTS {
            bail!("Environment id {} out of range", id);
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl FromStr for EnvId {
    type Err = anyhow::Error;

    /// Only plain decimal names are environment ids.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            bail!("Not an environment id: {:?}", s);
        }
        Self::new(s.parse()?)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstalledPackage {
    pub name: String,
    pub env_id: EnvId,
    /// Real path of the environment directory.
    pub env_dir: PathBuf,
    pub meta: Option<MetadataRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    ByName,
    ByEnvironment,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    packages: BTreeMap<String, InstalledPackage>,
}

impl Registry {
    /// Index every package link in `packages_dir` that points at a numbered
    /// directory directly inside `venvs_dir`.
    #[tracing::instrument(skip(runtime))]
    pub fn scan<R: Runtime>(runtime: &R, packages_dir: &Path, venvs_dir: &Path) -> Result<Self> {
        let mut registry = Self::default();
        if !runtime.exists(packages_dir) {
            return Ok(registry);
        }

        let venvs_real = real_path(runtime, venvs_dir);
        let store = MetadataStore::new(runtime);

        let mut entries = runtime.read_dir(packages_dir)?;
        entries.sort();

        for link in entries {
            let Some(name) = link.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((env_id, env_dir)) = environment_of(runtime, &link, &venvs_real) else {
                debug!("Skipping unresolvable package link {:?}", link);
                continue;
            };

            registry.insert(InstalledPackage {
                name: name.to_string(),
                env_id,
                meta: store.load(&env_dir),
                env_dir,
            });
        }

        debug!("Registry holds {} package(s)", registry.len());
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&InstalledPackage> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn insert(&mut self, package: InstalledPackage) -> Option<InstalledPackage> {
        self.packages.insert(package.name.clone(), package)
    }

    pub fn remove(&mut self, name: &str) -> Option<InstalledPackage> {
        self.packages.remove(name)
    }

    /// Package names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }

    pub fn list(&self, order: SortOrder) -> Vec<&InstalledPackage> {
        let mut packages: Vec<_> = self.packages.values().collect();
        if order == SortOrder::ByEnvironment {
            packages.sort_by_key(|p| p.env_id);
        }
        packages
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = &InstalledPackage> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Environment a package link resolves to, if it is a numbered directory
/// directly inside `venvs_real`.
pub(crate) fn environment_of<R: Runtime>(
    runtime: &R,
    link: &Path,
    venvs_real: &Path,
) -> Option<(EnvId, PathBuf)> {
    let target = real_path(runtime, link);
    if target.parent() != Some(venvs_real) || !runtime.is_dir(&target) {
        return None;
    }
    let id = target.file_name()?.to_str()?.parse::<EnvId>().ok()?;
    Some((id, target))
}
