//! Application layer - lifecycle operations on installed packages.
//!
//! Every operation runs against a [`Workspace`]: the resolved configuration,
//! the runtime, the package tool and the registry index built at startup.

mod inject;
mod install;
mod reinstall;
mod uninstall;
mod upgrade;

pub use install::InstallOptions;
pub use reinstall::{PythonChoice, ReinstallOptions};

use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

use crate::config::{Config, expand_path};
use crate::package::{
    EnvId, GarbageCollector, InstalledPackage, MetadataRecord, MetadataStore, PackageResolver,
    PurgeReport, Registry, SlotAllocator, SymlinkReconciler,
};
use crate::runtime::{Runtime, real_path};
use crate::tool::PackageTool;

pub struct Workspace<'a, R: Runtime, T: PackageTool> {
    runtime: &'a R,
    tool: &'a T,
    config: &'a Config,
    registry: Registry,
}

impl<'a, R: Runtime, T: PackageTool> Workspace<'a, R, T> {
    /// Create the managed directories, purge leftovers of earlier runs and
    /// index the installed packages.
    #[tracing::instrument(skip_all)]
    pub fn open(runtime: &'a R, tool: &'a T, config: &'a Config) -> Result<Self> {
        config.ensure_dirs(runtime)?;

        let report = Self::collector_for(runtime, config).purge()?;
        if !report.is_clean() {
            debug!("Purged {} stray item(s)", report.total());
        }

        let registry = Registry::scan(runtime, &config.packages_dir, &config.venvs_dir)?;
        Ok(Self {
            runtime,
            tool,
            config,
            registry,
        })
    }

    pub fn runtime(&self) -> &'a R {
        self.runtime
    }

    pub fn tool(&self) -> &'a T {
        self.tool
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> MetadataStore<'a, R> {
        MetadataStore::new(self.runtime)
    }

    pub fn reconciler(&self) -> SymlinkReconciler<'a, R> {
        SymlinkReconciler::new(
            self.runtime,
            self.config.bin_dir.clone(),
            self.config.man_dir_setting.clone(),
            self.config.man_dir.is_some(),
        )
    }

    pub fn resolver(&self) -> PackageResolver<'_, R> {
        PackageResolver::new(self.runtime, &self.registry)
    }

    pub fn allocator(&self) -> SlotAllocator<'a, R> {
        SlotAllocator::new(
            self.runtime,
            self.config.venvs_dir.clone(),
            self.config.lock_path(),
        )
    }

    fn collector_for(runtime: &'a R, config: &Config) -> GarbageCollector<'a, R> {
        GarbageCollector::new(
            runtime,
            config.packages_dir.clone(),
            config.venvs_dir.clone(),
            config.bin_dir.clone(),
            config.lock_path(),
        )
    }

    /// Remove leftovers. Run once by [`Workspace::open`]; exposed for checks.
    pub fn purge(&self) -> Result<PurgeReport> {
        Self::collector_for(self.runtime, self.config).purge()
    }

    /// Resolve a user token to an installed package.
    pub fn find(&self, token: &str) -> Result<InstalledPackage> {
        self.resolver().resolve_str(token).require()
    }

    /// Names selected by a multi-package command, see [`PackageResolver::select`].
    pub fn select(&self, tokens: &[String], all: bool, skip: bool) -> Result<Vec<String>> {
        self.resolver().select(tokens, all, skip)
    }

    pub fn package_link(&self, name: &str) -> PathBuf {
        self.config.packages_dir.join(name)
    }

    /// Interpreter for `record`, with `~` and variables expanded.
    fn interpreter(&self, record: &MetadataRecord) -> String {
        expand_path(self.runtime, record.interpreter(&self.config.default_python))
            .display()
            .to_string()
    }

    fn load_record(&self, package: &InstalledPackage) -> Result<MetadataRecord> {
        package
            .meta
            .clone()
            .or_else(|| self.store().load(&package.env_dir))
            .ok_or_else(|| {
                crate::error::VenvError::MetadataMissing {
                    path: self.store().metadata_path(&package.env_dir),
                }
                .into()
            })
    }

    /// Rebuild the links of `env`, then record the dependency snapshot and
    /// metadata, and index the package. Returns the linked executables.
    fn commit(
        &mut self,
        name: &str,
        env_id: EnvId,
        env: &Path,
        mut record: MetadataRecord,
    ) -> Result<Vec<String>> {
        let apps = self
            .reconciler()
            .reconcile(env, name, &record.injected, record.deps)?;

        let freeze = self
            .tool
            .freeze(env)
            .context("Failed to fetch freeze list")?;
        let store = self.store();
        store.save_snapshot(env, &freeze)?;

        record.apps = apps.clone();
        record.normalize();
        store.save(env, &record)?;

        self.registry.insert(InstalledPackage {
            name: name.to_string(),
            env_id,
            env_dir: real_path(self.runtime, env),
            meta: Some(record),
        });
        Ok(apps)
    }

    /// Remove links into `env` and the directory itself.
    fn remove_environment(&self, env: &Path) -> Result<()> {
        self.reconciler().teardown(env)?;
        if self.runtime.exists(env) {
            debug!("Removing {:?}", env);
            self.runtime.remove_dir_all(env)?;
        }
        Ok(())
    }
}
