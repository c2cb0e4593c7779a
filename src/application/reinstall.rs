//! Reinstall use case - rebuild an environment in place from its snapshot.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::Path;

use crate::config::SNAPSHOT_FILE;
use crate::error::VenvError;
use crate::package::{InstalledPackage, MetadataRecord, SlotLock};
use crate::runtime::Runtime;
use crate::tool::PackageTool;

use super::Workspace;

/// Interpreter to rebuild with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PythonChoice {
    /// Whatever the package was installed with.
    #[default]
    Keep,
    /// Explicit interpreter path.
    Path(String),
    /// Interpreter version specifier, e.g. `3.12`.
    Version(String),
    /// Back to the configured default.
    Reset,
}

impl PythonChoice {
    /// Classify a single interpreter argument: dotted digits such as `3.12`
    /// are a version, anything else is a path or executable name.
    pub fn from_arg(value: &str) -> Self {
        let is_version = value.starts_with(|c: char| c.is_ascii_digit())
            && value.chars().all(|c| c.is_ascii_digit() || c == '.');
        if is_version {
            Self::Version(value.to_string())
        } else {
            Self::Path(value.to_string())
        }
    }

    pub(super) fn apply_to(&self, record: &mut MetadataRecord) {
        match self {
            Self::Keep => {}
            Self::Path(path) => {
                record.python = Some(path.clone());
                record.pyenv = None;
            }
            Self::Version(version) => {
                record.pyenv = Some(version.clone());
                record.python = None;
            }
            Self::Reset => {
                record.python = None;
                record.pyenv = None;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReinstallOptions {
    pub python: PythonChoice,
    /// Override the recorded system site packages setting.
    pub system_site: Option<bool>,
}

impl ReinstallOptions {
    fn apply(&self, record: &mut MetadataRecord) {
        self.python.apply_to(record);
        if let Some(sys) = self.system_site {
            record.sys = sys;
        }
    }
}

impl<'a, R: Runtime, T: PackageTool> Workspace<'a, R, T> {
    #[tracing::instrument(skip(self))]
    pub fn reinstall(&mut self, name: &str, options: &ReinstallOptions) -> Result<()> {
        let package = self.installed(name)?;
        let mut record = self.load_record(&package)?;
        options.apply(&mut record);

        println!("Reinstalling {} ..", name);
        self.rebuild(&package, record, |_| Ok(()))?;
        println!("{} reinstalled.", name);
        Ok(())
    }

    pub(super) fn installed(&self, name: &str) -> Result<InstalledPackage> {
        self.registry.get(name).cloned().ok_or_else(|| {
            VenvError::NotInstalled {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Recreate the environment of `package` in the same slot, restore the
    /// pinned dependencies, run `finish` and commit `record`. Once the
    /// snapshot is saved any failure removes the package entirely.
    pub(super) fn rebuild<F>(
        &mut self,
        package: &InstalledPackage,
        record: MetadataRecord,
        finish: F,
    ) -> Result<()>
    where
        F: FnOnce(&Self) -> Result<()>,
    {
        let env = &package.env_dir;
        let snapshot = self.store().snapshot_path(env);

        let temp = tempfile::tempdir().context("Failed to create temporary directory")?;
        let saved = temp.path().join(SNAPSHOT_FILE);
        self.runtime
            .copy(&snapshot, &saved)
            .with_context(|| format!("No dependency snapshot for {}", package.name))?;

        if let Err(e) = self.restore(package, record, &saved, finish) {
            warn!("Rebuild of {} failed, removing it", package.name);
            if let Err(cleanup_err) = self.remove_package(&package.name) {
                warn!("Failed to remove {}: {:#}", package.name, cleanup_err);
            }
            return Err(e);
        }
        Ok(())
    }

    fn restore<F>(
        &mut self,
        package: &InstalledPackage,
        record: MetadataRecord,
        saved: &Path,
        finish: F,
    ) -> Result<()>
    where
        F: FnOnce(&Self) -> Result<()>,
    {
        let env = &package.env_dir;
        self.reconciler().teardown(env)?;
        {
            let _lock = SlotLock::acquire(&self.config.lock_path())?;
            debug!("Recreating {:?}", env);
            self.runtime.remove_dir_all(env)?;
            self.runtime.create_dir(env)?;
        }

        let python = self.interpreter(&record);
        self.tool
            .create_env(env, &python, record.sys)
            .context(VenvError::BuildFailed {
                package: package.name.clone(),
                path: env.clone(),
            })?;
        self.tool
            .sync(env, saved, record.url.clone())
            .context(VenvError::InstallFailed {
                package: package.name.clone(),
            })?;

        finish(&*self)?;
        self.commit(&package.name, package.env_id, env, record)?;
        Ok(())
    }
}
