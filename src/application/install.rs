//! Install use case - one fresh environment per package.
//!
//! Flow per requirement:
//! - Allocate a slot and build the environment
//! - Install the requirement alone to learn the distribution name
//! - Install it with its dependencies
//! - Link the package, its executables and man pages, record metadata
//!
//! Anything created before a failure is removed again.

use anyhow::{Context, Result};
use log::{debug, info};

use crate::cleanup::{CleanupContext, CleanupStep};
use crate::config::expand_path;
use crate::error::VenvError;
use crate::package::{MetadataRecord, Slot};
use crate::runtime::Runtime;
use crate::tool::{InstallRequest, PackageTool};

use super::Workspace;
use super::reinstall::PythonChoice;

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Interpreter path or version, instead of the configured default.
    /// Recorded as a version when it looks like one, see [`PythonChoice::from_arg`].
    pub python: Option<String>,
    /// Replace an existing installation of the same package.
    pub force: bool,
    /// Install from a source directory in editable mode.
    pub editable: bool,
    /// Also expose executables of dependencies.
    pub include_deps: bool,
    pub system_site_packages: bool,
    pub index_url: Option<String>,
}

impl InstallOptions {
    fn request(&self, spec: &str, no_deps: bool) -> InstallRequest {
        let (editable, packages) = if self.editable {
            (Some(spec.to_string()), Vec::new())
        } else {
            (None, vec![spec.to_string()])
        };
        InstallRequest {
            editable,
            packages,
            no_deps,
            index_url: self.index_url.clone(),
            ..Default::default()
        }
    }
}

impl<'a, R: Runtime, T: PackageTool> Workspace<'a, R, T> {
    /// Install each of `specs` into its own environment. Stops at the first
    /// failure. Returns the installed package names.
    #[tracing::instrument(skip(self))]
    pub fn install(&mut self, specs: &[String], options: &InstallOptions) -> Result<Vec<String>> {
        let mut installed = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = self.install_one(spec, options)?;
            println!("{} installed.", name);
            installed.push(name);
        }
        Ok(installed)
    }

    fn install_one(&mut self, spec: &str, options: &InstallOptions) -> Result<String> {
        let mut slot = self.allocator().allocate()?;

        let mut cleanup = CleanupContext::new();
        cleanup.add(CleanupStep::Environment(slot.path.clone()));

        match self.install_into(&mut slot, spec, options, &mut cleanup) {
            Ok(name) => {
                cleanup.dismiss();
                Ok(name)
            }
            Err(e) => {
                debug!("Install of {} failed, rolling back: {:#}", spec, e);
                cleanup.run(self.runtime, &self.reconciler());
                Err(e)
            }
        }
    }

    fn install_into(
        &mut self,
        slot: &mut Slot,
        spec: &str,
        options: &InstallOptions,
        cleanup: &mut CleanupContext,
    ) -> Result<String> {
        let python = match &options.python {
            Some(python) => expand_path(self.runtime, python).display().to_string(),
            None => self.config.default_python.clone(),
        };

        self.tool
            .create_env(&slot.path, &python, options.system_site_packages)
            .context(VenvError::BuildFailed {
                package: spec.to_string(),
                path: slot.path.clone(),
            })?;
        let version = self
            .tool
            .python_version(&slot.path)
            .unwrap_or_else(|| "?ver?".to_string());
        println!("Created {:?} using {:?} ({})", slot.path, python, version);

        self.tool
            .install(&slot.path, &options.request(spec, true))
            .context(VenvError::InstallFailed {
                package: spec.to_string(),
            })?;

        let mut dists = self.tool.list(&slot.path)?;
        if dists.is_empty() {
            return Err(anyhow::anyhow!("No distribution found after installing {}", spec))
                .context(VenvError::InstallFailed {
                    package: spec.to_string(),
                });
        }
        if dists.len() != 1 {
            return Err(VenvError::AmbiguousQualification {
                packages: dists.into_iter().map(|d| d.name).collect(),
            }
            .into());
        }
        let dist = dists.remove(0);
        let name = dist.name;

        let link = self.package_link(&name);
        if self.registry.contains(&name) || self.runtime.is_symlink(&link) {
            if !options.force {
                return Err(VenvError::AlreadyInstalled { name }.into());
            }
            println!("Removing pre-existing {} environment.", name);
            self.remove_package(&name)?;
        }

        self.tool
            .install(&slot.path, &options.request(spec, false))
            .context(VenvError::InstallFailed {
                package: spec.to_string(),
            })?;

        info!("Linking {:?} -> {:?}", link, slot.path);
        self.runtime.symlink(&slot.path, &link)?;
        cleanup.add(CleanupStep::Link(link));
        slot.release()?;

        let mut record = MetadataRecord {
            editpath: dist.editable_location.map(|p| p.display().to_string()),
            deps: options.include_deps,
            sys: options.system_site_packages,
            url: options.index_url.clone(),
            ..MetadataRecord::new(&name)
        };
        if let Some(python) = &options.python {
            PythonChoice::from_arg(python).apply_to(&mut record);
        }
        self.commit(&name, slot.id, &slot.path, record)?;

        Ok(name)
    }
}
