use anyhow::{Context, Result};

use crate::error::VenvError;
use crate::package::requirement::merge_requirements;
use crate::runtime::Runtime;
use crate::tool::{InstallRequest, PackageTool};

use super::Workspace;

impl<'a, R: Runtime, T: PackageTool> Workspace<'a, R, T> {
    /// Install extra packages into an existing environment, using the index
    /// the package was installed from. Returns the linked executables.
    #[tracing::instrument(skip(self))]
    pub fn inject(&mut self, name: &str, extras: &[String]) -> Result<Vec<String>> {
        let package = self.installed(name)?;
        let mut record = self.load_record(&package)?;

        let request = InstallRequest {
            packages: extras.to_vec(),
            index_url: record.url.clone(),
            ..Default::default()
        };
        self.tool
            .install(&package.env_dir, &request)
            .context(VenvError::InstallFailed {
                package: request.describe(),
            })?;

        record.injected = merge_requirements(&record.injected, extras, true);
        self.commit(name, package.env_id, &package.env_dir, record)
    }

    /// Uninstall previously injected packages.
    #[tracing::instrument(skip(self))]
    pub fn uninject(&mut self, name: &str, extras: &[String]) -> Result<Vec<String>> {
        let package = self.installed(name)?;
        let mut record = self.load_record(&package)?;

        self.tool
            .uninstall(&package.env_dir, extras)
            .with_context(|| format!("Failed to uninstall {} from {}", extras.join(" "), name))?;

        record.injected = merge_requirements(&record.injected, extras, false);
        self.commit(name, package.env_id, &package.env_dir, record)
    }
}
