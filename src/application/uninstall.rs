use anyhow::Result;
use log::info;

use crate::error::VenvError;
use crate::runtime::{Runtime, real_path};
use crate::tool::PackageTool;

use super::Workspace;

impl<'a, R: Runtime, T: PackageTool> Workspace<'a, R, T> {
    /// Remove an installed package: its link, executable links and environment.
    #[tracing::instrument(skip(self))]
    pub fn uninstall(&mut self, name: &str) -> Result<()> {
        if !self.remove_package(name)? {
            return Err(VenvError::NotInstalled {
                name: name.to_string(),
            }
            .into());
        }
        println!("{} uninstalled.", name);
        Ok(())
    }

    /// Returns false when there was nothing to remove.
    pub(crate) fn remove_package(&mut self, name: &str) -> Result<bool> {
        let link = self.package_link(name);
        let env = match self.registry.remove(name) {
            Some(package) => package.env_dir,
            None if self.runtime.is_symlink(&link) => real_path(self.runtime, &link),
            None => return Ok(false),
        };

        if self.runtime.is_symlink(&link) {
            info!("Removing link {:?}", link);
            self.runtime.remove_symlink(&link)?;
        }
        self.remove_environment(&env)?;
        Ok(true)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::application::InstallOptions;
    use crate::application::test_support::{simulate_tool, temp_config};
    use crate::runtime::RealRuntime;
    use crate::tool::MockPackageTool;

    #[test]
    fn test_uninstall_removes_everything() {
        let (_dir, config) = temp_config();
        let mut tool = MockPackageTool::new();
        simulate_tool(&mut tool, "demo", &["demo-cli"]);

        let mut ws = Workspace::open(&RealRuntime, &tool, &config).unwrap();
        ws.install(&["demo".into()], &InstallOptions::default()).unwrap();
        ws.uninstall("demo").unwrap();

        assert!(!ws.registry().contains("demo"));
        assert!(!config.packages_dir.join("demo").is_symlink());
        assert!(!config.bin_dir.join("demo-cli").is_symlink());
        assert!(!config.venvs_dir.join("1").exists());
        assert!(ws.purge().unwrap().is_clean());
    }

    #[test]
    fn test_uninstall_unknown() {
        let (_dir, config) = temp_config();
        let tool = MockPackageTool::new();

        let mut ws = Workspace::open(&RealRuntime, &tool, &config).unwrap();
        let err = ws.uninstall("ghost").unwrap_err();
        assert_eq!(err.to_string(), "Application ghost is not installed");
    }
}
