//! Upgrade use case - rebuild, then move the package and its extras to the
//! newest versions the index offers.

use anyhow::{Context, Result};
use std::path::Path;

use crate::error::VenvError;
use crate::runtime::{Runtime, expand_user};
use crate::tool::{InstallRequest, PackageTool};

use super::Workspace;

impl<'a, R: Runtime, T: PackageTool> Workspace<'a, R, T> {
    #[tracing::instrument(skip(self))]
    pub fn upgrade(&mut self, name: &str) -> Result<()> {
        let package = self.installed(name)?;
        let record = self.load_record(&package)?;

        println!("Upgrading {} ..", name);
        let editable = record.editpath.as_deref().map(|path| {
            expand_user(self.runtime, Path::new(path))
                .display()
                .to_string()
        });
        let mut packages = Vec::new();
        if editable.is_none() {
            packages.push(name.to_string());
        }
        packages.extend(record.injected.iter().cloned());

        let request = InstallRequest {
            editable,
            packages,
            upgrade: true,
            reinstall: true,
            index_url: record.url.clone(),
            ..Default::default()
        };
        self.rebuild(&package, record, |ws| {
            ws.tool
                .install(&package.env_dir, &request)
                .context(VenvError::InstallFailed {
                    package: name.to_string(),
                })
        })?;
        println!("{} upgraded.", name);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::application::InstallOptions;
    use crate::application::test_support::{simulate_tool, temp_config, write_dist};
    use crate::runtime::RealRuntime;
    use crate::tool::{InstalledDist, MockPackageTool};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_upgrade_reinstalls_package_and_extras() {
        let (_dir, config) = temp_config();
        let requests: Arc<Mutex<Vec<InstallRequest>>> = Arc::default();

        let mut tool = MockPackageTool::new();
        tool.expect_create_env().returning(|env, _, _| {
            std::fs::create_dir_all(env.join("bin"))?;
            Ok(())
        });
        tool.expect_python_version().returning(|_| None);
        let seen = Arc::clone(&requests);
        tool.expect_install().returning(move |env, request| {
            seen.lock().unwrap().push(request.clone());
            write_dist(env, "demo", &["demo-cli"]);
            if request.packages.iter().any(|p| p == "demo-plugin") {
                write_dist(env, "demo-plugin", &["demo-plugin-cli"]);
            }
            Ok(())
        });
        tool.expect_list().returning(|_| {
            Ok(vec![InstalledDist {
                name: "demo".into(),
                version: "1.0".into(),
                editable_location: None,
            }])
        });
        tool.expect_freeze().returning(|_| Ok("demo==1.0".into()));
        tool.expect_sync().returning(|env, _, _| {
            write_dist(env, "demo", &["demo-cli"]);
            Ok(())
        });

        let mut ws = Workspace::open(&RealRuntime, &tool, &config).unwrap();
        ws.install(&["demo".into()], &InstallOptions::default()).unwrap();
        ws.inject("demo", &["demo-plugin".into()]).unwrap();
        ws.upgrade("demo").unwrap();

        let last = requests.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.packages, vec!["demo", "demo-plugin"]);
        assert!(last.upgrade && last.reinstall && !last.no_deps);

        let meta = ws.registry().get("demo").unwrap().meta.clone().unwrap();
        assert_eq!(meta.apps, vec!["demo-cli", "demo-plugin-cli"]);
        assert_eq!(meta.injected, vec!["demo-plugin"]);
    }

    #[test]
    fn test_upgrade_install_failure_removes_package() {
        let (_dir, config) = temp_config();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tool = MockPackageTool::new();
        tool.expect_create_env().returning(|env, _, _| {
            std::fs::create_dir_all(env.join("bin"))?;
            Ok(())
        });
        tool.expect_python_version().returning(|_| None);
        let counter = Arc::clone(&calls);
        tool.expect_install().returning(move |env, _| {
            if counter.fetch_add(1, Ordering::SeqCst) >= 2 {
                anyhow::bail!("index unreachable");
            }
            write_dist(env, "demo", &["demo-cli"]);
            Ok(())
        });
        tool.expect_list().returning(|_| {
            Ok(vec![InstalledDist {
                name: "demo".into(),
                version: "1.0".into(),
                editable_location: None,
            }])
        });
        tool.expect_freeze().returning(|_| Ok("demo==1.0".into()));
        tool.expect_sync().returning(|env, _, _| {
            write_dist(env, "demo", &["demo-cli"]);
            Ok(())
        });

        let mut ws = Workspace::open(&RealRuntime, &tool, &config).unwrap();
        ws.install(&["demo".into()], &InstallOptions::default()).unwrap();

        let err = ws.upgrade("demo").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VenvError>(),
            Some(VenvError::InstallFailed { package }) if package == "demo"
        ));
        assert!(!ws.registry().contains("demo"));
        assert!(!config.packages_dir.join("demo").is_symlink());
        assert!(!config.bin_dir.join("demo-cli").is_symlink());
        assert!(!config.venvs_dir.join("1").exists());

        let fresh = Workspace::open(&RealRuntime, &tool, &config).unwrap();
        assert!(fresh.registry().is_empty());
        assert!(fresh.purge().unwrap().is_clean());
    }

    #[test]
    fn test_upgrade_unknown_package() {
        let (_dir, config) = temp_config();
        let mut tool = MockPackageTool::new();
        simulate_tool(&mut tool, "demo", &["demo-cli"]);

        let mut ws = Workspace::open(&RealRuntime, &tool, &config).unwrap();
        let err = ws.upgrade("ghost").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VenvError>(),
            Some(VenvError::NotInstalled { name }) if name == "ghost"
        ));
    }
}
