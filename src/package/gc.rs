//! Removal of leftovers from interrupted or externally disturbed runs.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::runtime::{Runtime, is_strictly_under, real_path};

use super::registry::{EnvId, environment_of};
use super::slot::{SlotLock, is_reserved, reservation_path};

/// What a purge removed, by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Package links not pointing at a distinct numbered environment.
    pub stray_links: Vec<PathBuf>,
    /// Environment directories no package link points at.
    pub orphan_envs: Vec<PathBuf>,
    /// Executable links into environments that no longer exist.
    pub dangling_bins: Vec<PathBuf>,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.stray_links.len() + self.orphan_envs.len() + self.dangling_bins.len()
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

pub struct GarbageCollector<'a, R: Runtime> {
    runtime: &'a R,
    packages_dir: PathBuf,
    venvs_dir: PathBuf,
    bin_dir: PathBuf,
    lock_path: PathBuf,
}

impl<'a, R: Runtime> GarbageCollector<'a, R> {
    pub fn new(
        runtime: &'a R,
        packages_dir: PathBuf,
        venvs_dir: PathBuf,
        bin_dir: PathBuf,
        lock_path: PathBuf,
    ) -> Self {
        Self {
            runtime,
            packages_dir,
            venvs_dir,
            bin_dir,
            lock_path,
        }
    }

    /// Runs under the slot allocation lock. Environments still reserved by
    /// an install in progress are left alone.
    #[tracing::instrument(skip(self))]
    pub fn purge(&self) -> Result<PurgeReport> {
        let _lock = SlotLock::acquire(&self.lock_path)?;
        let mut report = PurgeReport::default();
        let venvs_real = real_path(self.runtime, &self.venvs_dir);

        let mut claimed = BTreeSet::new();
        for link in self.sorted_entries(&self.packages_dir)? {
            match environment_of(self.runtime, &link, &venvs_real) {
                Some((_, env)) if claimed.insert(env.clone()) => {}
                _ => {
                    self.remove(&link)?;
                    report.stray_links.push(link);
                }
            }
        }

        for entry in self.sorted_entries(&self.venvs_dir)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            if claimed.contains(&venvs_real.join(name)) || self.is_in_flight(name) {
                continue;
            }
            self.remove(&entry)?;
            report.orphan_envs.push(entry);
        }

        for exe in self.sorted_entries(&self.bin_dir)? {
            if !self.runtime.is_symlink(&exe) || self.runtime.exists(&exe) {
                continue;
            }
            if is_strictly_under(&real_path(self.runtime, &exe), &venvs_real) {
                self.remove(&exe)?;
                report.dangling_bins.push(exe);
            }
        }

        Ok(report)
    }

    fn is_in_flight(&self, name: &OsStr) -> bool {
        let Some(id) = name.to_str().and_then(|n| n.parse::<EnvId>().ok()) else {
            return false;
        };
        let reserved = is_reserved(&reservation_path(&self.lock_path, id.get()));
        if reserved {
            debug!("Skipping reserved environment {:?}", name);
        }
        reserved
    }

    fn sorted_entries(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !self.runtime.is_dir(dir) {
            return Ok(Vec::new());
        }
        let mut entries = self.runtime.read_dir(dir)?;
        entries.sort();
        Ok(entries)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        eprintln!("Purging stray {:?}", path);
        warn!("Purging stray {:?}", path);

        let result = if self.runtime.is_symlink(path) {
            self.runtime.remove_symlink(path)
        } else if self.runtime.is_dir(path) {
            self.runtime.remove_dir_all(path)
        } else {
            self.runtime.remove_file(path)
        };
        result.with_context(|| format!("Failed to purge {:?}", path))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    struct Tree {
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    impl Tree {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let root = RealRuntime.canonicalize(dir.path()).unwrap();
            for sub in ["packages", "venvs", "bin"] {
                std::fs::create_dir_all(root.join(sub)).unwrap();
            }
            Self { _dir: dir, root }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.root.join(rel)
        }

        fn collector(&self) -> GarbageCollector<'static, RealRuntime> {
            GarbageCollector::new(
                &RealRuntime,
                self.path("packages"),
                self.path("venvs"),
                self.path("bin"),
                self.path(".venvlink.lock"),
            )
        }
    }

    #[test]
    fn test_purge_clean_tree() {
        let tree = Tree::new();
        std::fs::create_dir_all(tree.path("venvs/1/bin")).unwrap();
        std::fs::write(tree.path("venvs/1/bin/demo-cli"), "").unwrap();
        symlink(tree.path("venvs/1"), tree.path("packages/demo")).unwrap();
        symlink(tree.path("venvs/1/bin/demo-cli"), tree.path("bin/demo-cli")).unwrap();

        let report = tree.collector().purge().unwrap();
        assert!(report.is_clean());
        assert!(tree.path("bin/demo-cli").exists());
    }

    #[test_log::test]
    fn test_purge_perturbed_tree_converges() {
        let tree = Tree::new();
        std::fs::create_dir_all(tree.path("venvs/1")).unwrap();
        std::fs::create_dir_all(tree.path("venvs/2")).unwrap();
        std::fs::create_dir_all(tree.path("venvs/tmp")).unwrap();
        std::fs::create_dir_all(tree.path("outside")).unwrap();
        symlink(tree.path("venvs/1"), tree.path("packages/demo")).unwrap();
        symlink(tree.path("venvs/1"), tree.path("packages/demo-copy")).unwrap();
        symlink(tree.path("venvs/9"), tree.path("packages/ghost")).unwrap();
        symlink(tree.path("outside"), tree.path("packages/outside")).unwrap();
        symlink(tree.path("venvs/7/bin/old-cli"), tree.path("bin/old-cli")).unwrap();
        symlink("/nonexistent/tool", tree.path("bin/foreign")).unwrap();

        let report = tree.collector().purge().unwrap();

        assert_eq!(
            report.stray_links,
            vec![
                tree.path("packages/demo-copy"),
                tree.path("packages/ghost"),
                tree.path("packages/outside"),
            ]
        );
        assert_eq!(
            report.orphan_envs,
            vec![tree.path("venvs/2"), tree.path("venvs/tmp")]
        );
        assert_eq!(report.dangling_bins, vec![tree.path("bin/old-cli")]);
        assert_eq!(report.total(), 6);

        assert!(tree.path("packages/demo").exists());
        assert!(tree.path("venvs/1").is_dir());
        assert!(tree.path("bin/foreign").is_symlink());

        let again = tree.collector().purge().unwrap();
        assert!(again.is_clean());
    }

    #[test]
    fn test_purge_missing_dirs() {
        let dir = tempdir().unwrap();
        let collector = GarbageCollector::new(
            &RealRuntime,
            dir.path().join("packages"),
            dir.path().join("venvs"),
            dir.path().join("bin"),
            dir.path().join(".venvlink.lock"),
        );
        assert!(collector.purge().unwrap().is_clean());
    }

    #[test]
    fn test_purge_skips_reserved_environment() {
        let tree = Tree::new();
        let allocator = crate::package::SlotAllocator::new(
            &RealRuntime,
            tree.path("venvs"),
            tree.path(".venvlink.lock"),
        );
        let mut slot = allocator.allocate().unwrap();

        let report = tree.collector().purge().unwrap();
        assert!(report.is_clean());
        assert!(slot.path.is_dir());

        slot.release().unwrap();
        let report = tree.collector().purge().unwrap();
        assert_eq!(report.orphan_envs, vec![tree.path("venvs/1")]);
    }
}
