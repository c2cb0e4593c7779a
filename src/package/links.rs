//! Executable and man page links for one environment.
//!
//! The link set of an environment is rebuilt from scratch: every link in the
//! shared directories that resolves into the environment is removed, then the
//! executables recorded by the qualifying distributions are linked again.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::VenvError;
use crate::runtime::path::normalize_path;
use crate::runtime::{Runtime, is_strictly_under, real_path};

use super::requirement::{dist_info_name, normalize_name, requirement_name};

const DIST_INFO_PATTERN: &str = "*.dist-info";

pub struct SymlinkReconciler<'a, R: Runtime> {
    runtime: &'a R,
    bin_dir: PathBuf,
    man_dir: PathBuf,
    link_man_pages: bool,
}

impl<'a, R: Runtime> SymlinkReconciler<'a, R> {
    /// `man_dir` is always swept on teardown; pages are only linked into it
    /// when `link_man_pages` is set.
    pub fn new(runtime: &'a R, bin_dir: PathBuf, man_dir: PathBuf, link_man_pages: bool) -> Self {
        Self {
            runtime,
            bin_dir,
            man_dir,
            link_man_pages,
        }
    }

    /// Remove every link in the bin and man directories that resolves to a
    /// path inside `env`. Returns the removed links.
    #[tracing::instrument(skip(self))]
    pub fn teardown(&self, env: &Path) -> Result<Vec<PathBuf>> {
        let env_real = real_path(self.runtime, env);
        let mut removed = Vec::new();

        for link in self.link_candidates()? {
            if !self.runtime.is_symlink(&link) {
                continue;
            }
            let target = real_path(self.runtime, &link);
            if is_strictly_under(&target, &env_real) {
                info!("Removing link {:?}", link);
                self.runtime.remove_symlink(&link)?;
                removed.push(link);
            }
        }

        Ok(removed)
    }

    /// Tear down and rebuild the links of `env`. Returns the sorted names of
    /// the linked executables.
    ///
    /// Executables are taken from the distribution named `package`, from the
    /// distributions named by `extras`, or from every distribution when
    /// `include_deps` is set.
    #[tracing::instrument(skip(self))]
    pub fn reconcile(
        &self,
        env: &Path,
        package: &str,
        extras: &[String],
        include_deps: bool,
    ) -> Result<Vec<String>> {
        let env_real = real_path(self.runtime, env);
        self.teardown(&env_real)?;

        let executables = self.discover(&env_real, package, extras, include_deps)?;
        for executable in &executables {
            let dest = self.bin_dir.join(executable.file_name().unwrap_or_default());
            self.link(executable, &dest).map_err(|source| VenvError::LinkIo {
                path: dest.clone(),
                source,
            })?;
        }

        if self.link_man_pages {
            self.link_man_pages(&env_real);
        }

        let apps: Vec<String> = executables
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(String::from))
            .collect();
        if apps.is_empty() {
            return Err(VenvError::NoExecutablesFound {
                package: package.to_string(),
            }
            .into());
        }
        Ok(apps)
    }

    /// Executables in `env/bin` recorded by the qualifying distributions,
    /// sorted and without duplicates.
    pub fn discover(
        &self,
        env: &Path,
        package: &str,
        extras: &[String],
        include_deps: bool,
    ) -> Result<BTreeSet<PathBuf>> {
        let mut wanted: BTreeSet<String> = extras.iter().map(|e| requirement_name(e)).collect();
        wanted.insert(normalize_name(package));

        let bin = env.join("bin");
        let mut executables = BTreeSet::new();

        for dist_info in self.find_dist_infos(env)? {
            let dir_name = dist_info
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if !include_deps && !wanted.contains(&dist_info_name(dir_name)) {
                continue;
            }

            let record = dist_info.join("RECORD");
            if !self.runtime.exists(&record) {
                continue;
            }
            let Some(site_packages) = dist_info.parent() else {
                continue;
            };

            let content = self
                .runtime
                .read_to_string(&record)
                .with_context(|| format!("Failed to read {:?}", record))?;
            for entry in content.lines().filter_map(record_path) {
                let candidate = normalize_path(&site_packages.join(entry));
                if candidate.parent() == Some(bin.as_path())
                    && self.runtime.is_executable_file(&candidate)
                {
                    executables.insert(candidate);
                }
            }
        }

        debug!("Found {} executable(s) in {:?}", executables.len(), env);
        Ok(executables)
    }

    fn find_dist_infos(&self, env: &Path) -> Result<Vec<PathBuf>> {
        let pattern = glob::Pattern::new(DIST_INFO_PATTERN)?;
        let mut found = Vec::new();
        let mut pending = vec![env.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in self.runtime.read_dir(&dir)? {
                if self.runtime.is_symlink(&entry) || !self.runtime.is_dir(&entry) {
                    continue;
                }
                let name = entry.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                if pattern.matches(name) {
                    found.push(entry);
                } else {
                    pending.push(entry);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    /// Replace any symlink at `dest` with one pointing at `source`.
    /// Anything other than a symlink at `dest` is left alone and fails the link.
    fn link(&self, source: &Path, dest: &Path) -> Result<()> {
        if self.runtime.is_symlink(dest) {
            self.runtime.remove_symlink(dest)?;
        }
        if let Some(parent) = dest.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        info!("Linking {:?} -> {:?}", source, dest);
        self.runtime.symlink(source, dest)
    }

    fn link_man_pages(&self, env: &Path) {
        let man_src = env.join("share").join("man");
        if !self.runtime.is_dir(&man_src) {
            return;
        }

        for (source, relative) in self.two_level_entries(&man_src) {
            let dest = self.man_dir.join(&relative);
            if let Err(e) = self.link(&source, &dest) {
                warn!("Failed to link man page {:?}: {:#}", dest, e);
                eprintln!("Warning: Failed to link man page {:?}: {:#}", dest, e);
            }
        }
    }

    /// Entries matching `<dir>/*/*`, with their path relative to `dir`.
    fn two_level_entries(&self, dir: &Path) -> Vec<(PathBuf, PathBuf)> {
        let mut entries = Vec::new();
        let Ok(sections) = self.runtime.read_dir(dir) else {
            return entries;
        };
        for section in sections {
            if !self.runtime.is_dir(&section) {
                continue;
            }
            let Some(section_name) = section.file_name() else {
                continue;
            };
            if let Ok(pages) = self.runtime.read_dir(&section) {
                for page in pages {
                    if let Some(page_name) = page.file_name() {
                        let relative = Path::new(section_name).join(page_name);
                        entries.push((page, relative));
                    }
                }
            }
        }
        entries.sort();
        entries
    }

    fn link_candidates(&self) -> Result<Vec<PathBuf>> {
        let mut candidates = Vec::new();
        if self.runtime.is_dir(&self.bin_dir) {
            candidates.extend(self.runtime.read_dir(&self.bin_dir)?);
        }
        if self.runtime.is_dir(&self.man_dir) {
            candidates.extend(
                self.two_level_entries(&self.man_dir)
                    .into_iter()
                    .map(|(path, _)| path),
            );
        }
        Ok(candidates)
    }
}

/// Path column of a RECORD line. Paths may themselves contain commas; the
/// hash and size columns never do.
fn record_path(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut fields = line.rsplitn(3, ',');
    let (last, middle, first) = (fields.next(), fields.next(), fields.next());
    let path = match (first, middle) {
        (Some(path), Some(_)) => path,
        _ => last?,
    };
    Some(path.trim_matches('"'))
}
