use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::package::SymlinkReconciler;
use crate::runtime::Runtime;

/// Something created by an operation that must be undone if it fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStep {
    /// A package link.
    Link(PathBuf),
    /// An environment directory together with every link into it.
    Environment(PathBuf),
}

/// Tracks what to undo when an operation fails part way.
#[derive(Debug, Default)]
pub struct CleanupContext {
    steps: Vec<CleanupStep>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, step: CleanupStep) {
        self.steps.push(step);
    }

    /// Forget everything (the operation succeeded).
    pub fn dismiss(&mut self) {
        self.steps.clear();
    }

    pub fn steps(&self) -> &[CleanupStep] {
        &self.steps
    }

    /// Undo in reverse order of registration. Failures are logged only.
    pub fn run<R: Runtime>(&mut self, runtime: &R, reconciler: &SymlinkReconciler<'_, R>) {
        while let Some(step) = self.steps.pop() {
            debug!("Cleaning up: {:?}", step);
            match &step {
                CleanupStep::Link(link) => {
                    if runtime.is_symlink(link)
                        && let Err(e) = runtime.remove_symlink(link)
                    {
                        warn!("Failed to remove {:?}: {:#}", link, e);
                    }
                }
                CleanupStep::Environment(env) => remove_environment(runtime, reconciler, env),
            }
        }
    }
}

fn remove_environment<R: Runtime>(runtime: &R, reconciler: &SymlinkReconciler<'_, R>, env: &Path) {
    if let Err(e) = reconciler.teardown(env) {
        warn!("Failed to remove links into {:?}: {:#}", env, e);
    }
    if runtime.exists(env)
        && let Err(e) = runtime.remove_dir_all(env)
    {
        warn!("Failed to remove {:?}: {:#}", env, e);
    }
}
