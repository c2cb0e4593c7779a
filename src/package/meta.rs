use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{METADATA_FILE, SNAPSHOT_FILE};
use crate::runtime::Runtime;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Per-environment record of how a package was installed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataRecord {
    pub name: String,
    /// Source directory of an editable install, `~` abbreviated as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editpath: Option<String>,
    /// Expose executables of every installed distribution.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deps: bool,
    /// Environment can see system site packages.
    #[serde(default, skip_serializing_if = "is_false")]
    pub sys: bool,
    /// Custom package index URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Explicit interpreter path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    /// Interpreter version specifier, e.g. `3.12`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pyenv: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub injected: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<String>,
}

impl MetadataRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sort and de-duplicate the list fields.
    pub fn normalize(&mut self) {
        for list in [&mut self.injected, &mut self.apps] {
            list.sort();
            list.dedup();
        }
    }

    /// Interpreter to build the environment with, falling back to `default`.
    pub fn interpreter<'a>(&'a self, default: &'a str) -> &'a str {
        self.python
            .as_deref()
            .or(self.pyenv.as_deref())
            .unwrap_or(default)
    }
}

/// Reads and writes the metadata record and dependency snapshot kept inside
/// each environment directory.
pub struct MetadataStore<'a, R: Runtime> {
    runtime: &'a R,
}

impl<'a, R: Runtime> MetadataStore<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self { runtime }
    }

    pub fn metadata_path(&self, env: &Path) -> PathBuf {
        env.join(METADATA_FILE)
    }

    pub fn snapshot_path(&self, env: &Path) -> PathBuf {
        env.join(SNAPSHOT_FILE)
    }

    /// Load the record. A missing or unreadable record is `None`.
    #[tracing::instrument(skip(self))]
    pub fn load(&self, env: &Path) -> Option<MetadataRecord> {
        let path = self.metadata_path(env);
        let content = match self.runtime.read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No metadata at {:?}: {:#}", path, e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Ignoring corrupt metadata {:?}: {}", path, e);
                None
            }
        }
    }

    #[tracing::instrument(skip(self, record))]
    pub fn save(&self, env: &Path, record: &MetadataRecord) -> Result<()> {
        let mut record = record.clone();
        record.normalize();

        let path = self.metadata_path(env);
        let content = serde_json::to_string_pretty(&record)?;
        self.runtime
            .write(&path, content.as_bytes())
            .with_context(|| format!("Failed to save metadata to {:?}", path))
    }

    pub fn save_snapshot(&self, env: &Path, freeze: &str) -> Result<()> {
        let path = self.snapshot_path(env);
        let mut content = freeze.trim_end().to_string();
        content.push('\n');
        self.runtime
            .write(&path, content.as_bytes())
            .with_context(|| format!("Failed to save dependency snapshot to {:?}", path))
    }
}
