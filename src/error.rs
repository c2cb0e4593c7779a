//! Typed failures surfaced by the registry and lifecycle operations.
//!
//! Operations return `anyhow::Result`; these variants travel inside
//! `anyhow::Error` and can be recovered with `downcast_ref::<VenvError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VenvError {
    #[error("Too many environments (>{max}) in {dir:?}")]
    CapacityExhausted { max: u32, dir: PathBuf },

    #[error("{program} program must be installed, and in your PATH or specified with --uv")]
    ToolMissing { program: String },

    #[error("{program} version is {found} but must be at least {required}")]
    ToolTooOld {
        program: String,
        found: String,
        required: String,
    },

    #[error("failed to create environment {path:?} for {package}")]
    BuildFailed { package: String, path: PathBuf },

    #[error("failed to install {package:?}")]
    InstallFailed { package: String },

    #[error("multiple packages qualified: {}", .packages.join(", "))]
    AmbiguousQualification { packages: Vec<String> },

    #[error("environment for {name} exists. Use --force to replace it")]
    AlreadyInstalled { name: String },

    #[error("no metadata found in {path:?}")]
    MetadataMissing { path: PathBuf },

    #[error("{package} has no executables to install")]
    NoExecutablesFound { package: String },

    #[error("Application {name} is not installed")]
    NotInstalled { name: String },

    #[error("Unknown package{}: {}", plural(.names.len()), .names.join(", "))]
    UnknownPackages { names: Vec<String> },

    #[error("{0}")]
    InvalidSelection(String),

    #[error("failed to link {path:?}")]
    LinkIo {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

fn plural(count: usize) -> &'static str {
    if count > 1 { "s" } else { "" }
}
