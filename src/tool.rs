//! The external environment builder and package installer.
//!
//! Everything that creates environments or moves packages in and out of them
//! goes through [`PackageTool`]. [`Uv`] is the production implementation and
//! drives the `uv` binary with explicit argument vectors.

use anyhow::{Result, bail};
use log::{debug, info};
use semver::Version;
use std::path::{Path, PathBuf};

use crate::error::VenvError;
use crate::process::{CommandRunner, ToolCommand};

pub const MIN_UV_VERSION: Version = Version::new(0, 1, 33);

/// One row of the installer's package listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledDist {
    pub name: String,
    pub version: String,
    /// Source directory of an editable install.
    pub editable_location: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    /// Source installed in editable mode (`-e`), placed before `packages`.
    pub editable: Option<String>,
    pub packages: Vec<String>,
    pub no_deps: bool,
    pub upgrade: bool,
    pub reinstall: bool,
    pub index_url: Option<String>,
}

impl InstallRequest {
    /// Human readable list of what is being installed, for error messages.
    pub fn describe(&self) -> String {
        self.editable
            .iter()
            .chain(self.packages.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait PackageTool {
    /// Build a fresh environment at `env` using interpreter `python`.
    fn create_env(&self, env: &Path, python: &str, system_site_packages: bool) -> Result<()>;
    fn install(&self, env: &Path, request: &InstallRequest) -> Result<()>;
    fn uninstall(&self, env: &Path, packages: &[String]) -> Result<()>;
    fn list(&self, env: &Path) -> Result<Vec<InstalledDist>>;
    /// Exactly pinned listing of everything installed in `env`.
    fn freeze(&self, env: &Path) -> Result<String>;
    /// Make `env` match the pinned `requirements` file, reinstalling everything.
    fn sync(&self, env: &Path, requirements: &Path, index_url: Option<String>) -> Result<()>;
    /// Pass arbitrary arguments to the installer, scoped to `env`.
    fn pip(&self, env: &Path, args: &[String]) -> Result<()>;
    /// Version of the interpreter inside `env`, if it can be determined.
    fn python_version(&self, env: &Path) -> Option<String>;
}

pub struct Uv<C: CommandRunner> {
    program: String,
    runner: C,
    verbose: bool,
}

impl<C: CommandRunner> Uv<C> {
    pub fn new(program: impl Into<String>, runner: C, verbose: bool) -> Self {
        Self {
            program: program.into(),
            runner,
            verbose,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Confirm the program runs and is recent enough.
    #[tracing::instrument(skip(self))]
    pub fn check_version(&self) -> Result<Version> {
        let output = self
            .runner
            .output(&ToolCommand::new(&self.program).arg("--version"))
            .map_err(|e| {
                debug!("Version probe failed: {:#}", e);
                VenvError::ToolMissing {
                    program: self.program.clone(),
                }
            })?;

        let found = output.split_whitespace().nth(1).unwrap_or_default();
        let version = parse_version(found).ok_or_else(|| VenvError::ToolTooOld {
            program: self.program.clone(),
            found: found.to_string(),
            required: MIN_UV_VERSION.to_string(),
        })?;

        if version < MIN_UV_VERSION {
            return Err(VenvError::ToolTooOld {
                program: self.program.clone(),
                found: version.to_string(),
                required: MIN_UV_VERSION.to_string(),
            }
            .into());
        }
        debug!("Using {} {}", self.program, version);
        Ok(version)
    }

    /// `uv pip <op> -p <env>`
    fn pip_command(&self, env: &Path, op: &str) -> ToolCommand {
        ToolCommand::new(&self.program)
            .args(["pip", op, "-p"])
            .arg(env.display().to_string())
    }

    fn run(&self, command: ToolCommand) -> Result<()> {
        info!(">>> Running {}", command);
        self.runner.run(&command)
    }
}

impl<C: CommandRunner> PackageTool for Uv<C> {
    fn create_env(&self, env: &Path, python: &str, system_site_packages: bool) -> Result<()> {
        let command = ToolCommand::new(&self.program)
            .args(["venv", "-p", python])
            .arg(if self.verbose { "-v" } else { "-q" })
            .arg_if(system_site_packages, "--system-site-packages")
            .arg(env.display().to_string());
        self.run(command)
    }

    fn install(&self, env: &Path, request: &InstallRequest) -> Result<()> {
        let mut command = self
            .pip_command(env, "install")
            .arg("--compile")
            .arg_if(self.verbose, "-v")
            .arg_if(request.no_deps, "--no-deps")
            .arg_if(request.upgrade, "--upgrade")
            .arg_if(request.reinstall, "--reinstall");
        if let Some(url) = &request.index_url {
            command = command.args(["-i", url]);
        }
        if let Some(source) = &request.editable {
            command = command.args(["-e", source]);
        }
        self.run(command.args(request.packages.iter().cloned()))
    }

    fn uninstall(&self, env: &Path, packages: &[String]) -> Result<()> {
        let command = self
            .pip_command(env, "uninstall")
            .arg_if(self.verbose, "-v")
            .args(packages.iter().cloned());
        self.run(command)
    }

    fn list(&self, env: &Path) -> Result<Vec<InstalledDist>> {
        let output = self.runner.output(&self.pip_command(env, "list"))?;
        Ok(parse_listing(&output))
    }

    fn freeze(&self, env: &Path) -> Result<String> {
        self.runner.output(&self.pip_command(env, "freeze"))
    }

    fn sync(&self, env: &Path, requirements: &Path, index_url: Option<String>) -> Result<()> {
        let mut command = self
            .pip_command(env, "sync")
            .args(["--compile", "--reinstall"])
            .arg_if(self.verbose, "-v");
        if let Some(url) = index_url {
            command = command.arg("-i").arg(url);
        }
        self.run(command.arg(requirements.display().to_string()))
    }

    fn pip(&self, env: &Path, args: &[String]) -> Result<()> {
        let Some((op, rest)) = args.split_first() else {
            bail!("No pip command given");
        };
        self.run(self.pip_command(env, op).args(rest.iter().cloned()))
    }

    fn python_version(&self, env: &Path) -> Option<String> {
        let python = env.join("bin").join("python");
        let output = self
            .runner
            .output(&ToolCommand::new(python.display().to_string()).arg("-V"))
            .ok()?;
        output.split_whitespace().nth(1).map(String::from)
    }
}

/// Parse `major.minor.patch`, tolerating missing components and suffixes.
fn parse_version(text: &str) -> Option<Version> {
    let mut parts = text.split('.').map(|part| {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u64>().ok()
    });
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

/// Parse the tabular package listing: rows follow the `----` separator line,
/// columns are name, version and an optional editable project location.
fn parse_listing(output: &str) -> Vec<InstalledDist> {
    output
        .lines()
        .skip_while(|line| !line.starts_with('-'))
        .skip(1)
        .filter_map(|line| {
            if line.starts_with(char::is_whitespace) {
                return None;
            }
            let name = line.split_whitespace().next()?;
            let rest = line[name.len()..].trim_start();
            let mut rest_fields = rest.splitn(2, char::is_whitespace);
            let version = rest_fields.next().filter(|s| !s.is_empty())?;
            let location = rest_fields
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from);
            Some(InstalledDist {
                name: name.to_string(),
                version: version.to_string(),
                editable_location: location,
            })
        })
        .collect()
}
