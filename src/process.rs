//! Running external programs from explicit argument vectors.

use anyhow::{Context, Result, bail};
use log::debug;
use std::fmt;
use std::process::{Command, Stdio};

/// A program plus its arguments. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Push `arg` only when `cond` holds.
    pub fn arg_if(self, cond: bool, arg: impl Into<String>) -> Self {
        if cond { self.arg(arg) } else { self }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

/// Quote for display only.
fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Run with inherited stdio. Fails if the program cannot be started or
    /// exits unsuccessfully.
    fn run(&self, command: &ToolCommand) -> Result<()>;

    /// Run and capture stdout (trimmed). Fails like [`CommandRunner::run`].
    fn output(&self, command: &ToolCommand) -> Result<String>;
}

pub struct RealCommandRunner;

impl CommandRunner for RealCommandRunner {
    #[tracing::instrument(skip_all, fields(command = %command))]
    fn run(&self, command: &ToolCommand) -> Result<()> {
        debug!("Running {}", command);
        let status = Command::new(&command.program)
            .args(&command.args)
            .status()
            .with_context(|| format!("Failed to run {}", command))?;
        if !status.success() {
            bail!("{} failed with {}", command, status);
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(command = %command))]
    fn output(&self, command: &ToolCommand) -> Result<String> {
        debug!("Capturing {}", command);
        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("Failed to run {}", command))?;
        if !output.status.success() {
            bail!("{} failed with {}", command, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
