use anyhow::{Context, Result};

use crate::application::Workspace;
use crate::runtime::Runtime;
use crate::tool::PackageTool;

/// Run an installer `pip` sub-command against a package's environment
#[tracing::instrument(skip(ws))]
pub fn runpip<R: Runtime, T: PackageTool>(
    ws: &Workspace<'_, R, T>,
    token: &str,
    args: &[String],
) -> Result<()> {
    let package = ws.find(token)?;
    ws.tool()
        .pip(&package.env_dir, args)
        .with_context(|| format!("Failed to run pip for {}", package.name))
}
