//! Read-only and pass-through commands.

mod list;
mod runpip;
mod venv;

pub use list::{list, render_list};
pub use runpip::runpip;
pub use venv::{render_venvs, venv};

use anyhow::Result;

use crate::application::Workspace;
use crate::package::{InstalledPackage, SortOrder};
use crate::runtime::Runtime;
use crate::tool::PackageTool;

/// The packages named by `tokens`, or every package when none are given.
fn selected_packages<R: Runtime, T: PackageTool>(
    ws: &Workspace<'_, R, T>,
    tokens: &[String],
    order: SortOrder,
) -> Result<Vec<InstalledPackage>> {
    if tokens.is_empty() {
        return Ok(ws.registry().list(order).into_iter().cloned().collect());
    }
    let mut packages = tokens
        .iter()
        .map(|token| ws.find(token))
        .collect::<Result<Vec<_>>>()?;
    if order == SortOrder::ByEnvironment {
        packages.sort_by_key(|p| p.env_id);
    }
    Ok(packages)
}
