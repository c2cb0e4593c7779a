use anyhow::Result;

use crate::application::Workspace;
use crate::package::SortOrder;
use crate::runtime::{Runtime, unexpand_user};
use crate::tool::PackageTool;

use super::selected_packages;

/// Show environment paths of installed packages
#[tracing::instrument(skip(ws))]
pub fn venv<R: Runtime, T: PackageTool>(
    ws: &Workspace<'_, R, T>,
    tokens: &[String],
    path_full: bool,
    sort_venv: bool,
) -> Result<()> {
    let output = render_venvs(ws, tokens, path_full, sort_venv)?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// One path per package, prefixed with `name -> ` when there are several.
pub fn render_venvs<R: Runtime, T: PackageTool>(
    ws: &Workspace<'_, R, T>,
    tokens: &[String],
    path_full: bool,
    sort_venv: bool,
) -> Result<String> {
    let order = if sort_venv {
        SortOrder::ByEnvironment
    } else {
        SortOrder::ByName
    };
    let packages = selected_packages(ws, tokens, order)?;

    let lines: Vec<String> = packages
        .iter()
        .map(|package| {
            let path = if path_full {
                package.env_dir.display().to_string()
            } else {
                unexpand_user(ws.runtime(), &package.env_dir)
            };
            if packages.len() > 1 {
                format!("{} -> {}", package.name, path)
            } else {
                path
            }
        })
        .collect();
    Ok(lines.join("\n"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::application::InstallOptions;
    use crate::application::test_support::{simulate_tool, temp_config};
    use crate::runtime::RealRuntime;
    use crate::tool::MockPackageTool;

    #[test]
    fn test_render_venvs() {
        let (_dir, config) = temp_config();
        let mut first = MockPackageTool::new();
        simulate_tool(&mut first, "zeta", &["zeta-cli"]);
        let mut second = MockPackageTool::new();
        simulate_tool(&mut second, "alpha", &["alpha-cli"]);

        {
            let mut ws = Workspace::open(&RealRuntime, &first, &config).unwrap();
            ws.install(&["zeta".into()], &InstallOptions::default()).unwrap();
        }
        let mut ws = Workspace::open(&RealRuntime, &second, &config).unwrap();
        ws.install(&["alpha".into()], &InstallOptions::default()).unwrap();

        let venvs = config.venvs_dir.display().to_string();
        assert_eq!(
            render_venvs(&ws, &[], true, false).unwrap(),
            format!("alpha -> {venvs}/2\nzeta -> {venvs}/1")
        );
        assert_eq!(
            render_venvs(&ws, &[], true, true).unwrap(),
            format!("zeta -> {venvs}/1\nalpha -> {venvs}/2")
        );
        assert_eq!(
            render_venvs(&ws, &["alpha".into()], true, false).unwrap(),
            format!("{venvs}/2")
        );
    }
}
