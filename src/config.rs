//! Resolved, immutable configuration shared by every operation.

use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

use crate::runtime::{Runtime, expand_user};

pub const APP_NAME: &str = "venvlink";
pub const DEFAULT_UV: &str = "uv";
pub const DEFAULT_PYTHON: &str = if cfg!(windows) { "python" } else { "python3" };
pub const METADATA_FILE: &str = "venvlink_metadata.json";
pub const SNAPSHOT_FILE: &str = "venvlink_freeze.txt";
pub const FLAGS_FILE: &str = "venvlink-flags.conf";

/// Settings as given on the command line or via environment variables.
/// Unset values fall back to defaults in [`Config::resolve`].
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub home: Option<String>,
    pub bin_dir: Option<String>,
    pub man_dir: Option<String>,
    pub default_python: Option<String>,
    pub uv: Option<String>,
    pub no_man_pages: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub home: PathBuf,
    /// One symlink per installed package, named after it.
    pub packages_dir: PathBuf,
    /// Numbered environment directories.
    pub venvs_dir: PathBuf,
    pub bin_dir: PathBuf,
    /// `None` when man page linking is disabled.
    pub man_dir: Option<PathBuf>,
    pub man_dir_setting: PathBuf,
    pub default_python: String,
    pub uv: String,
    pub verbose: bool,
}

impl Config {
    #[tracing::instrument(skip(runtime))]
    pub fn resolve<R: Runtime>(runtime: &R, options: Options) -> Result<Self> {
        let privileged = runtime.is_privileged();

        let home = match options.home {
            Some(home) => expand_path(runtime, &home),
            None if privileged => PathBuf::from("/opt").join(APP_NAME),
            None => runtime
                .data_dir()
                .context("Could not find user data directory")?
                .join(APP_NAME),
        };
        let bin_dir = expand_path(
            runtime,
            options.bin_dir.as_deref().unwrap_or(if privileged {
                "/usr/local/bin"
            } else {
                "~/.local/bin"
            }),
        );
        let man_dir_setting = expand_path(
            runtime,
            options.man_dir.as_deref().unwrap_or(if privileged {
                "/usr/local/share/man"
            } else {
                "~/.local/share/man"
            }),
        );
        let default_python = expand_path(
            runtime,
            options.default_python.as_deref().unwrap_or(DEFAULT_PYTHON),
        )
        .display()
        .to_string();

        let config = Self {
            packages_dir: home.join("packages"),
            venvs_dir: home.join("venvs"),
            home,
            bin_dir,
            man_dir: (!options.no_man_pages).then(|| man_dir_setting.clone()),
            man_dir_setting,
            default_python,
            uv: options.uv.unwrap_or_else(|| DEFAULT_UV.to_string()),
            verbose: options.verbose,
        };
        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }

    /// Lock file serializing environment slot allocation.
    pub fn lock_path(&self) -> PathBuf {
        self.home.join(format!(".{}.lock", APP_NAME))
    }

    /// Create the managed directories if missing.
    pub fn ensure_dirs<R: Runtime>(&self, runtime: &R) -> Result<()> {
        for dir in [&self.packages_dir, &self.venvs_dir, &self.bin_dir] {
            runtime.create_dir_all(dir)?;
        }
        if let Some(man_dir) = &self.man_dir {
            runtime.create_dir_all(man_dir)?;
        }
        Ok(())
    }
}

/// Expand `$VAR`, `${VAR}` and a leading `~`. Unknown variables are kept verbatim.
pub fn expand_path<R: Runtime>(runtime: &R, text: &str) -> PathBuf {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match runtime.env_var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);

    expand_user(runtime, Path::new(&out))
}

/// Report whether `bin_dir` is on the search path.
pub fn path_check(label: &str, bin_dir: &Path, path_var: Option<&str>) -> String {
    let Some(path_var) = path_var.filter(|p| !p.is_empty()) else {
        return "WARNING: Your PATH is not set.".to_string();
    };

    let in_path = std::env::split_paths(path_var).any(|p| p == bin_dir);
    if in_path {
        format!("Your PATH contains {} ({}).", label, bin_dir.display())
    } else {
        format!(
            "WARNING: Your PATH does not contain {} ({}).",
            label,
            bin_dir.display()
        )
    }
}

/// Default command line flags from the user's flags file, `#` comments removed.
pub fn default_flags<R: Runtime>(runtime: &R) -> Vec<String> {
    let Some(path) = runtime.config_dir().map(|dir| dir.join(FLAGS_FILE)) else {
        return Vec::new();
    };
    if !runtime.exists(&path) {
        return Vec::new();
    }

    let content = match runtime.read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Ignoring unreadable flags file {:?}: {:#}", path, e);
            return Vec::new();
        }
    };
    parse_flags(&content).unwrap_or_else(|| {
        log::warn!("Ignoring flags file {:?} with unbalanced quotes", path);
        Vec::new()
    })
}

/// Split the flags with shell quoting rules once `#` comments are removed.
/// `None` when quoting is unbalanced.
fn parse_flags(content: &str) -> Option<Vec<String>> {
    let joined = content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .collect::<Vec<_>>()
        .join(" ");
    shlex::split(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::test_utils::test_home;
    use mockall::predicate::eq;

    fn user_runtime(privileged: bool) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(move || privileged);
        runtime.expect_home_dir().returning(|| Some(test_home()));
        runtime
            .expect_data_dir()
            .returning(|| Some(test_home().join(".local/share")));
        runtime
            .expect_env_var()
            .with(eq("VENVLINK_TEST"))
            .returning(|_| Ok("/srv/apps".to_string()));
        runtime
            .expect_env_var()
            .returning(|_| Err(std::env::VarError::NotPresent));
        runtime
    }

    #[test]
    fn test_resolve_user_defaults() {
        let runtime = user_runtime(false);
        let config = Config::resolve(&runtime, Options::default()).unwrap();

        assert_eq!(config.home, test_home().join(".local/share/venvlink"));
        assert_eq!(
            config.packages_dir,
            test_home().join(".local/share/venvlink/packages")
        );
        assert_eq!(config.venvs_dir, test_home().join(".local/share/venvlink/venvs"));
        assert_eq!(config.bin_dir, test_home().join(".local/bin"));
        assert_eq!(config.man_dir, Some(test_home().join(".local/share/man")));
        assert_eq!(config.uv, "uv");
        assert_eq!(config.default_python, DEFAULT_PYTHON);
        assert_eq!(
            config.lock_path(),
            test_home().join(".local/share/venvlink/.venvlink.lock")
        );
    }

    #[test]
    fn test_resolve_privileged_defaults() {
        let runtime = user_runtime(true);
        let config = Config::resolve(&runtime, Options::default()).unwrap();

        assert_eq!(config.home, PathBuf::from("/opt/venvlink"));
        assert_eq!(config.bin_dir, PathBuf::from("/usr/local/bin"));
        assert_eq!(config.man_dir, Some(PathBuf::from("/usr/local/share/man")));
    }

    #[test]
    fn test_resolve_overrides_and_no_man_pages() {
        let runtime = user_runtime(false);
        let options = Options {
            home: Some("$VENVLINK_TEST/home".into()),
            bin_dir: Some("${VENVLINK_TEST}/bin".into()),
            uv: Some("/usr/bin/uv".into()),
            default_python: Some("~/py/bin/python3".into()),
            no_man_pages: true,
            ..Default::default()
        };
        let config = Config::resolve(&runtime, options).unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/apps/home"));
        assert_eq!(config.bin_dir, PathBuf::from("/srv/apps/bin"));
        assert_eq!(config.man_dir, None);
        assert_eq!(config.man_dir_setting, test_home().join(".local/share/man"));
        assert_eq!(config.uv, "/usr/bin/uv");
        assert_eq!(
            config.default_python,
            test_home().join("py/bin/python3").display().to_string()
        );
    }

    #[test]
    fn test_expand_path_unknown_variable_kept() {
        let runtime = user_runtime(false);
        assert_eq!(
            expand_path(&runtime, "/x/$NOPE/y"),
            PathBuf::from("/x/$NOPE/y")
        );
        assert_eq!(expand_path(&runtime, "/x/${NOPE"), PathBuf::from("/x/${NOPE"));
        assert_eq!(expand_path(&runtime, "/cost$"), PathBuf::from("/cost$"));
    }

    #[test]
    fn test_path_check() {
        let bin = Path::new("/home/user/.local/bin");
        assert_eq!(
            path_check("VENVLINK_BIN_DIR", bin, None),
            "WARNING: Your PATH is not set."
        );
        assert!(
            path_check("VENVLINK_BIN_DIR", bin, Some("/usr/bin:/home/user/.local/bin"))
                .starts_with("Your PATH contains")
        );
        assert!(
            path_check("VENVLINK_BIN_DIR", bin, Some("/usr/bin")).starts_with("WARNING")
        );
    }

    #[test]
    fn test_parse_flags() {
        let content = "--bin-dir ~/bin  # personal bin\n\n# full line comment\n--no-man-pages\n";
        assert_eq!(
            parse_flags(content),
            Some(vec![
                "--bin-dir".to_string(),
                "~/bin".to_string(),
                "--no-man-pages".to_string()
            ])
        );
    }

    #[test]
    fn test_parse_flags_quoted_values() {
        let content = "--home \"/srv/my apps\"\n--bin-dir '/opt/my bin' # spaced\n";
        assert_eq!(
            parse_flags(content),
            Some(vec![
                "--home".to_string(),
                "/srv/my apps".to_string(),
                "--bin-dir".to_string(),
                "/opt/my bin".to_string()
            ])
        );
        assert_eq!(parse_flags("--home \"/srv/unterminated\n"), None);
    }

    #[test]
    fn test_default_flags_unbalanced_quotes_ignored() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_config_dir()
            .returning(|| Some(PathBuf::from("/home/user/.config")));
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Ok("--home 'broken\n".to_string()));

        assert!(default_flags(&runtime).is_empty());
    }

    #[test]
    fn test_default_flags_missing_file() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_config_dir()
            .returning(|| Some(PathBuf::from("/home/user/.config")));
        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/home/user/.config/venvlink-flags.conf")))
            .returning(|_| false);

        assert!(default_flags(&runtime).is_empty());
    }
}
