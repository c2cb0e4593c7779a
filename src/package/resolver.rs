//! Mapping user supplied tokens to installed packages.

use anyhow::Result;
use log::debug;
use std::fmt;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use crate::error::VenvError;
use crate::runtime::{Runtime, expand_user, real_path};

use super::{InstalledPackage, Registry};

/// A package argument as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageToken {
    ByName(String),
    /// A directory, matched against the recorded editable install paths.
    ByPath(PathBuf),
}

impl PackageToken {
    pub fn parse(token: &str) -> Self {
        let is_path = token == "."
            || token == ".."
            || token.contains(MAIN_SEPARATOR)
            || token.contains('/');
        if is_path {
            Self::ByPath(PathBuf::from(token))
        } else {
            Self::ByName(token.to_string())
        }
    }
}

impl fmt::Display for PackageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName(name) => write!(f, "{}", name),
            Self::ByPath(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub name: String,
    pub package: Option<InstalledPackage>,
}

impl Resolution {
    pub fn require(self) -> Result<InstalledPackage> {
        self.package
            .ok_or_else(|| VenvError::NotInstalled { name: self.name }.into())
    }
}

pub struct PackageResolver<'a, R: Runtime> {
    runtime: &'a R,
    registry: &'a Registry,
}

impl<'a, R: Runtime> PackageResolver<'a, R> {
    pub fn new(runtime: &'a R, registry: &'a Registry) -> Self {
        Self { runtime, registry }
    }

    #[tracing::instrument(skip(self))]
    pub fn resolve(&self, token: &PackageToken) -> Resolution {
        let name = match token {
            PackageToken::ByName(name) => name.clone(),
            PackageToken::ByPath(path) => self
                .package_for_path(path)
                .unwrap_or_else(|| token.to_string()),
        };
        Resolution {
            package: self.registry.get(&name).cloned(),
            name,
        }
    }

    pub fn resolve_str(&self, token: &str) -> Resolution {
        self.resolve(&PackageToken::parse(token))
    }

    /// Package whose editable source directory is, or most closely contains,
    /// `path`. Equally close candidates go to the smallest package name.
    fn package_for_path(&self, path: &Path) -> Option<String> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.runtime.current_dir().ok()?.join(path)
        };
        let target = real_path(self.runtime, &absolute);
        if !self.runtime.is_dir(&target) {
            debug!("{:?} is not a directory", target);
            return None;
        }

        let mut best: Option<(usize, &str)> = None;
        for package in self.registry.iter() {
            let Some(editpath) = package.meta.as_ref().and_then(|m| m.editpath.as_deref()) else {
                continue;
            };
            let source = real_path(
                self.runtime,
                &expand_user(self.runtime, Path::new(editpath)),
            );

            if source == target {
                return Some(package.name.clone());
            }
            if target.starts_with(&source) {
                let depth = source.components().count();
                if best.is_none_or(|(best_depth, _)| depth > best_depth) {
                    best = Some((depth, &package.name));
                }
            }
        }

        best.map(|(_, name)| name.to_string())
    }

    /// Package names selected by a multi-package command.
    ///
    /// With `all`, every installed package except those named in `tokens`
    /// (which then requires `skip`). Otherwise exactly the named packages.
    pub fn select(&self, tokens: &[String], all: bool, skip: bool) -> Result<Vec<String>> {
        if all {
            if !skip && !tokens.is_empty() {
                return Err(VenvError::InvalidSelection(
                    "Can not specify packages with --all unless also specifying --skip".into(),
                )
                .into());
            }
        } else if skip {
            return Err(VenvError::InvalidSelection(
                "--skip can only be specified with --all".into(),
            )
            .into());
        } else if tokens.is_empty() {
            return Err(VenvError::InvalidSelection(
                "Must specify at least one package, or --all".into(),
            )
            .into());
        }

        let mut given: Vec<String> = Vec::new();
        for token in tokens {
            let name = self.resolve_str(token).name;
            if !given.contains(&name) {
                given.push(name);
            }
        }

        let mut unknown: Vec<String> = given
            .iter()
            .filter(|name| !self.registry.contains(name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(VenvError::UnknownPackages { names: unknown }.into());
        }

        if all {
            Ok(self
                .registry
                .names()
                .into_iter()
                .filter(|name| !given.contains(name))
                .collect())
        } else {
            Ok(given)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{EnvId, MetadataRecord};
    use crate::runtime::MockRuntime;
    use crate::runtime::path::normalize_path;

    fn package(name: &str, id: u32, editpath: Option<&str>) -> InstalledPackage {
        InstalledPackage {
            name: name.to_string(),
            env_id: EnvId::new(id).unwrap(),
            env_dir: PathBuf::from(format!("/v/venvs/{}", id)),
            meta: Some(MetadataRecord {
                editpath: editpath.map(String::from),
                ..MetadataRecord::new(name)
            }),
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::default();
        registry.insert(package("foo", 1, Some("/src/foo")));
        registry.insert(package("foo-docs", 2, Some("/src/foo/docs")));
        registry.insert(package("bar", 3, None));
        registry.insert(package("twin-b", 4, Some("/src/twins")));
        registry.insert(package("twin-a", 5, Some("~/../../src/twins")));
        registry
    }

    fn runtime(cwd: &'static str) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_current_dir()
            .returning(move || Ok(PathBuf::from(cwd)));
        runtime
            .expect_canonicalize()
            .returning(|p| Ok(normalize_path(p)));
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));
        runtime
            .expect_is_dir()
            .returning(|p| p.starts_with("/src"));
        runtime
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(PackageToken::parse("demo"), PackageToken::ByName("demo".into()));
        assert_eq!(PackageToken::parse("."), PackageToken::ByPath(".".into()));
        assert_eq!(PackageToken::parse(".."), PackageToken::ByPath("..".into()));
        assert_eq!(
            PackageToken::parse("src/demo"),
            PackageToken::ByPath("src/demo".into())
        );
        assert_eq!(PackageToken::parse("demo").to_string(), "demo");
    }

    #[test]
    fn test_resolve_by_name() {
        let registry = registry();
        let runtime = MockRuntime::new();
        let resolver = PackageResolver::new(&runtime, &registry);

        let resolution = resolver.resolve_str("bar");
        assert_eq!(resolution.name, "bar");
        assert_eq!(resolution.package.unwrap().env_id.get(), 3);

        let resolution = resolver.resolve_str("missing");
        assert_eq!(resolution.name, "missing");
        assert!(resolution.package.is_none());
    }

    #[test]
    fn test_resolve_dot_exact_editpath() {
        let registry = registry();
        let runtime = runtime("/src/foo");
        let resolver = PackageResolver::new(&runtime, &registry);

        assert_eq!(resolver.resolve_str(".").name, "foo");
    }

    #[test]
    fn test_resolve_longest_ancestor_wins() {
        let registry = registry();
        let runtime = runtime("/src/foo/docs/api");
        let resolver = PackageResolver::new(&runtime, &registry);

        assert_eq!(resolver.resolve_str(".").name, "foo-docs");
        assert_eq!(resolver.resolve_str("..").name, "foo-docs");
        assert_eq!(resolver.resolve_str("../..").name, "foo");
    }

    #[test]
    fn test_resolve_tie_breaks_to_smallest_name() {
        let registry = registry();
        let runtime = runtime("/src/twins/pkg");
        let resolver = PackageResolver::new(&runtime, &registry);

        assert_eq!(resolver.resolve_str(".").name, "twin-a");
    }

    #[test]
    fn test_resolve_path_without_match_uses_token() {
        let registry = registry();
        let runtime = runtime("/src/other");
        let resolver = PackageResolver::new(&runtime, &registry);

        let resolution = resolver.resolve_str(".");
        assert_eq!(resolution.name, ".");
        assert!(resolution.package.is_none());

        let resolution = resolver.resolve_str("/not/a/dir");
        assert_eq!(resolution.name, "/not/a/dir");
    }

    #[test]
    fn test_require_not_installed() {
        let err = Resolution {
            name: "ghost".into(),
            package: None,
        }
        .require()
        .unwrap_err();
        assert_eq!(err.to_string(), "Application ghost is not installed");
    }

    #[test]
    fn test_select() {
        let registry = registry();
        let runtime = MockRuntime::new();
        let resolver = PackageResolver::new(&runtime, &registry);

        assert_eq!(
            resolver.select(&[], true, false).unwrap(),
            vec!["bar", "foo", "foo-docs", "twin-a", "twin-b"]
        );
        assert_eq!(
            resolver
                .select(&["foo".into(), "twin-a".into()], true, true)
                .unwrap(),
            vec!["bar", "foo-docs", "twin-b"]
        );
        assert_eq!(
            resolver
                .select(&["foo".into(), "bar".into(), "foo".into()], false, false)
                .unwrap(),
            vec!["foo", "bar"]
        );
    }

    #[test]
    fn test_select_usage_errors() {
        let registry = registry();
        let runtime = MockRuntime::new();
        let resolver = PackageResolver::new(&runtime, &registry);

        for (tokens, all, skip) in [
            (vec!["foo".to_string()], true, false),
            (vec!["foo".to_string()], false, true),
            (vec![], false, false),
        ] {
            let err = resolver.select(&tokens, all, skip).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<VenvError>(),
                Some(VenvError::InvalidSelection(_))
            ));
        }
    }

    #[test]
    fn test_select_unknown_reported_together() {
        let registry = registry();
        let runtime = MockRuntime::new();
        let resolver = PackageResolver::new(&runtime, &registry);

        let err = resolver
            .select(&["zz".into(), "foo".into(), "aa".into()], false, false)
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown packages: aa, zz");
    }
}
