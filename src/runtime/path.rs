//! Path utility functions for normalization and comparison.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use super::Runtime;

/// Upper bound on symlink hops followed when resolving a dangling chain.
const MAX_LINK_DEPTH: usize = 40;

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Keep the `..` if there is nothing left to pop
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Check if a path is under a given directory by comparing normalized path components.
/// Returns true if `path` is under `dir` or equal to it.
///
/// # Security
/// Both paths are normalized first, so `/usr/local/bin/../../../etc/passwd`
/// is NOT under `/usr/local`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let normalized_path = normalize_path(path);
    let normalized_dir = normalize_path(dir);

    let path_components: Vec<_> = normalized_path.components().collect();
    let dir_components: Vec<_> = normalized_dir.components().collect();

    if path_components.len() < dir_components.len() {
        return false;
    }

    dir_components
        .iter()
        .zip(path_components.iter())
        .all(|(d, p)| d == p)
}

/// Like [`is_path_under`] but `dir` must be a proper ancestor of `path`.
pub fn is_strictly_under(path: &Path, dir: &Path) -> bool {
    is_path_under(path, dir) && normalize_path(path) != normalize_path(dir)
}

/// Resolve `path` to its real location even when it is (or passes through)
/// a dangling symlink.
///
/// Existing paths are canonicalized. For missing paths, symlinks are followed
/// hop by hop, then the deepest existing ancestor is canonicalized and the
/// missing tail appended again. A link into a deleted environment therefore
/// still resolves to a path inside that environment.
pub fn real_path<R: Runtime>(runtime: &R, path: &Path) -> PathBuf {
    if let Ok(canonical) = runtime.canonicalize(path) {
        return canonical;
    }

    let mut current = normalize_path(path);
    for _ in 0..MAX_LINK_DEPTH {
        if !runtime.is_symlink(&current) {
            break;
        }
        match runtime.resolve_link(&current) {
            Ok(target) => current = target,
            Err(_) => break,
        }
        if let Ok(canonical) = runtime.canonicalize(&current) {
            return canonical;
        }
    }

    let mut tail: Vec<OsString> = Vec::new();
    let mut base = current.clone();
    while let Some(name) = base.file_name().map(|n| n.to_os_string()) {
        tail.push(name);
        if !base.pop() {
            break;
        }
        if let Ok(canonical) = runtime.canonicalize(&base) {
            return tail
                .iter()
                .rev()
                .fold(canonical, |acc, part| acc.join(part));
        }
    }

    current
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_user<R: Runtime>(runtime: &R, path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match runtime.home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Replace the home directory prefix with `~` for display.
pub fn unexpand_user<R: Runtime>(runtime: &R, path: &Path) -> String {
    if let Some(home) = runtime.home_dir()
        && let Ok(rest) = path.strip_prefix(&home)
    {
        if rest.as_os_str().is_empty() {
            return "~".to_string();
        }
        return Path::new("~").join(rest).display().to_string();
    }
    path.display().to_string()
}
