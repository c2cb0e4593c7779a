//! Requirement and distribution name handling.

use std::collections::BTreeMap;

/// Normalize a distribution name: lowercase, with runs of `-`, `_` and `.`
/// collapsed to a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.extend(c.to_lowercase());
    }
    out
}

/// The distribution name a requirement string refers to, normalized.
///
/// `demo-plugin[extra]>=2; python_version > "3.8"` gives `demo-plugin`.
/// Strings that do not start with a name (paths, URLs) are used whole.
pub fn requirement_name(requirement: &str) -> String {
    let trimmed = requirement.trim();
    let name: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();

    let rest = &trimmed[name.len()..];
    let is_name = !name.is_empty()
        && (rest.is_empty() || rest.starts_with(|c: char| "[<>=!~;@ (".contains(c)));

    if is_name {
        normalize_name(&name)
    } else {
        trimmed.to_string()
    }
}

/// Name segment of a `<name>-<version>.dist-info` directory, normalized.
pub fn dist_info_name(dir_name: &str) -> String {
    let stem = dir_name.strip_suffix(".dist-info").unwrap_or(dir_name);
    normalize_name(stem.split('-').next().unwrap_or_default())
}

/// Merge `changes` into `current`, keyed by requirement name.
///
/// When adding, a change replaces any existing requirement for the same
/// name. When removing, every requirement named in `changes` is dropped.
/// The result is sorted.
pub fn merge_requirements(current: &[String], changes: &[String], add: bool) -> Vec<String> {
    let mut by_name: BTreeMap<String, String> = current
        .iter()
        .map(|r| (requirement_name(r), r.clone()))
        .collect();

    for change in changes {
        let name = requirement_name(change);
        if add {
            by_name.insert(name, change.clone());
        } else {
            by_name.remove(&name);
        }
    }

    let mut merged: Vec<String> = by_name.into_values().collect();
    merged.sort();
    merged
}
