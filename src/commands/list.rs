use anyhow::Result;
use log::debug;
use serde_json::{Map, Value};

use crate::application::Workspace;
use crate::package::{MetadataRecord, SortOrder};
use crate::runtime::Runtime;
use crate::tool::PackageTool;

use super::selected_packages;

/// List installed packages and their recorded settings
#[tracing::instrument(skip(ws))]
pub fn list<R: Runtime, T: PackageTool>(
    ws: &Workspace<'_, R, T>,
    tokens: &[String],
    json: bool,
) -> Result<()> {
    let output = render_list(ws, tokens, json)?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

pub fn render_list<R: Runtime, T: PackageTool>(
    ws: &Workspace<'_, R, T>,
    tokens: &[String],
    json: bool,
) -> Result<String> {
    let mut entries = Map::new();
    for package in selected_packages(ws, tokens, SortOrder::ByName)? {
        let Some(meta) = &package.meta else {
            debug!("No metadata for {}", package.name);
            continue;
        };
        entries.insert(package.name.clone(), Value::Object(fields(meta)?));
    }

    if json {
        return Ok(serde_json::to_string_pretty(&Value::Object(entries))?);
    }

    let lines: Vec<String> = entries
        .iter()
        .map(|(name, value)| {
            let fields = value
                .as_object()
                .map(|obj| {
                    obj.iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!("{}: {}", name, fields)
        })
        .collect();
    Ok(lines.join("\n"))
}

/// Recorded settings without the name, keys sorted.
fn fields(meta: &MetadataRecord) -> Result<Map<String, Value>> {
    let mut fields = match serde_json::to_value(meta)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    fields.remove("name");
    Ok(fields)
}
