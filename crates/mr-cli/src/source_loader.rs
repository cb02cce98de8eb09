use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use mr_core::{MacroError, MacroErrorKind};
use walkdir::WalkDir;

use crate::{map_cli_json_invalid, map_cli_source_path, map_cli_source_read, map_cli_source_scan};

pub(crate) const TEMPLATE_EXTENSION: &str = "tpl";
pub(crate) const OUTPUT_EXTENSION: &str = "txt";

fn source_error(code: &str, message: String) -> MacroError {
    MacroError::new(MacroErrorKind::Io, code, message)
}

pub(crate) fn resolve_path(raw: &str) -> Result<PathBuf, MacroError> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()
        .map_err(map_cli_source_path)?
        .join(path))
}

pub(crate) fn resolve_templates_dir(templates_dir: &str) -> Result<PathBuf, MacroError> {
    let absolute = resolve_path(templates_dir)?;

    if !absolute.exists() {
        return Err(source_error(
            "CLI_SOURCE_NOT_FOUND",
            format!("templates-dir does not exist: {}", absolute.display()),
        ));
    }

    if !absolute.is_dir() {
        return Err(source_error(
            "CLI_SOURCE_NOT_DIR",
            format!("templates-dir is not a directory: {}", absolute.display()),
        ));
    }

    Ok(absolute)
}

pub(crate) fn read_text_file(raw: &str) -> Result<String, MacroError> {
    let path = resolve_path(raw)?;
    if !path.is_file() {
        return Err(source_error(
            "CLI_SOURCE_NOT_FOUND",
            format!("File does not exist: {}", path.display()),
        ));
    }
    fs::read_to_string(&path).map_err(map_cli_source_read)
}

pub(crate) fn read_json_file(raw: &str) -> Result<serde_json::Value, MacroError> {
    let text = read_text_file(raw)?;
    serde_json::from_str(&text).map_err(map_cli_json_invalid)
}

/// Every `*.tpl` file under `templates_dir`, keyed by its `/`-separated relative path.
pub(crate) fn read_templates_from_dir(
    templates_dir: &Path,
) -> Result<BTreeMap<String, String>, MacroError> {
    let mut templates = BTreeMap::new();

    for entry in WalkDir::new(templates_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(TEMPLATE_EXTENSION) {
            continue;
        }

        let relative = path
            .strip_prefix(templates_dir)
            .map_err(map_cli_source_scan)?
            .to_string_lossy()
            .replace('\\', "/");

        let content = fs::read_to_string(path).map_err(map_cli_source_read)?;
        templates.insert(relative, content);
    }

    if templates.is_empty() {
        return Err(source_error(
            "CLI_SOURCE_EMPTY",
            format!("No .tpl files under {}", templates_dir.display()),
        ));
    }

    Ok(templates)
}

pub(crate) fn output_path_for(out_dir: &Path, relative: &str) -> PathBuf {
    out_dir.join(relative).with_extension(OUTPUT_EXTENSION)
}
