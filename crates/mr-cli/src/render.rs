use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use mr_core::{Culture, MacroError, MacroErrorKind, MacroValue, ResolverSettings};
use mr_runtime::{MacroResolver, MacroResolverOptions, ResourceLocalizer};

use crate::source_loader::{
    output_path_for, read_json_file, read_templates_from_dir, read_text_file, resolve_path,
    resolve_templates_dir,
};
use crate::{map_cli_output_write, DataArgs, RenderArgs, RenderDirArgs};

const QUERY_STRING_NAME: &str = "QueryString";

pub(crate) fn build_settings(args: &DataArgs) -> Result<ResolverSettings, MacroError> {
    let mut settings = match &args.settings {
        Some(path) => ResolverSettings::from_json(&read_text_file(path)?)?,
        None => ResolverSettings::default(),
    };
    if let Some(culture) = &args.culture {
        settings.culture = Culture::new(culture.as_str());
    }
    if args.keep_unresolved {
        settings.keep_unresolved = true;
    }
    settings.validate()?;
    Ok(settings)
}

pub(crate) fn parse_query(entries: &[String]) -> Result<BTreeMap<String, String>, MacroError> {
    let mut query = BTreeMap::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(MacroError::new(
                MacroErrorKind::Config,
                "CLI_QUERY_INVALID",
                format!("Query entry must look like key=value: {}", entry),
            ));
        };
        query.insert(key.trim().to_string(), value.to_string());
    }
    Ok(query)
}

/// Builds a resolver whose root scope holds the data file and query entries.
pub(crate) fn build_resolver(args: &DataArgs) -> Result<MacroResolver, MacroError> {
    let settings = build_settings(args)?;
    let localizer = match &args.resources {
        Some(path) => ResourceLocalizer::from_json(&read_text_file(path)?)?,
        None => ResourceLocalizer::new(),
    };
    let resolver = MacroResolver::new(MacroResolverOptions {
        settings,
        localizer: Some(Arc::new(localizer)),
        ..MacroResolverOptions::default()
    })?;

    if let Some(path) = &args.data {
        let serde_json::Value::Object(entries) = read_json_file(path)? else {
            return Err(MacroError::new(
                MacroErrorKind::Config,
                "CLI_DATA_INVALID",
                format!("Data file must contain a JSON object: {}", path),
            ));
        };
        for (name, value) in entries {
            resolver
                .scope()
                .set_named_value(&name, MacroValue::from_json(value));
        }
    }

    let query = parse_query(&args.query)?;
    if !query.is_empty() {
        resolver
            .scope()
            .set_named_value(QUERY_STRING_NAME, MacroValue::StringMap(query));
    }

    tracing::debug!(
        names = ?resolver.scope().registered_names(),
        root = ?resolver.registry().root_property_names(),
        "resolver ready"
    );
    Ok(resolver)
}

pub(crate) fn run_render(args: RenderArgs) -> Result<i32, MacroError> {
    let template = read_text_file(&args.template)?;
    let resolver = build_resolver(&args.data)?;
    let text = resolver.resolve_macros(&template);
    println!("RESULT:OK");
    println!("{}", text);
    Ok(0)
}

pub(crate) fn run_render_dir(args: RenderDirArgs) -> Result<i32, MacroError> {
    let templates_root = resolve_templates_dir(&args.templates_dir)?;
    let templates = read_templates_from_dir(&templates_root)?;
    let out_dir = resolve_path(&args.out_dir)?;
    let resolver = build_resolver(&args.data)?;

    let mut written = Vec::with_capacity(templates.len());
    for (relative, template) in &templates {
        // Each file gets its own child so per-file dynamic parameters never leak.
        let text = resolver.derive_child().resolve_macros(template);
        let target = output_path_for(&out_dir, relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(map_cli_output_write)?;
        }
        fs::write(&target, text).map_err(map_cli_output_write)?;
        tracing::debug!(template = %relative, output = %target.display(), "rendered");
        written.push(target);
    }

    println!("RESULT:OK");
    for target in written {
        println!("OUTPUT:{}", target.display());
    }
    Ok(0)
}

#[cfg(test)]
mod render_tests {
    use super::*;
    use crate::tests::{temp_path, write_file};

    #[test]
    fn query_entries_split_on_first_equals() {
        let query = parse_query(&["a=1".to_string(), "b=x=y".to_string()]).expect("valid query");
        assert_eq!(query.get("a").map(String::as_str), Some("1"));
        assert_eq!(query.get("b").map(String::as_str), Some("x=y"));

        let error = parse_query(&["broken".to_string()]).expect_err("missing equals");
        assert_eq!(error.code, "CLI_QUERY_INVALID");
    }

    #[test]
    fn flags_override_settings_file() {
        let path = temp_path("settings.json");
        write_file(&path, r#"{"culture":"de-DE","maxRecursionDepth":3}"#);
        let args = DataArgs {
            settings: Some(path.to_string_lossy().to_string()),
            culture: Some("cs-CZ".to_string()),
            keep_unresolved: true,
            ..DataArgs::default()
        };
        let settings = build_settings(&args).expect("settings should load");
        assert_eq!(settings.culture.code(), "cs-CZ");
        assert_eq!(settings.max_recursion_depth, 3);
        assert!(settings.keep_unresolved);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let path = temp_path("bad-settings.json");
        write_file(&path, r#"{"evaluationTimeoutMs":0}"#);
        let args = DataArgs {
            settings: Some(path.to_string_lossy().to_string()),
            ..DataArgs::default()
        };
        let error = build_settings(&args).expect_err("zero timeout");
        assert_eq!(error.code, "MACRO_CONFIG");
    }

    #[test]
    fn data_and_query_become_named_sources() {
        let data = temp_path("data.json");
        write_file(&data, r#"{"user":{"Name":"Ada"},"count":3}"#);
        let args = DataArgs {
            data: Some(data.to_string_lossy().to_string()),
            query: vec!["page=2".to_string()],
            ..DataArgs::default()
        };
        let resolver = build_resolver(&args).expect("resolver should build");
        assert_eq!(
            resolver.resolve_macros("{%user.name%} {%count + 1%} {?page?}"),
            "Ada 4 2"
        );
    }

    #[test]
    fn data_must_be_an_object() {
        let data = temp_path("list.json");
        write_file(&data, "[1, 2]");
        let args = DataArgs {
            data: Some(data.to_string_lossy().to_string()),
            ..DataArgs::default()
        };
        let error = build_resolver(&args).err().expect("array data");
        assert_eq!(error.code, "CLI_DATA_INVALID");
    }
}
