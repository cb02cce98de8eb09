use super::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    std::env::temp_dir().join(format!("macro-resolve-{}-{}", nanos, name))
}

pub(crate) fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent should be created");
    }
    fs::write(path, content).expect("file should be written");
}

#[test]
fn unknown_subcommand_fails_with_clap_exit_code() {
    let code = run_cli_from_args(["macro-resolve", "explode"]);
    assert_eq!(code, 2);
}

#[test]
fn render_succeeds_for_existing_template() {
    let template = temp_path("hello.tpl");
    write_file(&template, "Hello {%name%}");
    let template = template.to_string_lossy().to_string();
    let code = run_cli_from_args([
        "macro-resolve",
        "render",
        "--template",
        template.as_str(),
    ]);
    assert_eq!(code, 0);
}

#[test]
fn render_reports_missing_template_as_error() {
    let template = temp_path("absent.tpl").to_string_lossy().to_string();
    let code = run_cli_from_args([
        "macro-resolve",
        "render",
        "--template",
        template.as_str(),
    ]);
    assert_eq!(code, 1);
}

#[test]
fn render_dir_writes_one_output_per_template() {
    let root = temp_path("site");
    let out = temp_path("site-out");
    write_file(&root.join("index.tpl"), "{%title%}");
    write_file(&root.join("nested/about.tpl"), "About {%title%}");
    let data = temp_path("site-data.json");
    write_file(&data, r#"{"title":"Home"}"#);
    let root_arg = root.to_string_lossy().to_string();
    let out_arg = out.to_string_lossy().to_string();
    let data_arg = data.to_string_lossy().to_string();

    let code = run_cli_from_args([
        "macro-resolve",
        "render-dir",
        "--templates-dir",
        root_arg.as_str(),
        "--out-dir",
        out_arg.as_str(),
        "--data",
        data_arg.as_str(),
    ]);
    assert_eq!(code, 0);
    assert_eq!(
        fs::read_to_string(out.join("index.txt")).expect("index output"),
        "Home"
    );
    assert_eq!(
        fs::read_to_string(out.join("nested/about.txt")).expect("nested output"),
        "About Home"
    );
}
