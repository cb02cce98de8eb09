use std::ffi::OsString;

use clap::Parser;
use mr_core::MacroError;
use tracing_subscriber::EnvFilter;

mod cli_args;
mod error_map;
mod render;
mod source_loader;

pub(crate) use cli_args::{Cli, DataArgs, Mode, RenderArgs, RenderDirArgs};
pub(crate) use error_map::{
    emit_error, map_cli_json_invalid, map_cli_output_write, map_cli_source_path,
    map_cli_source_read, map_cli_source_scan,
};

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

/// Logs go to stderr; stdout carries the `RESULT:` protocol.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<i32, MacroError> {
    match cli.command {
        Mode::Render(args) => render::run_render(args),
        Mode::RenderDir(args) => render::run_render_dir(args),
    }
}

#[cfg(test)]
mod tests;
