use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "macro-resolve")]
#[command(about = "Resolve {% %}, {$ $} and {? ?} markers in templates")]
pub(crate) struct Cli {
    /// Raise log output to debug (RUST_LOG still wins when set).
    #[arg(long = "verbose", short = 'v', global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Render(RenderArgs),
    RenderDir(RenderDirArgs),
}

#[derive(Debug, Args)]
pub(crate) struct RenderArgs {
    #[arg(long = "template")]
    pub(crate) template: String,
    #[command(flatten)]
    pub(crate) data: DataArgs,
}

#[derive(Debug, Args)]
pub(crate) struct RenderDirArgs {
    #[arg(long = "templates-dir")]
    pub(crate) templates_dir: String,
    #[arg(long = "out-dir")]
    pub(crate) out_dir: String,
    #[command(flatten)]
    pub(crate) data: DataArgs,
}

/// Inputs shared by both render modes.
#[derive(Debug, Args, Default)]
pub(crate) struct DataArgs {
    /// JSON object whose top-level keys become named sources.
    #[arg(long = "data")]
    pub(crate) data: Option<String>,
    /// JSON resolver settings (camelCase keys).
    #[arg(long = "settings")]
    pub(crate) settings: Option<String>,
    /// JSON resources keyed by culture, then by resource key.
    #[arg(long = "resources")]
    pub(crate) resources: Option<String>,
    /// Query-string entry as `key=value`; repeatable.
    #[arg(long = "query")]
    pub(crate) query: Vec<String>,
    #[arg(long = "keep-unresolved")]
    pub(crate) keep_unresolved: bool,
    #[arg(long = "culture")]
    pub(crate) culture: Option<String>,
}
