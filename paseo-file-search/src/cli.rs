use std::num::NonZero;
use std::path::PathBuf;

use clap::Parser;

/// Fuzzy file finder backing `file_explorer_request`, usable standalone.
#[derive(Debug, Parser)]
pub struct Cli {
    /// Fuzzy pattern to match against file paths relative to `cwd`. If
    /// omitted, lists the directory instead of searching.
    pub pattern: Option<String>,

    /// Maximum number of matches to return.
    #[arg(long, short = 'l', default_value = "100")]
    pub limit: NonZero<usize>,

    /// Directory to search. Defaults to the current working directory.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Emit matches as JSON lines instead of plain text.
    #[arg(long)]
    pub json: bool,

    /// Glob pattern(s) to exclude from the walk (may be repeated).
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Number of worker threads to use for the directory walk.
    #[arg(long, default_value = "4")]
    pub threads: NonZero<usize>,
}
