//! tfslice cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; tfslice ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the loaded module tree with all resolved references
    Inspect(InspectCommand),

    /// Print the blocks required by the selected module calls
    Graph(GraphCommand),

    /// Copy the blocks required by the selected module calls into another directory
    Extract(ExtractCommand),
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Root module directory
    #[clap(default_value = ".")]
    pub module: PathBuf,

    /// Module manifest written by `terraform init`
    ///
    /// Defaults to .terraform/modules/modules.json inside the module directory when present
    #[clap(short = 'm', long = "manifest")]
    pub manifest: Option<PathBuf>,

    /// Continue even when the configuration has errors
    #[clap(long = "ignore-errors")]
    pub ignore_errors: bool,
}

#[derive(Parser, Debug)]
pub struct SelectArgs {
    /// Select module calls whose name starts with this prefix
    #[clap(short = 's', long = "select")]
    pub select: String,

    /// Do not include outputs in the selection
    #[clap(long = "no-outputs")]
    pub no_outputs: bool,
}

#[derive(Parser, Debug)]
pub struct InspectCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct GraphCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub select: SelectArgs,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct ExtractCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub select: SelectArgs,

    /// Destination directory
    #[clap(short = 'o', long = "out")]
    pub out: PathBuf,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
    /// plain text, one block per line (graph only)
    Text,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
            OutputFormat::Text => f.write_str("text"),
        }
    }
}
