use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "objreg",
    about = "Object registry -- load a manifest and inspect the result",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Registry configuration (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Objects, attributes and connections to load (TOML). Defaults to the
    /// built-in demo.
    #[arg(short, long, global = true)]
    pub manifest: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print every registered object
    Dump,
    /// Print the mirrored tree
    Tree(TreeArgs),
    /// List a directory of the mirror
    Ls(LsArgs),
    /// Read an attribute leaf as text
    Read(ReadArgs),
    /// Write text into an attribute leaf
    Write(WriteArgs),
    /// List registered data types
    Types,
    /// Load the manifest, then tear the registry down again
    Check,
    /// Print the built-in demo manifest
    Demo,
}

#[derive(Args)]
pub struct TreeArgs {
    /// Show attribute values
    #[arg(long)]
    pub values: bool,
}

#[derive(Args)]
pub struct LsArgs {
    pub path: Option<String>,
}

#[derive(Args)]
pub struct ReadArgs {
    pub path: String,
}

#[derive(Args)]
pub struct WriteArgs {
    pub path: String,
    pub value: String,
}
