use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::pipeline::PreprocessMode;

#[derive(Parser, Debug)]
#[command(
    name = "paperparams",
    version,
    about = "Experimental-design parameter extraction and fusion for scientific papers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Extract(ExtractArgs),
    Validate(ValidateArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[arg(long = "input", required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub parameter_table: Option<PathBuf>,

    #[arg(long)]
    pub fallback_table: Option<PathBuf>,

    #[arg(long)]
    pub policy_table: Option<PathBuf>,

    #[arg(long, default_value = ".cache/paperparams/extractions")]
    pub output_dir: PathBuf,

    #[arg(long, default_value = ".cache/paperparams")]
    pub cache_root: PathBuf,

    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    #[arg(long, value_enum, default_value_t = PreprocessMode::Standard)]
    pub preprocess_mode: PreprocessMode,

    #[arg(long, default_value_t = false)]
    pub llm: bool,

    #[arg(long, default_value_t = 1)]
    pub workers: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long)]
    pub gold: PathBuf,

    #[arg(long)]
    pub predictions: PathBuf,

    #[arg(long)]
    pub aliases: Option<PathBuf>,

    #[arg(long)]
    pub synonyms: Option<PathBuf>,

    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/paperparams")]
    pub cache_root: PathBuf,
}
