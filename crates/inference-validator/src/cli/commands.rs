use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the orchestration loop (default)
    Start,

    /// Run exactly one round and print its report as JSON
    Round,

    /// Write the default configuration to a file
    GenConfig {
        #[arg(short, long, default_value = "inference-validator.toml")]
        output: PathBuf,
    },
}
