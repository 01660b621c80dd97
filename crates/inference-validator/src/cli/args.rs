use crate::cli::{handlers, Command};
use crate::config::ValidatorConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "inference-validator")]
#[command(about = "Inference network validator: dispatches challenges to miners and scores them")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    pub gen_config: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

impl Args {
    pub async fn run(self) -> anyhow::Result<()> {
        if self.gen_config {
            println!("{}", ValidatorConfig::generate_example()?);
            return Ok(());
        }

        match self.command.unwrap_or(Command::Start) {
            Command::Start => handlers::handle_start(self.config.as_deref()).await,
            Command::Round => handlers::handle_round(self.config.as_deref()).await,
            Command::GenConfig { output } => handlers::handle_gen_config(&output),
        }
    }
}
