use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod tasks;

#[derive(Parser)]
#[command(
    name = "lazy-unet",
    about = "U-Net segmentation on partially annotated masks",
    author,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a U-Net on an image folder and a colour-coded mask folder.
    Train(tasks::train::TrainArgs),
    /// Report files that cannot be decoded as images.
    Validate(tasks::validate::ValidateArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Train(args) => tasks::train::run(args),
        Commands::Validate(args) => tasks::validate::run(args),
    }
}
