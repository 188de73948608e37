use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use lazy_unet::utils::validate_images;
use tracing::info;

#[derive(Args)]
pub struct ValidateArgs {
    /// Folder to scan recursively.
    pub dir: PathBuf,

    /// Draw a progress bar.
    #[arg(long, default_value_t = false)]
    pub progress: bool,
}

pub fn run(args: &ValidateArgs) -> Result<()> {
    let failed = validate_images(&args.dir, args.progress)?;

    if failed.is_empty() {
        info!(dir = ?args.dir, "All files decoded");
        return Ok(());
    }

    for path in &failed {
        println!("{}", path.display());
    }
    bail!("{} file(s) could not be decoded", failed.len())
}
