//! File helpers for preparing segmentation folders.

use std::path::{Path, PathBuf};

use kdam::{Bar, TqdmParallelIterator, tqdm};
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Decode every file under `dir` (recursively) in parallel and return the
/// ones that fail. A progress bar is drawn only when `progress` is set.
pub fn validate_images<P: AsRef<Path>>(dir: P, progress: bool) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound(dir.to_path_buf()));
    }

    let files = collect_files(dir)?;
    info!(dir = ?dir, files = files.len(), "Validating images");

    let decode = |path: &PathBuf| match image::open(path) {
        Ok(_) => None,
        Err(err) => {
            warn!(path = ?path, error = %err, "Could not open image");
            Some(path.clone())
        }
    };

    let mut failed: Vec<PathBuf> = if progress {
        files
            .par_iter()
            .tqdm_with_bar(progress_bar(files.len()))
            .filter_map(decode)
            .collect()
    } else {
        files.par_iter().filter_map(decode).collect()
    };
    failed.sort();

    Ok(failed)
}

fn progress_bar(total: usize) -> Bar {
    tqdm!(
        total = total,
        desc = "Validating",
        bar_format = "{desc suffix=' '}[{percentage:.0}%] ({rate:.1}/s, eta: {remaining human=true})"
    )
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Copy `src` to `target`, creating the target's parent folders.
pub fn copy_to_folder<P: AsRef<Path>, Q: AsRef<Path>>(src: P, target: Q) -> Result<()> {
    let target = target.as_ref();
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, target)?;
    Ok(())
}
