use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use walkdir::WalkDir;

use crate::error::PackageError;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
});

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Removes a directory tree, treating an already missing one as success.
pub(crate) fn remove_dir_if_exists(path: impl AsRef<Path>) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Mirrors `src` into `dst`, leaving out every entry named in `skip` at any
/// depth. Directories are created up front, files are copied in parallel.
/// Symbolic links are recreated as links, never followed.
pub(crate) fn copy_tree(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    skip: &[&str],
) -> Result<u64, PackageError> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            !skip
                .iter()
                .any(|name| entry.file_name().to_str() == Some(*name))
        });

    let mut files = Vec::new();
    let mut links = Vec::new();
    fs::create_dir_all(dst)?;

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|err| std::io::Error::new(ErrorKind::InvalidInput, err))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_symlink() {
            links.push((entry.into_path(), target));
        } else {
            files.push((entry.into_path(), target));
        }
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(PROGRESS_STYLE.clone());
    pb.set_message("Copying files...");

    files
        .par_iter()
        .try_for_each(|(from, to)| -> std::io::Result<()> {
            fs::copy(from, to)?;
            pb.inc(1);
            Ok(())
        })?;

    pb.finish_and_clear();

    for (from, to) in &links {
        copy_link(from, to)?;
    }

    Ok((files.len() + links.len()) as u64)
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_link(from: &Path, _: &Path) -> std::io::Result<()> {
    tracing::warn!("skipping symbolic link {}", from.display());
    Ok(())
}
