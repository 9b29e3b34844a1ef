//! Installer packaging.
//!
//! Packaging happens next to the project, never inside it:
//!
//! ```text
//! themes/
//! ├── begonia/                        the project
//! ├── build/begonia/                  copy, then pruned
//! └── Begonia-Installer-1-2-3.zip     the archive
//! ```
//!
//! The three steps are separate tasks so each can be inspected on its own,
//! and `zip` removes the build directory once the archive is complete.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::sync::LazyLock;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use regex::Regex;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::Environment;
use crate::error::PackageError;
use crate::io::{copy_tree, remove_dir_if_exists};

/// Directory next to the project that holds the staged copy.
pub const BUILD_DIR: &str = "build";

/// Paths left out of the installer, relative to the staged theme directory.
pub const EXCLUDED: &[&str] = &[
    "**/codekit-config.json",
    "node_modules",
    "config.rb",
    "gulpfile.js",
    "gulpconfig.js",
    "gulpconfig.json",
    "package.json",
    "pxg.json",
    "build",
    "css",
    ".idea",
    "**/.svn*",
    "**/*.css.map",
    "**/.sass*",
    ".sass*",
    "**/.git*",
    "*.sublime-project",
    ".DS_Store",
    "**/.DS_Store",
    "__MACOSX",
    "**/__MACOSX",
    "README.md",
    ".csscomb",
    ".codeclimate.yml",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^version:\s*(.*?)\s*$").expect("Invalid regex"));

/// Where a theme is staged: `<parent>/build/<theme>`.
#[derive(Debug, Clone)]
pub struct Staging {
    pub theme: String,
    /// `<parent>/build`, removed as a whole.
    pub build: Utf8PathBuf,
    pub dir: Utf8PathBuf,
}

/// Resolves the staging paths of `env`'s theme.
///
/// The theme name has to be a plain directory name and the project can't
/// live under the build directory, since that gets deleted.
pub fn staging(env: &Environment) -> Result<Staging, PackageError> {
    let theme = env.theme()?;
    let mut parts = Utf8Path::new(&theme).components();
    let plain = matches!(
        (parts.next(), parts.next()),
        (Some(Utf8Component::Normal(_)), None)
    );
    if !plain || theme.contains(['/', '\\']) {
        return Err(PackageError::InvalidTheme(theme));
    }

    let root = env.root.canonicalize_utf8()?;
    let parent = root
        .parent()
        .ok_or_else(|| PackageError::NoParent(root.clone()))?;
    let build = parent.join(BUILD_DIR);
    if root.starts_with(&build) {
        return Err(PackageError::RootInsideBuild(root));
    }

    let dir = build.join(&theme);
    Ok(Staging { theme, build, dir })
}

/// Copies the project into a fresh `<parent>/build/<theme>`, leaving out
/// dependency directories.
pub fn copy(env: &Environment) -> Result<Utf8PathBuf, PackageError> {
    let staging = staging(env)?;

    remove_dir_if_exists(&staging.build)?;
    let copied = copy_tree(&env.root, &staging.dir, &["node_modules"])?;

    tracing::info!(path = %staging.dir, "copied {} files", copied);
    Ok(staging.dir)
}

/// Removes every excluded path from a staged theme directory.
///
/// A matched directory goes away with its whole subtree. Returns the number
/// of removed entries.
pub fn prune(dir: &Utf8Path) -> Result<usize, PackageError> {
    if !dir.is_dir() {
        return Err(PackageError::MissingBuild(dir.to_owned()));
    }

    let patterns = EXCLUDED
        .iter()
        .map(|pattern| Pattern::new(pattern))
        .collect::<Result<Vec<_>, _>>()?;

    let mut doomed = Vec::new();
    let mut walker = WalkDir::new(dir).min_depth(1).into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };

        if !patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(relative, MATCH_OPTIONS))
        {
            continue;
        }

        let is_dir = entry.file_type().is_dir();
        if is_dir {
            walker.skip_current_dir();
        }
        doomed.push((entry.into_path(), is_dir));
    }

    for (path, is_dir) in &doomed {
        tracing::debug!("excluding {}", path.display());
        if *is_dir {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
    }

    tracing::info!(path = %dir, "pruned {} entries", doomed.len());
    Ok(doomed.len())
}

/// Prunes the staged copy of `env`'s theme.
pub fn prune_build(env: &Environment) -> Result<usize, PackageError> {
    prune(&staging(env)?.dir)
}

/// The `Version:` field of a stylesheet header, with dots turned into dashes.
pub fn theme_version(css: &str) -> Option<String> {
    css.lines()
        .flat_map(|line| line.split('\r'))
        .find_map(|line| VERSION.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|version| version.as_str().replace('.', "-"))
        .filter(|version| !version.is_empty())
}

/// `begonia`, `1-2-3` → `Begonia-Installer-1-2-3.zip`.
pub fn archive_name(theme: &str, version: &str) -> String {
    format!("{}-Installer-{}.zip", capitalize(theme), version)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Zips the staged theme into `<parent>/<Theme>-Installer-<version>.zip`.
///
/// The version is read from the project's compiled stylesheet before anything
/// is touched. The archive is written under a temporary name first, older
/// installer archives of the theme are only replaced once it is complete. On
/// success the build directory is removed, on failure the partial archive is.
pub fn archive(env: &Environment) -> Result<Utf8PathBuf, PackageError> {
    let stylesheet = env.path(&env.layout().stylesheet);
    let css = fs::read_to_string(&stylesheet)
        .map_err(|_| PackageError::MissingStylesheet(stylesheet.clone()))?;
    let version = theme_version(&css).ok_or(PackageError::MissingVersion(stylesheet))?;

    let Staging { theme, build, dir } = staging(env)?;
    if !dir.is_dir() {
        return Err(PackageError::MissingBuild(dir));
    }

    let parent = build.parent().unwrap_or(&build).to_path_buf();
    let name = archive_name(&theme, &version);
    let path = parent.join(&name);
    let partial = parent.join(format!(".{name}.part"));

    if let Err(err) = write_archive(&dir, &theme, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }

    remove_old_archives(&parent, &theme)?;
    fs::rename(&partial, &path)?;
    remove_dir_if_exists(&build)?;

    tracing::info!(%path, "packaged {} {}", theme, version);
    Ok(path)
}

fn remove_old_archives(dir: &Utf8Path, theme: &str) -> Result<(), PackageError> {
    let pattern = format!(
        "{}/{}-Installer-*.zip",
        Pattern::escape(dir.as_str()),
        Pattern::escape(&capitalize(theme))
    );

    for path in glob::glob(&pattern)? {
        let path = path?;
        tracing::debug!("removing old archive {}", path.display());
        fs::remove_file(path)?;
    }

    Ok(())
}

fn write_archive(staged: &Utf8Path, theme: &str, path: &Utf8Path) -> Result<(), PackageError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(BufWriter::new(File::create(path)?));

    zip.add_directory(format!("{theme}/"), options)?;

    for entry in WalkDir::new(staged).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(staged)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

        // zip entries always use forward slashes
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{theme}/{name}/"), options)?;
        } else if entry.file_type().is_symlink() {
            let target = fs::read_link(entry.path())?;
            zip.add_symlink(
                format!("{theme}/{name}"),
                target.to_string_lossy().replace('\\', "/"),
                options,
            )?;
        } else {
            zip.start_file(format!("{theme}/{name}"), options)?;
            zip.write_all(&fs::read(entry.path())?)?;
        }
    }

    zip.finish()?.flush()?;
    Ok(())
}
