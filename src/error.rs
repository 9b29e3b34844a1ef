use camino::Utf8PathBuf;
use thiserror::Error;

/// Problems found while freezing a task graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is registered more than once")]
    Duplicate(String),

    #[error("Task '{task}' depends on unknown task '{prerequisite}'")]
    UnknownPrerequisite { task: String, prerequisite: String },

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{0}' is not in the task graph, run `help` to list the available tasks")]
    UnknownTask(String),

    #[error("Task '{0}':\n{1:#}")]
    Task(String, anyhow::Error),

    #[error("Background task panicked")]
    Panicked,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file {0}.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),

    #[error("Config is missing `baseurl`, the dev server has nothing to proxy")]
    MissingBaseUrl,

    #[error("Couldn't derive a theme name from {0}, set `theme` in the config")]
    ThemeName(Utf8PathBuf),
}

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error("Dart Sass failed on {0}:\n{1}")]
    Dart(Utf8PathBuf, String),

    #[error("Autoprefixer error in {0}: {1}")]
    Prefix(Utf8PathBuf, String),

    #[error("Source map error: {0}")]
    SourceMap(String),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

/// Errors that can occur when bundling scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No `Version:` line found in {0}, refusing to name the archive")]
    MissingVersion(Utf8PathBuf),

    #[error("Compiled stylesheet {0} not found, run `styles` first")]
    MissingStylesheet(Utf8PathBuf),

    #[error("Build directory {0} not found, run `build` first")]
    MissingBuild(Utf8PathBuf),

    #[error("Project root {0} has no parent directory to build into")]
    NoParent(Utf8PathBuf),

    #[error("Theme name `{0}` must be a single directory name")]
    InvalidTheme(String),

    #[error("Project root {0} lies inside the build directory, refusing to delete it")]
    RootInsideBuild(Utf8PathBuf),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't resolve watch path '{0}'.\n{1}")]
    Resolve(String, std::io::Error),

    #[error("File watcher channel closed")]
    Closed,
}

#[cfg(feature = "server")]
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Couldn't read request body: {0}")]
    Body(#[from] axum::Error),

    #[error(transparent)]
    Http(#[from] axum::http::Error),
}
