//! Project configuration and the environment threaded into every task.
//!
//! The configuration lives in a small JSON file next to the theme (by default
//! `gulpconfig.json`). Only the dev server needs anything from it, so a
//! missing file falls back to defaults and the relevant task complains later.

use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "gulpconfig.json";

/// Contents of the JSON configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the backend the dev server proxies to.
    pub baseurl: Option<String>,
    /// Theme name used for the build directory and the archive name.
    pub theme: Option<String>,
    /// Open the proxied site in a browser once the dev server is up.
    pub open: bool,
    /// Dart Sass executable, `sass` from `PATH` when unset.
    pub sass: Option<String>,
    /// Where sources and artifacts live inside the project.
    pub layout: Layout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baseurl: None,
            theme: None,
            open: true,
            sass: None,
            layout: Layout::default(),
        }
    }
}

impl Config {
    /// Reads the configuration from `path`; a missing file yields defaults.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(%path, "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(ConfigError::Read(path.to_owned(), err)),
        };

        serde_json::from_str(&text).map_err(|err| ConfigError::Parse(path.to_owned(), err))
    }
}

/// File layout of a theme project, every path relative to the project root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Entry stylesheets, each compiled to its own output.
    pub style_entry: String,
    /// Everything that should retrigger the style chain.
    pub style_watch: String,
    /// Script sources, concatenated in this order.
    pub script_sources: Vec<String>,
    /// Everything that should retrigger the bundler.
    pub script_watch: String,
    /// The bundled script.
    pub script_bundle: Utf8PathBuf,
    /// The compiled main stylesheet.
    pub stylesheet: Utf8PathBuf,
    /// The mirrored stylesheet.
    pub stylesheet_rtl: Utf8PathBuf,
    /// Files the dev server reloads browsers for.
    pub reload: Vec<String>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            style_entry: "assets/scss/*.scss".into(),
            style_watch: "assets/scss/**/*.scss".into(),
            script_sources: vec![
                "assets/js/modules/*.js".into(),
                "assets/js/main/main.js".into(),
                "assets/js/main/unsorted.js".into(),
                "assets/js/vendor/*.js".into(),
            ],
            script_watch: "assets/js/**/*.js".into(),
            script_bundle: "assets/js/main.js".into(),
            stylesheet: "style.css".into(),
            stylesheet_rtl: "rtl.css".into(),
            reload: vec![
                "*.php".into(),
                "style.css".into(),
                "assets/js/main.js".into(),
            ],
        }
    }
}

/// Everything a task needs to know about the project it runs against.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The theme project directory.
    pub root: Utf8PathBuf,
    /// Parsed configuration file.
    pub config: Config,
    /// Port override for the proxied backend, from the command line.
    pub port: Option<u16>,
}

impl Environment {
    pub fn new(root: impl Into<Utf8PathBuf>, config: Config, port: Option<u16>) -> Self {
        Self {
            root: root.into(),
            config,
            port,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.config.layout
    }

    /// Resolves a project-relative path against the root.
    pub fn path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Resolves a project-relative glob against the root.
    pub fn glob(&self, relative: &str) -> String {
        self.root.join(relative).into_string()
    }

    /// The theme name, falling back to the project directory name.
    pub fn theme(&self) -> Result<String, ConfigError> {
        if let Some(theme) = &self.config.theme {
            return Ok(theme.clone());
        }

        self.root
            .canonicalize_utf8()
            .ok()
            .as_deref()
            .and_then(Utf8Path::file_name)
            .or_else(|| self.root.file_name())
            .map(str::to_owned)
            .ok_or_else(|| ConfigError::ThemeName(self.root.clone()))
    }

    /// The backend URL the dev server forwards to.
    pub fn proxy_target(&self) -> Result<String, ConfigError> {
        let base = self
            .config
            .baseurl
            .as_deref()
            .ok_or(ConfigError::MissingBaseUrl)?;

        Ok(proxy_target(base, self.port))
    }
}

/// Normalizes the base URL and appends the port override when present.
pub fn proxy_target(base: &str, port: Option<u16>) -> String {
    let base = base.trim().trim_end_matches('/');
    let mut url = if base.contains("://") {
        base.to_owned()
    } else {
        format!("http://{base}")
    };

    if let Some(port) = port {
        url.push(':');
        url.push_str(&port.to_string());
    }

    url
}
