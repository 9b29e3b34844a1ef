//! Watch mode maps filesystem changes to task chains.
//!
//! Each binding pairs a glob with the name of the task that rebuilds what the
//! glob covers. The file watcher runs on `notify` with a short debounce, so a
//! single save that the OS reports as several raw events turns into one
//! batch. Every batch is mapped to an ordered, de-duplicated list of tasks,
//! and each of those is run once through the [`Runner`].
//!
//! Rebuilds run one after another on the watching thread; events that arrive
//! meanwhile are queued by the debouncer and handled by the next iteration.

use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::channel;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};

use crate::config::Environment;
use crate::error::WatchError;
use crate::executor::Runner;

pub(crate) const DEBOUNCE: Duration = Duration::from_millis(250);

struct Binding {
    target: WatchTarget,
    task: String,
}

/// A set of glob to task bindings.
#[derive(Default)]
pub struct Watcher {
    bindings: Vec<Binding>,
    ignored: HashSet<Utf8PathBuf>,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` whenever a file matching `glob` changes.
    pub fn bind(&mut self, glob: &str, task: impl Into<String>) -> Result<&mut Self, WatchError> {
        self.bindings.push(Binding {
            target: WatchTarget::resolve(glob)?,
            task: task.into(),
        });
        Ok(self)
    }

    /// Never reacts to changes of `path`, typically an artifact that lives
    /// inside a watched tree.
    pub fn ignore(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.ignored.insert(path.into());
        self
    }

    /// Directories that have to be watched to cover every binding.
    pub fn roots(&self) -> Vec<Utf8PathBuf> {
        outermost(self.bindings.iter().map(|b| b.target.dir.clone()))
    }

    /// Tasks to run for a batch of changed paths, in binding order, each at
    /// most once.
    pub fn plan<'p>(&self, paths: impl IntoIterator<Item = &'p Path>) -> Vec<&str> {
        let paths: Vec<_> = paths
            .into_iter()
            .filter(|path| {
                Utf8Path::from_path(path).is_none_or(|path| !self.ignored.contains(path))
            })
            .collect();

        self.bindings
            .iter()
            .filter(|binding| paths.iter().any(|path| binding.target.matches(path)))
            .map(|binding| binding.task.as_str())
            .fold(Vec::new(), |mut tasks, task| {
                if !tasks.contains(&task) {
                    tasks.push(task);
                }
                tasks
            })
    }

    /// Blocks forever, rebuilding whatever the changed files affect.
    pub fn run(&self, runner: &Runner<'_>) -> Result<(), WatchError> {
        let (tx, rx) = channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

        for root in self.roots() {
            tracing::info!("watching {}", root);
            debouncer.watch(&root, RecursiveMode::Recursive)?;
        }

        loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    let paths = events
                        .iter()
                        .filter(|de| !matches!(de.event.kind, EventKind::Access(_)))
                        .flat_map(|de| de.event.paths.iter())
                        .map(|path| path.as_path());

                    for task in self.plan(paths) {
                        tracing::info!("change detected, running '{}'", task);
                        if let Err(err) = runner.run(task) {
                            tracing::error!("{err}");
                        }
                    }
                }
                Ok(Err(errors)) => {
                    for err in errors {
                        tracing::error!("watch error: {:?}", err);
                    }
                }
                Err(_) => return Err(WatchError::Closed),
            }
        }
    }
}

/// The theme's watcher: stylesheet sources rebuild `styles`, script sources
/// rebuild `scripts`.
pub fn theme_watcher(env: &Environment) -> Result<Watcher, WatchError> {
    let layout = env.layout();
    let mut watcher = Watcher::new();

    for (glob, task) in [
        (&layout.style_watch, "styles"),
        (&layout.script_watch, "scripts"),
    ] {
        if let Err(err) = watcher.bind(&env.glob(glob), task) {
            tracing::warn!("not watching {}: {}", glob, err);
        }
    }

    let root = env.root.canonicalize_utf8()?;
    watcher.ignore(root.join(&layout.script_bundle));

    Ok(watcher)
}

/// What a glob needs watched: the deepest existing directory it is anchored
/// in and the absolute pattern changed paths are tested against.
#[derive(Debug, Clone)]
pub(crate) struct WatchTarget {
    pub dir: Utf8PathBuf,
    pub pattern: Pattern,
}

impl WatchTarget {
    /// Everything up to the first wildcard component must exist. A plain file
    /// is watched through its directory, editors tend to save by renaming a
    /// temporary file over it.
    pub fn resolve(glob: &str) -> Result<Self, WatchError> {
        let mut anchor = Utf8PathBuf::new();
        let mut rest = Utf8PathBuf::new();

        for part in Utf8Path::new(glob).components() {
            if rest.as_str().is_empty() && !part.as_str().contains(['*', '?', '[']) {
                anchor.push(part);
            } else {
                rest.push(part);
            }
        }

        if anchor.as_str().is_empty() {
            anchor.push(".");
        }

        let anchor = anchor
            .canonicalize_utf8()
            .map_err(|err| WatchError::Resolve(glob.to_string(), err))?;

        let mut pattern = Pattern::escape(anchor.as_str());
        if !rest.as_str().is_empty() {
            pattern.push('/');
            pattern.push_str(rest.as_str());
        }
        let pattern = Pattern::new(&pattern)?;

        let dir = if rest.as_str().is_empty() && anchor.is_file() {
            anchor.parent().map_or_else(|| anchor.clone(), Utf8Path::to_path_buf)
        } else {
            anchor
        };

        Ok(Self { dir, pattern })
    }

    /// A single `*` never crosses a directory boundary, `**` does.
    pub fn matches(&self, path: &Path) -> bool {
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };
        self.pattern.matches_path_with(path, options)
    }
}

/// Drops directories nested in another one of the set, watches are recursive.
pub(crate) fn outermost(dirs: impl IntoIterator<Item = Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut dirs: Vec<_> = dirs.into_iter().collect();
    dirs.sort();
    dirs.dedup();

    dirs.into_iter().fold(Vec::new(), |mut kept, dir| {
        if !kept.iter().any(|outer: &Utf8PathBuf| dir.starts_with(outer)) {
            kept.push(dir);
        }
        kept
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::Config;

    fn cwd() -> Utf8PathBuf {
        Utf8PathBuf::try_from(std::env::current_dir().unwrap()).unwrap()
    }

    fn theme() -> (tempfile::TempDir, Environment) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();

        fs::create_dir_all(root.join("assets/scss/components")).unwrap();
        fs::create_dir_all(root.join("assets/js/modules")).unwrap();
        fs::write(root.join("assets/scss/style.scss"), "").unwrap();
        fs::write(root.join("assets/js/modules/menu.js"), "").unwrap();

        let env = Environment::new(root, Config::default(), None);
        (dir, env)
    }

    #[test]
    fn test_file_is_watched_through_its_directory() {
        let (_dir, env) = theme();
        let target = WatchTarget::resolve(env.path("assets/scss/style.scss").as_str()).unwrap();

        assert_eq!(target.dir, env.path("assets/scss"));
        assert!(target.matches(env.path("assets/scss/style.scss").as_std_path()));
        assert!(!target.matches(env.path("assets/scss/editor.scss").as_std_path()));
    }

    #[test]
    fn test_wildcards_stay_in_the_pattern() {
        let (_dir, env) = theme();
        let target = WatchTarget::resolve(&env.glob("assets/scss/**/*.scss")).unwrap();

        assert_eq!(target.dir, env.path("assets/scss"));
        assert!(target.matches(env.path("assets/scss/components/_buttons.scss").as_std_path()));
        assert!(!target.matches(env.path("assets/js/modules/menu.js").as_std_path()));
    }

    #[test]
    fn test_star_stays_in_its_directory() {
        let (_dir, env) = theme();
        fs::write(env.path("header.php"), "").unwrap();
        let target = WatchTarget::resolve(&env.glob("*.php")).unwrap();

        assert!(target.matches(env.path("header.php").as_std_path()));
        assert!(!target.matches(env.path("inc/template-tags.php").as_std_path()));
    }

    #[test]
    fn test_directory_is_watched_itself() {
        let (_dir, env) = theme();
        let target = WatchTarget::resolve(env.path("assets/js").as_str()).unwrap();

        assert_eq!(target.dir, env.path("assets/js"));
    }

    #[test]
    fn test_relative_glob_is_anchored_in_cwd() {
        let target = WatchTarget::resolve("*.toml").unwrap();

        assert_eq!(target.dir, cwd());
        assert!(target.matches(cwd().join("Cargo.toml").as_std_path()));
    }

    #[test]
    fn test_missing_anchor() {
        assert!(matches!(
            WatchTarget::resolve("assets/does-not-exist/**/*.scss"),
            Err(WatchError::Resolve(..))
        ));
    }

    #[test]
    fn test_outermost_directories() {
        let dirs = [
            "/srv/begonia/assets/scss/components",
            "/srv/begonia/assets",
            "/srv/begonia/assets-old",
            "/srv/begonia/inc",
            "/srv/begonia/assets/js",
            "/srv/begonia/inc",
        ]
        .map(Utf8PathBuf::from);

        assert_eq!(
            outermost(dirs),
            [
                "/srv/begonia/assets",
                "/srv/begonia/assets-old",
                "/srv/begonia/inc"
            ]
            .map(Utf8PathBuf::from)
        );
    }

    #[test]
    fn test_single_save_triggers_style_chain_once() {
        let (_dir, env) = theme();
        let watcher = theme_watcher(&env).unwrap();

        let partial = env.path("assets/scss/components/_buttons.scss");
        // one save, reported as create + modify + close-write
        let batch = [partial.as_std_path(); 3];

        assert_eq!(watcher.plan(batch), ["styles"]);
    }

    #[test]
    fn test_batch_maps_to_both_chains_in_order() {
        let (_dir, env) = theme();
        let watcher = theme_watcher(&env).unwrap();

        let js = env.path("assets/js/modules/menu.js");
        let scss = env.path("assets/scss/style.scss");

        assert_eq!(
            watcher.plan([js.as_std_path(), scss.as_std_path()]),
            ["styles", "scripts"]
        );
    }

    #[test]
    fn test_bundle_output_does_not_retrigger() {
        let (_dir, env) = theme();
        let watcher = theme_watcher(&env).unwrap();

        let bundle = env.path("assets/js/main.js");
        assert!(watcher.plan([bundle.as_std_path()]).is_empty());

        let unrelated = env.path("functions.php");
        assert!(watcher.plan([unrelated.as_std_path()]).is_empty());
    }

    #[test]
    fn test_roots_are_collapsed() {
        let (_dir, env) = theme();
        let mut watcher = theme_watcher(&env).unwrap();
        watcher
            .bind(&env.glob("assets/scss/components/*.scss"), "styles")
            .unwrap();

        assert_eq!(
            watcher.roots(),
            [env.path("assets/js"), env.path("assets/scss")]
        );
    }
}
