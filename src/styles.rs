//! Stylesheet compilation.
//!
//! Each entry stylesheet goes through three stages:
//!
//! 1. Sass is compiled to plain CSS, by Dart Sass when the executable is
//!    available and by the built-in `grass` otherwise,
//! 2. `lightningcss` adds vendor prefixes for the configured browser targets,
//! 3. the result is printed next to a source map.
//!
//! Dart Sass emits its own source map, which the prefixer extends, so the
//! final map leads back to the original lines of every partial. `grass` has
//! no source maps; with it the map only reaches the compiled entry.
//!
//! The header comment of a theme stylesheet carries metadata (theme name,
//! `Version:` and so on) that has to reach the output untouched. Plain
//! comments are dropped by the prefixer, so the header is marked as a license
//! comment (`/*!`) for the round trip and restored afterwards.

use std::fs;
use std::process::{Command, Stdio};
use std::sync::{Arc, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;

use crate::config::Environment;
use crate::error::StyleError;
use crate::rtl::strip_source_map_url;

/// Browser targets for vendor prefixing.
pub const BROWSERS: [&str; 2] = ["last 2 versions", "> 1%"];

/// Dart Sass executable looked up on `PATH` by default.
pub const SASS: &str = "sass";

/// Which Sass implementation compiles the entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compiler {
    /// Dart Sass at the given executable.
    Dart(String),
    /// The built-in compiler.
    Grass,
}

impl Compiler {
    /// Dart Sass if `executable` runs, `grass` otherwise.
    pub fn detect(executable: &str) -> Self {
        let status = Command::new(executable)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Compiler::Dart(executable.to_owned()),
            _ => {
                tracing::warn!(
                    "`{}` not found, compiling with grass; source maps will stop at the entry file",
                    executable
                );
                Compiler::Grass
            }
        }
    }
}

/// A compiled stylesheet written to disk.
#[derive(Debug, Clone)]
pub struct CompiledStyle {
    /// Entry file it was compiled from.
    pub entry: Utf8PathBuf,
    /// The compiled stylesheet.
    pub path: Utf8PathBuf,
    /// Its source map.
    pub map: Utf8PathBuf,
}

/// In-memory result of compiling one entry.
#[derive(Debug, Clone)]
pub struct StyleOutput {
    pub css: String,
    pub map: String,
}

/// Compiles every entry stylesheet of the project into the project root.
pub fn compile_all(env: &Environment) -> Result<Vec<CompiledStyle>, StyleError> {
    let targets = targets()?;
    let compiler = Compiler::detect(env.config.sass.as_deref().unwrap_or(SASS));
    let mut compiled = Vec::new();

    for entry in entries(&env.glob(&env.layout().style_entry))? {
        let stem = entry.file_stem().unwrap_or("style");
        let path = env.path(format!("{stem}.css"));
        let map = env.path(format!("{stem}.css.map"));

        let output = compile(&entry, &path, &compiler, targets)?;
        fs::write(&path, output.css)?;
        fs::write(&map, output.map)?;

        tracing::info!(%path, "compiled {}", entry.strip_prefix(&env.root).unwrap_or(&entry));
        compiled.push(CompiledStyle {
            entry: entry.clone(),
            path,
            map,
        });
    }

    if compiled.is_empty() {
        tracing::warn!("no stylesheets matched {}", env.layout().style_entry);
    }

    Ok(compiled)
}

/// Entry stylesheets matching `pattern`, sorted, without Sass partials.
pub fn entries(pattern: &str) -> Result<Vec<Utf8PathBuf>, StyleError> {
    let mut entries = Vec::new();

    for path in glob::glob(pattern)? {
        let path = Utf8PathBuf::try_from(path?)?;
        if path.file_name().is_some_and(|name| name.starts_with('_')) {
            continue;
        }
        entries.push(path);
    }

    entries.sort();
    Ok(entries)
}

pub fn targets() -> Result<Targets, StyleError> {
    let browsers = Browsers::from_browserslist(BROWSERS)
        .map_err(|err| StyleError::Prefix("browserslist".into(), err.to_string()))?;

    Ok(Targets {
        browsers,
        ..Targets::default()
    })
}

/// Compiles a single Sass entry destined for `output`.
///
/// Dart Sass writes to `output` (and its `.map`) directly; the caller
/// overwrites both with the prefixed result. Source names in the map are
/// relative to the directory of `output`.
pub fn compile(
    entry: &Utf8Path,
    output: &Utf8Path,
    compiler: &Compiler,
    targets: Targets,
) -> Result<StyleOutput, StyleError> {
    let base = output.parent().unwrap_or(Utf8Path::new(""));
    let source = entry.strip_prefix(base).unwrap_or(entry);
    let map_name = format!("{}.map", output.file_name().unwrap_or("style.css"));

    let (css, input_map) = match compiler {
        Compiler::Dart(executable) => {
            let (css, map) = compile_dart(executable, entry, output)?;
            (css, Some(map))
        }
        Compiler::Grass => (compile_grass(entry)?, None),
    };

    let mut output = prefix(&css, source.as_str(), input_map.as_deref(), targets)?;
    output.css.push_str(&format!("\n/*# sourceMappingURL={map_name} */\n"));
    Ok(output)
}

fn compile_grass(entry: &Utf8Path) -> Result<String, StyleError> {
    let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
    if let Some(dir) = entry.parent() {
        options = options.load_path(dir);
    }

    Ok(grass::from_path(entry, &options)?)
}

/// Runs Dart Sass, returning the compiled CSS and its source map.
fn compile_dart(
    executable: &str,
    entry: &Utf8Path,
    output: &Utf8Path,
) -> Result<(String, String), StyleError> {
    let mut command = Command::new(executable);
    command
        .arg("--style=expanded")
        .arg("--source-map")
        .arg("--embed-sources")
        .arg("--no-error-css");

    if let Some(dir) = entry.parent() {
        command.arg(format!("--load-path={dir}"));
    }

    let result = command
        .arg(entry.as_str())
        .arg(output.as_str())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(StyleError::Dart(entry.to_owned(), stderr.trim().to_string()));
    }

    let css = fs::read_to_string(output)?;
    let map = fs::read_to_string(format!("{output}.map"))?;

    Ok((strip_source_map_url(&css), map))
}

/// Adds vendor prefixes to plain CSS and produces a source map for it.
///
/// When `input_map` describes how `css` was generated, the resulting map is
/// chained through it. Declarations the parser can't make sense of (old
/// browser hacks such as `*zoom`) are dropped with a warning.
pub fn prefix(
    css: &str,
    source: &str,
    input_map: Option<&str>,
    targets: Targets,
) -> Result<StyleOutput, StyleError> {
    let (input, marked) = mark_header(css);
    let error = |err: String| StyleError::Prefix(source.into(), err);
    let warnings = Arc::new(RwLock::new(Vec::new()));

    let mut sheet = StyleSheet::parse(
        &input,
        ParserOptions {
            filename: source.to_string(),
            error_recovery: true,
            warnings: Some(warnings.clone()),
            ..ParserOptions::default()
        },
    )
    .map_err(|err| error(err.to_string()))?;

    if let Ok(warnings) = warnings.read() {
        for warning in warnings.iter() {
            tracing::warn!("{}: {}", source, warning);
        }
    }

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|err| error(err.to_string()))?;

    let mut map = SourceMap::new("/");
    map.add_source(source);
    map.set_source_content(0, &input)
        .map_err(|err| StyleError::SourceMap(format!("{err:?}")))?;

    let printed = sheet
        .to_css(PrinterOptions {
            targets,
            source_map: Some(&mut map),
            ..PrinterOptions::default()
        })
        .map_err(|err| error(err.to_string()))?;

    if let Some(input_map) = input_map {
        let mut original = SourceMap::from_json("/", input_map)
            .map_err(|err| StyleError::SourceMap(format!("{err:?}")))?;
        map.extends(&mut original)
            .map_err(|err| StyleError::SourceMap(format!("{err:?}")))?;
    }

    let css = if marked {
        printed.code.replacen("/*!", "/*", 1)
    } else {
        printed.code
    };

    let map = map
        .to_json(None)
        .map_err(|err| StyleError::SourceMap(format!("{err:?}")))?;

    Ok(StyleOutput { css, map })
}

/// Turns a leading `/* ... */` header into a `/*! ... */` one.
///
/// Returns the possibly rewritten stylesheet and whether it was changed. A
/// leading `@charset` rule is dropped, the printed output is UTF-8 anyway.
/// Skipped lines are kept as blank ones so an input map still lines up.
fn mark_header(css: &str) -> (String, bool) {
    let mut rest = css.trim_start();

    if rest.starts_with("@charset")
        && let Some(end) = rest.find(';')
    {
        rest = rest[end + 1..].trim_start();
    }

    let skipped = &css[..css.len() - rest.len()];
    let padding = "\n".repeat(skipped.matches('\n').count());

    match rest.strip_prefix("/*") {
        Some(body) if !body.starts_with('!') => (format!("{padding}/*!{body}"), true),
        _ => (format!("{padding}{rest}"), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "/*\nTheme Name: Begonia\nVersion: 1.2.3\n*/\n";

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn sources(map: &str) -> Vec<String> {
        let map: serde_json::Value = serde_json::from_str(map).unwrap();
        map["sources"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|source| source.as_str().map(str::to_owned))
            .collect()
    }

    #[test]
    fn test_mark_header() {
        let (marked, changed) = mark_header("@charset \"UTF-8\";\n/* head */\na{}");
        assert!(changed);
        assert_eq!(marked, "\n/*! head */\na{}");

        let (plain, changed) = mark_header("/*! keep */ a{}");
        assert!(!changed);
        assert!(plain.starts_with("/*! keep */"));

        let (none, changed) = mark_header("a { color: red }");
        assert!(!changed);
        assert_eq!(none, "a { color: red }");
    }

    #[test]
    fn test_header_survives_prefixing() {
        let css = format!("{HEADER}.a {{ color: red; }}\n");
        let output = prefix(&css, "style.scss", None, targets().unwrap()).unwrap();

        assert!(output.css.starts_with("/*\nTheme Name: Begonia\nVersion: 1.2.3\n"));
        assert!(!output.css.contains("/*!"));
    }

    #[test]
    fn test_vendor_prefixes_added() {
        let output = prefix(
            ".a { user-select: none; }",
            "style.scss",
            None,
            targets().unwrap(),
        )
        .unwrap();

        assert!(output.css.contains("-webkit-user-select"));
    }

    #[test]
    fn test_legacy_hacks_do_not_abort() {
        let output = prefix(
            ".a { *zoom: 1; color: red; }",
            "style.scss",
            None,
            targets().unwrap(),
        )
        .unwrap();

        assert!(output.css.contains("color: red"));
    }

    #[test]
    fn test_source_map_attributes_lines() {
        let css = ".a {\n  color: red;\n}\n\n.b {\n  color: blue;\n}\n";
        let output = prefix(css, "assets/scss/style.scss", None, targets().unwrap()).unwrap();

        let map: serde_json::Value = serde_json::from_str(&output.map).unwrap();
        assert_eq!(map["version"], 3);
        assert!(sources(&output.map)[0].ends_with("style.scss"));

        // one `;` per generated line after the first, so both rules map
        let mappings = map["mappings"].as_str().unwrap();
        assert!(mappings.split(';').filter(|line| !line.is_empty()).count() >= 2);
    }

    #[test]
    fn test_input_map_reaches_partials() {
        // `.button` compiled out of a partial, as a Sass compiler reports it
        let css = ".button {\n  color: red;\n}\n";
        let input_map = r#"{
            "version": 3,
            "sources": ["assets/scss/_buttons.scss"],
            "sourcesContent": [".button {\n  color: red;\n}\n"],
            "names": [],
            "mappings": "AAAA;EACE"
        }"#;

        let output = prefix(css, "style.css", Some(input_map), targets().unwrap()).unwrap();
        let sources = sources(&output.map);

        assert!(sources.iter().any(|source| source.ends_with("_buttons.scss")));
    }

    #[test]
    fn test_compile_scss_entry() {
        let (_dir, root) = scratch();
        fs::write(root.join("_vars.scss"), "$accent: #c0ffee;").unwrap();
        fs::write(
            root.join("style.scss"),
            format!("{HEADER}@use 'vars';\n.button {{ .icon {{ color: vars.$accent; }} }}\n"),
        )
        .unwrap();

        let output = compile(
            &root.join("style.scss"),
            &root.join("style.css"),
            &Compiler::Grass,
            targets().unwrap(),
        )
        .unwrap();

        assert!(output.css.contains("Version: 1.2.3"));
        assert!(output.css.contains(".button .icon"));
        assert!(output.css.contains("#c0ffee"));
        assert!(
            output
                .css
                .trim_end()
                .ends_with("/*# sourceMappingURL=style.css.map */")
        );
        assert!(sources(&output.map)[0].ends_with("style.scss"));
    }

    #[test]
    fn test_dart_sass_maps_partials() {
        let compiler = Compiler::detect(SASS);
        if compiler == Compiler::Grass {
            // Dart Sass isn't installed here
            return;
        }

        let (_dir, root) = scratch();
        fs::write(root.join("_buttons.scss"), ".button {\n  color: red;\n}\n").unwrap();
        fs::write(root.join("style.scss"), "@use 'buttons';\n.site {\n  margin: 0;\n}\n").unwrap();

        let output = compile(
            &root.join("style.scss"),
            &root.join("style.css"),
            &compiler,
            targets().unwrap(),
        )
        .unwrap();

        assert!(output.css.contains(".button"));
        assert_eq!(output.css.matches("sourceMappingURL").count(), 1);
        assert!(sources(&output.map).iter().any(|source| source.ends_with("_buttons.scss")));
    }

    #[test]
    fn test_missing_executable_falls_back_to_grass() {
        assert_eq!(Compiler::detect("themesmith-missing-sass"), Compiler::Grass);
    }

    #[test]
    fn test_compile_error_is_reported() {
        let (_dir, root) = scratch();
        fs::write(root.join("style.scss"), ".a { color: $missing; }").unwrap();

        let err = compile(
            &root.join("style.scss"),
            &root.join("style.css"),
            &Compiler::Grass,
            targets().unwrap(),
        )
        .unwrap_err();

        assert!(matches!(err, StyleError::Sass(_)));
    }

    #[test]
    fn test_entries_skip_partials() {
        let (_dir, root) = scratch();
        for name in ["style.scss", "_mixins.scss", "editor.scss"] {
            fs::write(root.join(name), "").unwrap();
        }

        let found = entries(root.join("*.scss").as_str()).unwrap();
        let names: Vec<_> = found.iter().filter_map(|p| p.file_name()).collect();

        assert_eq!(names, ["editor.scss", "style.scss"]);
    }
}
