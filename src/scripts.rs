//! Script bundling.
//!
//! Sources are concatenated in the order their globs are declared, so
//! modules can rely on declarations made by earlier files, then wrapped in a
//! closure that receives `window`, `document` and `jQuery` as parameters.

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Environment;
use crate::error::ScriptError;

/// Parameters of the wrapping closure.
pub const PARAMS: [&str; 3] = ["window", "document", "$"];
/// Arguments the closure is invoked with.
pub const ARGS: [&str; 3] = ["window", "document", "jQuery"];

/// Bundles the project's scripts into the configured output file.
pub fn bundle(env: &Environment) -> Result<Utf8PathBuf, ScriptError> {
    let layout = env.layout();
    let output = env.path(&layout.script_bundle);

    let patterns: Vec<_> = layout
        .script_sources
        .iter()
        .map(|pattern| env.glob(pattern))
        .collect();

    let sources = collect_sources(&patterns, &output)?;
    if sources.is_empty() {
        tracing::warn!("no scripts matched, writing an empty bundle");
    }

    let code = concat(&sources)?;
    fs::write(&output, wrap(&code))?;

    tracing::info!(path = %output, "bundled {} files", sources.len());
    Ok(output)
}

/// Expands the globs in order, sorting matches within each glob and dropping
/// duplicates as well as the bundle itself.
pub fn collect_sources(
    patterns: &[String],
    output: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, ScriptError> {
    let output = normalize(output);
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for pattern in patterns {
        let mut matches = Vec::new();
        for path in glob::glob(pattern)? {
            matches.push(Utf8PathBuf::try_from(path?)?);
        }
        matches.sort();

        for path in matches {
            let key = normalize(&path);
            if key == output || !seen.insert(key) {
                continue;
            }
            sources.push(path);
        }
    }

    Ok(sources)
}

fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    path.canonicalize_utf8().unwrap_or_else(|_| path.to_path_buf())
}

/// Joins the file contents with a newline.
pub fn concat(sources: &[Utf8PathBuf]) -> Result<String, ScriptError> {
    let mut code = String::new();

    for (i, path) in sources.iter().enumerate() {
        if i > 0 {
            code.push('\n');
        }
        code.push_str(&fs::read_to_string(path)?);
    }

    Ok(code)
}

/// Wraps `code` in an immediately invoked function expression.
pub fn wrap(code: &str) -> String {
    format!(
        ";(function({}) {{\n\"use strict\";\n\n{}\n}}({}));\n",
        PARAMS.join(", "),
        code.trim(),
        ARGS.join(", ")
    )
}
