//! The theme's task graph.

use std::fmt::Write;

use console::style;

use crate::error::GraphError;
use crate::graph::{TaskGraph, TaskNode, TaskResult};
use crate::{TaskContext, package, rtl, scripts, styles};

/// Declares every task of a theme project.
pub fn theme_graph() -> Result<TaskGraph, GraphError> {
    let mut tasks = TaskGraph::builder();

    tasks
        .task("style.css")
        .describe("Compiles Sass to style.css and adds vendor prefixes")
        .run(|ctx| {
            styles::compile_all(ctx.env)?;
            Ok(())
        });

    tasks
        .task("rtl.css")
        .describe("Generates the RTL stylesheet based on style.css")
        .depends_on(["style.css"])
        .run(|ctx| Ok(rtl::generate(ctx.env)?));

    tasks
        .task("styles")
        .describe("Compiles Sass to style.css and generates rtl.css")
        .depends_on(["rtl.css"])
        .aggregate();

    tasks
        .task("scripts")
        .describe("Concatenates all JS into main.js and wraps it in a closure")
        .run(|ctx| {
            scripts::bundle(ctx.env)?;
            Ok(())
        });

    tasks.task("browser-sync").hidden().run(browser_sync);

    tasks
        .task("watch")
        .describe("Watches sources and rebuilds styles and scripts on change")
        .run(watch);

    tasks
        .task("bs")
        .describe("Main development task: build, proxy with live reload, watch")
        .depends_on(["styles", "scripts", "browser-sync", "watch"])
        .aggregate();

    tasks
        .task("copy-folder")
        .describe("Copies the theme's production files to a build folder")
        .depends_on(["styles", "scripts"])
        .run(|ctx| {
            package::copy(ctx.env)?;
            Ok(())
        });

    tasks
        .task("build")
        .describe("Removes unneeded files and folders from the build folder")
        .depends_on(["copy-folder"])
        .run(|ctx| {
            package::prune_build(ctx.env)?;
            Ok(())
        });

    tasks
        .task("zip")
        .describe("Creates the theme installer archive and deletes the build folder")
        .depends_on(["build"])
        .run(|ctx| {
            package::archive(ctx.env)?;
            Ok(())
        });

    tasks
        .task("server")
        .describe("Compiles scripts and styles for production")
        .depends_on(["styles", "scripts"])
        .run(|_| {
            println!(
                "The styles and scripts have been compiled for production! Go and clear the caches!"
            );
            Ok(())
        });

    tasks
        .task("help")
        .describe("Displays this help text")
        .run(|ctx| {
            print!("{}", help(ctx.runner.graph()));
            Ok(())
        });

    tasks.task("default").hidden().depends_on(["help"]).aggregate();

    tasks.finish()
}

/// Usage line followed by every listed task.
pub fn help(graph: &TaskGraph) -> String {
    let listed = graph.listed();
    let width = listed.iter().map(|task| task.name.len()).max().unwrap_or(0);

    let mut text = String::new();
    let _ = writeln!(text, "\n{} themesmith [TASK] [OPTIONS]\n", style("Usage:").bold());
    let _ = writeln!(text, "{}", style("Available tasks").bold());

    for task in listed {
        let _ = writeln!(text, "  {}", help_line(task, width));
    }

    text.push('\n');
    text
}

fn help_line(task: &TaskNode, width: usize) -> String {
    let mut line = format!(
        "{:width$} {}",
        style(&task.name).cyan(),
        task.description,
        width = width
    );

    if !task.prerequisites.is_empty() {
        let _ = write!(line, " {}", style(format!("[{}]", task.prerequisites.join(", "))).dim());
    }

    line
}

fn browser_sync(ctx: &TaskContext<'_>) -> TaskResult {
    #[cfg(feature = "server")]
    {
        for (name, handle) in crate::serve::start(ctx.env)? {
            ctx.detach(name, handle);
        }
        Ok(())
    }

    #[cfg(not(feature = "server"))]
    {
        let _ = ctx;
        anyhow::bail!("the dev server needs the `server` feature")
    }
}

fn watch(ctx: &TaskContext<'_>) -> TaskResult {
    #[cfg(feature = "live")]
    {
        let watcher = crate::watch::theme_watcher(ctx.env)?;
        watcher.run(ctx.runner)?;
        Ok(())
    }

    #[cfg(not(feature = "live"))]
    {
        let _ = ctx;
        anyhow::bail!("watching needs the `live` feature")
    }
}
