//! Sequential, dependency-ordered task execution.
//!
//! Every call to [`Runner::run`] is a single invocation: prerequisites are
//! resolved depth-first in declaration order, each task runs at most once,
//! and nothing runs before all of its prerequisites have finished. The first
//! failure ends the invocation, so a task never runs on top of a broken
//! prerequisite.

use std::collections::HashSet;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Environment;
use crate::error::RunError;
use crate::graph::TaskGraph;

/// Handle to work that outlives the task which started it.
type Detached = (String, JoinHandle<anyhow::Result<()>>);

/// The context passed to every task action.
pub struct TaskContext<'a> {
    /// Project root, configuration and command line overrides.
    pub env: &'a Environment,
    /// The runner executing this task, for tasks that trigger other chains.
    pub runner: &'a Runner<'a>,
    /// Tracing span assigned to this task.
    pub span: tracing::Span,
}

impl TaskContext<'_> {
    /// Hands a background thread to the runner, which keeps the process alive
    /// until it finishes.
    pub fn detach(&self, name: impl Into<String>, handle: JoinHandle<anyhow::Result<()>>) {
        self.runner.detach(name.into(), handle);
    }
}

/// Execution record for one task.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub name: String,
    pub duration: Duration,
}

/// What happened during one invocation, in execution order.
#[derive(Debug, Default)]
pub struct Report {
    pub executed: Vec<TaskExecution>,
}

impl Report {
    pub fn names(&self) -> Vec<&str> {
        self.executed.iter().map(|e| e.name.as_str()).collect()
    }
}

/// Executes tasks of a [`TaskGraph`] against one [`Environment`].
pub struct Runner<'a> {
    graph: &'a TaskGraph,
    env: &'a Environment,
    detached: Mutex<Vec<Detached>>,
}

impl<'a> Runner<'a> {
    pub fn new(graph: &'a TaskGraph, env: &'a Environment) -> Self {
        Self {
            graph,
            env,
            detached: Mutex::new(Vec::new()),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        self.graph
    }

    /// Runs `name` after all of its prerequisites.
    pub fn run(&self, name: &str) -> Result<Report, RunError> {
        let root = self
            .graph
            .node_index(name)
            .ok_or_else(|| RunError::UnknownTask(name.to_string()))?;

        let order = self.schedule(root);
        let mut report = Report::default();

        for index in order {
            let task = &self.graph.graph[index];
            let start = Instant::now();

            if let Some(action) = &task.action {
                let span = tracing::span!(Level::INFO, "task", name = %task.name);
                span.pb_set_message(&format!("Running {}", task.name));
                let _enter = span.enter();

                tracing::info!("starting '{}'", console::style(&task.name).cyan());

                let context = TaskContext {
                    env: self.env,
                    runner: self,
                    span: span.clone(),
                };

                action(&context).map_err(|err| RunError::Task(task.name.to_string(), err))?;

                tracing::info!(
                    "finished '{}' {}",
                    console::style(&task.name).cyan(),
                    crate::io::as_overhead(start)
                );
            }

            report.executed.push(TaskExecution {
                name: task.name.to_string(),
                duration: start.elapsed(),
            });
        }

        Ok(report)
    }

    /// Post-order walk over prerequisites, each task visited once.
    fn schedule(&self, root: NodeIndex) -> Vec<NodeIndex> {
        fn visit(
            graph: &TaskGraph,
            index: NodeIndex,
            seen: &mut HashSet<NodeIndex>,
            order: &mut Vec<NodeIndex>,
        ) {
            if !seen.insert(index) {
                return;
            }

            for prerequisite in &graph.graph[index].prerequisites {
                if let Some(dep) = graph.node_index(prerequisite) {
                    visit(graph, dep, seen, order);
                }
            }

            order.push(index);
        }

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        visit(self.graph, root, &mut seen, &mut order);
        order
    }

    fn detach(&self, name: String, handle: JoinHandle<anyhow::Result<()>>) {
        match self.detached.lock() {
            Ok(mut detached) => detached.push((name, handle)),
            Err(poisoned) => poisoned.into_inner().push((name, handle)),
        }
    }

    /// Blocks until every detached background thread has finished.
    pub fn wait(&self) -> Result<(), RunError> {
        let detached = match self.detached.lock() {
            Ok(mut detached) => std::mem::take(&mut *detached),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for (name, handle) in detached {
            handle
                .join()
                .map_err(|_| RunError::Panicked)?
                .map_err(|err| RunError::Task(name, err))?;
        }

        Ok(())
    }
}
