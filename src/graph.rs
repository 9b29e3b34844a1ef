//! The task graph.
//!
//! A [`TaskGraph`] is a static, directed acyclic graph of named tasks. It is
//! declared once at startup through a [`GraphBuilder`], validated, and then
//! handed to a [`Runner`](crate::Runner) which executes a requested task after
//! all of its prerequisites.
//!
//! Edges point from a prerequisite to the task that depends on it, the same
//! direction data flows in. Prerequisites additionally keep the order in
//! which they were declared, since that is the order they are run in.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::TaskContext;
use crate::error::GraphError;

/// Result returned by a task action.
pub type TaskResult = anyhow::Result<()>;

/// Type-erased task action.
pub(crate) type TaskFn = Arc<dyn Fn(&TaskContext<'_>) -> TaskResult + Send + Sync>;

/// Whether a task shows up in the `help` listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Listed,
    Hidden,
}

/// A single named step of the build.
pub struct TaskNode {
    pub name: Cow<'static, str>,
    pub description: Cow<'static, str>,
    pub prerequisites: Vec<Cow<'static, str>>,
    pub visibility: Visibility,
    pub(crate) action: Option<TaskFn>,
}

impl TaskNode {
    /// Aggregate tasks only exist to pull in their prerequisites.
    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

impl Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .field("visibility", &self.visibility)
            .field("action", &self.action.as_ref().map(|_| "*"))
            .finish()
    }
}

/// Validated, immutable task graph.
#[derive(Debug)]
pub struct TaskGraph {
    pub(crate) graph: Graph<TaskNode, ()>,
    pub(crate) index: HashMap<Cow<'static, str>, NodeIndex>,
}

impl TaskGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.index.get(name).map(|&index| &self.graph[index])
    }

    pub(crate) fn node_index(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    /// All tasks in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }

    /// Tasks that should be shown to the user, sorted by name.
    pub fn listed(&self) -> Vec<&TaskNode> {
        let mut listed: Vec<_> = self
            .tasks()
            .filter(|task| task.visibility == Visibility::Listed)
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        listed
    }
}

/// Collects task declarations; turned into a [`TaskGraph`] by [`finish`].
///
/// [`finish`]: GraphBuilder::finish
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<TaskNode>,
}

impl GraphBuilder {
    /// Starts declaring a task called `name`.
    pub fn task(&mut self, name: impl Into<Cow<'static, str>>) -> TaskDef<'_> {
        TaskDef {
            builder: self,
            node: TaskNode {
                name: name.into(),
                description: Cow::Borrowed(""),
                prerequisites: Vec::new(),
                visibility: Visibility::Listed,
                action: None,
            },
        }
    }

    /// Validates the declarations and freezes them into a graph.
    pub fn finish(self) -> Result<TaskGraph, GraphError> {
        let mut graph = Graph::with_capacity(self.nodes.len(), 0);
        let mut index = HashMap::with_capacity(self.nodes.len());

        for node in self.nodes {
            let name = node.name.clone();
            if index.contains_key(&name) {
                return Err(GraphError::Duplicate(name.into_owned()));
            }
            index.insert(name, graph.add_node(node));
        }

        let mut edges = Vec::new();
        for target in graph.node_indices() {
            let task = &graph[target];
            for prerequisite in &task.prerequisites {
                let source = index.get(prerequisite).copied().ok_or_else(|| {
                    GraphError::UnknownPrerequisite {
                        task: task.name.to_string(),
                        prerequisite: prerequisite.to_string(),
                    }
                })?;
                edges.push((source, target));
            }
        }

        for (source, target) in edges {
            graph.add_edge(source, target, ());
        }

        petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].name.to_string()))?;

        Ok(TaskGraph { graph, index })
    }
}

/// A task declaration in progress.
pub struct TaskDef<'a> {
    builder: &'a mut GraphBuilder,
    node: TaskNode,
}

impl TaskDef<'_> {
    pub fn describe(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.node.description = description.into();
        self
    }

    pub fn depends_on<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.node
            .prerequisites
            .extend(prerequisites.into_iter().map(Into::into));
        self
    }

    /// Keeps the task out of the `help` listing.
    pub fn hidden(mut self) -> Self {
        self.node.visibility = Visibility::Hidden;
        self
    }

    /// Registers the task with an action.
    pub fn run<F>(mut self, action: F)
    where
        F: Fn(&TaskContext<'_>) -> TaskResult + Send + Sync + 'static,
    {
        self.node.action = Some(Arc::new(action));
        self.builder.nodes.push(self.node);
    }

    /// Registers an aggregate task without an action.
    pub fn aggregate(self) {
        self.builder.nodes.push(self.node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_task_is_rejected() {
        let mut builder = TaskGraph::builder();
        builder.task("watch").run(|_| Ok(()));
        builder.task("watch").depends_on(["watch-styles"]).run(|_| Ok(()));

        assert_eq!(
            builder.finish().unwrap_err(),
            GraphError::Duplicate("watch".into())
        );
    }

    #[test]
    fn test_unknown_prerequisite() {
        let mut builder = TaskGraph::builder();
        builder.task("rtl.css").depends_on(["style.css"]).run(|_| Ok(()));

        assert_eq!(
            builder.finish().unwrap_err(),
            GraphError::UnknownPrerequisite {
                task: "rtl.css".into(),
                prerequisite: "style.css".into(),
            }
        );
    }

    #[test]
    fn test_cycle() {
        let mut builder = TaskGraph::builder();
        builder.task("a").depends_on(["c"]).aggregate();
        builder.task("b").depends_on(["a"]).aggregate();
        builder.task("c").depends_on(["b"]).aggregate();

        assert!(matches!(builder.finish(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_listed_skips_hidden_and_sorts() {
        let mut builder = TaskGraph::builder();
        builder.task("zip").describe("archive").aggregate();
        builder.task("default").hidden().aggregate();
        builder.task("build").describe("prune").aggregate();

        let graph = builder.finish().unwrap();
        let names: Vec<_> = graph.listed().iter().map(|t| t.name.as_ref()).collect();

        assert_eq!(names, ["build", "zip"]);
        assert!(graph.get("default").is_some());
        assert!(!graph.get("zip").unwrap().has_action());
    }

    #[test]
    fn test_edges_follow_prerequisites() {
        let mut builder = TaskGraph::builder();
        builder.task("style.css").run(|_| Ok(()));
        builder.task("rtl.css").depends_on(["style.css"]).run(|_| Ok(()));

        let graph = builder.finish().unwrap();
        let source = graph.node_index("style.css").unwrap();
        let target = graph.node_index("rtl.css").unwrap();

        assert!(graph.graph.contains_edge(source, target));
        assert!(!graph.graph.contains_edge(target, source));
    }
}
