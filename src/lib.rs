#![forbid(unsafe_code)]
//! Build runner for WordPress-style themes.
//!
//! A theme project is driven through a fixed graph of named tasks: Sass is
//! compiled and prefixed into `style.css`, mirrored into `rtl.css`, scripts
//! are concatenated into one wrapped bundle, and the finished theme is
//! staged next to the project and zipped into an installer archive. During
//! development a proxy in front of the real backend reloads browsers as
//! sources change.
//!
//! ```no_run
//! use themesmith::{Config, Environment, Runner, tasks};
//!
//! let env = Environment::new(".", Config::load("gulpconfig.json")?, None);
//! let graph = tasks::theme_graph()?;
//! let runner = Runner::new(&graph, &env);
//!
//! runner.run("styles")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod config;
mod error;
mod executor;
mod graph;
mod io;
#[cfg(feature = "logging")]
pub mod logging;
pub mod package;
pub mod rtl;
pub mod scripts;
#[cfg(feature = "server")]
pub mod serve;
pub mod styles;
pub mod tasks;
#[cfg(feature = "live")]
pub mod watch;

pub use crate::config::{Config, DEFAULT_CONFIG_FILE, Environment, Layout};
pub use crate::error::*;
pub use crate::executor::{Report, Runner, TaskContext, TaskExecution};
pub use crate::graph::{GraphBuilder, TaskDef, TaskGraph, TaskNode, TaskResult, Visibility};
