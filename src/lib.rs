#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
mod error;
pub mod graph;
pub mod io;
pub mod live;
pub mod pipeline;
pub mod tasks;
pub mod watch;

pub use crate::config::{CONFIG_FILE, Config};
pub use crate::error::*;
pub use crate::graph::{Context, Report, Task, TaskGraph, TaskId, TaskRun};
pub use crate::live::{DevServer, LiveReload, Message, Session, Transport};
pub use crate::pipeline::{Mode, blueprint, build, develop, serve};
pub use crate::watch::{Action, WatchTable, Watcher};
