//! The task graph and its parallel executor.
//!
//! A pipeline is a static Directed Acyclic Graph of named [`Task`]s. Edges are
//! declared up front with [`TaskGraph::add`], so the ordering of a pipeline is
//! plain data: it can be inspected, rendered and tested without running
//! anything.
//!
//! Tasks communicate only through the filesystem. The single thing a task
//! hands back to the scheduler is the list of files it has written, which
//! doubles as its completion signal.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::mpsc::channel;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use indicatif::ProgressStyle;
use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::error::BuildError;
use crate::live::LiveReload;

static STYLE_ROOT: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .expect("Error setting progress bar template")
});

/// Everything a task may look at while running.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub config: &'a Config,
    /// Present only while the dev server is up. Builders push their updates
    /// through it.
    pub reload: Option<&'a LiveReload>,
}

impl<'a> Context<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            reload: None,
        }
    }

    pub fn with_reload(config: &'a Config, reload: &'a LiveReload) -> Self {
        Self {
            config,
            reload: Some(reload),
        }
    }
}

/// A named unit of work over a file set.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the task, returning the paths of every file it wrote.
    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>>;
}

/// A lightweight token identifying a task inside of a [`TaskGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(NodeIndex);

#[derive(Default)]
pub struct TaskGraph {
    graph: Graph<Arc<dyn Task>, ()>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task which may only start once every task in `after` is done.
    ///
    /// # Panics
    ///
    /// Task names double as identifiers, adding a second task under the same
    /// name panics.
    pub fn add<T>(&mut self, task: T, after: &[TaskId]) -> TaskId
    where
        T: Task + 'static,
    {
        assert!(
            self.find(task.name()).is_none(),
            "Task '{}' declared twice",
            task.name()
        );

        let index = self.graph.add_node(Arc::new(task));

        for dependency in after {
            self.graph.add_edge(dependency.0, index, ());
        }

        TaskId(index)
    }

    pub fn find(&self, name: &str) -> Option<TaskId> {
        self.graph
            .node_indices()
            .find(|&i| self.graph[i].name() == name)
            .map(TaskId)
    }

    pub fn names(&self) -> Vec<&str> {
        self.graph.node_weights().map(|task| task.name()).collect()
    }

    /// Names of the tasks `id` directly waits for, sorted.
    pub fn dependencies(&self, id: TaskId) -> Vec<&str> {
        let mut names: Vec<_> = self
            .graph
            .neighbors_directed(id.0, Direction::Incoming)
            .map(|i| self.graph[i].name())
            .collect();
        names.sort();
        names
    }

    /// Whether `id` transitively waits for `other`.
    pub fn depends_on(&self, id: TaskId, other: TaskId) -> bool {
        id != other && petgraph::algo::has_path_connecting(&self.graph, other.0, id.0, None)
    }

    /// Runs every task of the graph, each as soon as all of its dependencies
    /// have completed. Independent tasks run concurrently on the rayon pool.
    ///
    /// The first failing task aborts the run: no further task is started,
    /// tasks already in flight are left to finish, and the failure is
    /// returned.
    pub fn run(&self, ctx: &Context) -> Result<Report, BuildError> {
        petgraph::algo::toposort(&self.graph, None)
            .map_err(|cycle| BuildError::Cycle(self.graph[cycle.node_id()].name().to_string()))?;

        let total = self.graph.node_count();
        let mut report = Report::default();

        if total == 0 {
            return Ok(report);
        }

        // Number of unfinished dependencies of each task.
        let mut waiting: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| {
                let count = self.graph.neighbors_directed(i, Direction::Incoming).count();
                (i, count)
            })
            .collect();

        let root_span = tracing::span!(Level::INFO, "pipeline");
        root_span.pb_set_length(total as u64);
        root_span.pb_set_style(&STYLE_ROOT);
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        // The scheduler loop blocks on the calling thread, never on a worker.
        rayon::in_place_scope(|s| -> Result<(), BuildError> {
            let (sender, receiver) =
                channel::<(NodeIndex, anyhow::Result<Vec<Utf8PathBuf>>, Duration)>();

            let spawn = |index: NodeIndex| {
                let task = self.graph[index].clone();
                let sender = sender.clone();

                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", name = task.name());
                    span.pb_set_style(&STYLE_TASK);
                    span.pb_set_message(&format!("Running {}", task.name()));
                    let _enter = span.enter();

                    let start = Instant::now();

                    let output = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        task.run(ctx)
                    }))
                    .unwrap_or_else(|panic| {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    });

                    // The scheduler stops listening once a task has failed.
                    sender.send((index, output, start.elapsed())).ok();
                });
            };

            for (&index, &count) in &waiting {
                if count == 0 {
                    spawn(index);
                }
            }

            let mut completed = 0;

            while completed < total {
                let (index, output, duration) = receiver.recv()?;
                let name = self.graph[index].name();

                let written = output.map_err(|e| BuildError::Task(name.to_string(), e))?;

                tracing::debug!(task = name, files = written.len(), ?duration, "task finished");

                report.runs.push(TaskRun {
                    name: name.to_string(),
                    written,
                    duration,
                });

                completed += 1;
                root_span.pb_inc(1);

                for dependent in self.graph.neighbors_directed(index, Direction::Outgoing) {
                    if let Some(count) = waiting.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            spawn(dependent);
                        }
                    }
                }
            }

            Ok(())
        })?;

        Ok(report)
    }
}

/// Renders the graph as a Mermaid diagram.
impl Display for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name().replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

/// A single completed task.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub name: String,
    /// Files written by the task.
    pub written: Vec<Utf8PathBuf>,
    pub duration: Duration,
}

/// Completed tasks, in order of completion.
#[derive(Debug, Default)]
pub struct Report {
    pub runs: Vec<TaskRun>,
}

impl Report {
    pub fn get(&self, name: &str) -> Option<&TaskRun> {
        self.runs.iter().find(|run| run.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.runs.iter().position(|run| run.name == name)
    }

    /// Every file written during the run.
    pub fn written(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.runs.iter().flat_map(|run| run.written.iter())
    }
}
