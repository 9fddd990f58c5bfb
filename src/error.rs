use std::sync::mpsc::RecvError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KamadoError {
    #[error("Error while loading the configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while building the assets.\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Error while starting the dev server:\n{0}")]
    Serve(#[from] ServeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read the configuration file.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse the configuration file.\n{0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised while enumerating source files.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct CleanError(#[from] pub std::io::Error);

#[derive(Debug, Error)]
pub enum CopyError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("Task '{0}':\n{1}")]
    Task(String, anyhow::Error),

    #[error("Task scheduler lost contact with its workers")]
    Scheduler(#[from] RecvError),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Couldn't bind {0}: {1}")]
    Bind(String, std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
