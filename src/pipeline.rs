//! The two entry points: a one-shot production build and the development
//! flow which keeps serving and rebuilding until interrupted.

use std::sync::Arc;
use std::time::Instant;

use console::style;
use tracing::info;

use crate::config::Config;
use crate::error::KamadoError;
use crate::graph::{Context, Report, TaskGraph};
use crate::io::as_overhead;
use crate::live::{DevServer, Session};
use crate::tasks::{
    Clean, CopyAssets, CopyImages, Markup, OptimizeImages, Scripts, Sprite, Styles, Webp,
};
use crate::watch::Watcher;

/// Controls whether images get optimised, and whether the process keeps
/// running after the first build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Production build, images are recompressed.
    Build,
    /// Development, images are copied as they are.
    Watch,
}

/// The task graph of a pipeline run.
///
/// ```text
/// clean ─► copy ─► images ─┬─► styles
///                          ├─► markup
///                          ├─► scripts
///                          ├─► sprite
///                          └─► webp
/// ```
pub fn blueprint(mode: Mode) -> TaskGraph {
    let mut graph = TaskGraph::new();

    let clean = graph.add(Clean, &[]);
    let copy = graph.add(CopyAssets, &[clean]);

    let images = match mode {
        Mode::Build => graph.add(OptimizeImages, &[copy]),
        Mode::Watch => graph.add(CopyImages, &[copy]),
    };

    graph.add(Styles, &[images]);
    graph.add(Markup, &[images]);
    graph.add(Scripts, &[images]);
    graph.add(Sprite, &[images]);
    graph.add(Webp, &[images]);

    graph
}

/// Builds the whole output tree once.
pub fn build(config: &Config) -> Result<Report, KamadoError> {
    let s = Instant::now();
    info!("building {} into {}", config.source, config.output);

    let report = blueprint(Mode::Build).run(&Context::new(config))?;

    info!(
        "{} {} files {}",
        style("built").green(),
        report.written().count(),
        as_overhead(s)
    );

    Ok(report)
}

/// Builds the output tree, then serves it and rebuilds on changes. Only
/// returns on error.
pub fn develop(config: Config) -> Result<(), KamadoError> {
    let (_session, watcher) = serve(config)?;
    watcher.run()?;

    Ok(())
}

/// The first half of [`develop`]: the initial build, then the dev server.
/// Nothing is served before the whole output tree has been generated, and a
/// failed build starts nothing at all.
pub fn serve(config: Config) -> Result<(Arc<Session>, Watcher), KamadoError> {
    let s = Instant::now();
    info!("running initial build...");

    let report = blueprint(Mode::Watch).run(&Context::new(&config))?;
    info!("built {} files {}", report.written().count(), as_overhead(s));

    let server = DevServer::new(config.server.clone(), config.output.clone());
    let session = server.start()?;

    let watcher = Watcher::new(config, session.reload.clone())?;
    Ok((session, watcher))
}
