use std::fs;

use camino::Utf8PathBuf;
use tracing::warn;

use crate::graph::{Context, Task};
use crate::tasks::pipe;

/// Minifies every script into a single bundle.
///
/// Sources are joined in sorted order with no module resolution, so they must
/// not depend on each other's evaluation order.
pub struct Scripts;

impl Task for Scripts {
    fn name(&self) -> &str {
        "scripts"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let config = ctx.config;
        let base = config.source.join(&config.scripts.base);
        let files = crate::io::select(&base, &config.scripts.include, &[])?;

        if files.is_empty() {
            warn!("no scripts found under {base}");
            return Ok(vec![]);
        }

        let mut joined = Vec::new();
        for file in &files {
            joined.extend(fs::read(base.join(file))?);
            joined.push(b'\n');
        }

        let bundle = pipe(&config.scripts.command, &joined)?;
        let path = config.output.join(&config.scripts.output);
        crate::io::write(&path, bundle)?;

        if let Some(reload) = ctx.reload {
            reload.reload_all();
        }

        Ok(vec![path])
    }
}
