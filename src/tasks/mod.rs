//! The builders. Each one is a [`Task`] reading a slice of the source tree and
//! writing its own, disjoint slice of the output tree.

mod command;
mod images;
mod markup;
mod scripts;
mod sprite;
mod styles;
mod webp;

use camino::Utf8PathBuf;

use crate::graph::{Context, Task};

pub use command::{CommandError, pipe};
pub use images::{CopyImages, ImageError, OptimizeImages};
pub use markup::Markup;
pub use scripts::Scripts;
pub use sprite::{Sprite, SpriteError, assemble};
pub use styles::{StyleError, Styles, Stylesheet, compile};
pub use webp::Webp;

/// Removes the whole output tree.
pub struct Clean;

impl Task for Clean {
    fn name(&self) -> &str {
        "clean"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        crate::io::clean(&ctx.config.output)?;
        Ok(vec![])
    }
}

/// Copies static assets verbatim: fonts, favicons and vector images.
pub struct CopyAssets;

impl Task for CopyAssets {
    fn name(&self) -> &str {
        "copy"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let config = ctx.config;

        let written = crate::io::copy(
            &config.source,
            &config.output,
            &config.copy.include,
            &config.copy.exclude,
        )?;

        tracing::debug!("copied {} files", written.len());
        Ok(written)
    }
}
