use std::fs;

use camino::Utf8PathBuf;
use rayon::prelude::*;

use crate::graph::{Context, Task};
use crate::tasks::pipe;

/// Minifies every top level markup file into the output root, keeping file
/// names. Whitespace is left alone, the minifier only drops comments.
pub struct Markup;

impl Task for Markup {
    fn name(&self) -> &str {
        "markup"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let config = ctx.config;
        let files = crate::io::select(&config.source, &config.markup.include, &[])?;

        files
            .par_iter()
            .map(|relative| -> anyhow::Result<Utf8PathBuf> {
                let source = config.source.join(relative);
                let target = config.output.join(relative);

                let html = fs::read(&source)?;
                let html = pipe(&config.markup.command, &html)
                    .map_err(|e| anyhow::anyhow!("{source}: {e}"))?;

                crate::io::write(&target, html)?;
                Ok(target)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::Config;

    #[test]
    fn test_top_level_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let mut config = Config::default().rooted(&root);
        config.markup.command = vec!["cat".into()];

        crate::io::write(&config.source.join("index.html"), "<p>home</p>").unwrap();
        crate::io::write(&config.source.join("about.html"), "<p>about</p>").unwrap();
        crate::io::write(&config.source.join("partials/nav.html"), "<nav/>").unwrap();

        let mut written = Markup.run(&Context::new(&config)).unwrap();
        written.sort();

        assert_eq!(
            written,
            vec![config.output.join("about.html"), config.output.join("index.html")]
        );
        assert_eq!(
            fs::read_to_string(config.output.join("index.html")).unwrap(),
            "<p>home</p>"
        );
        assert!(!config.output.join("partials").exists());
    }

    #[test]
    fn test_minifier_failure_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let mut config = Config::default().rooted(&root);
        config.markup.command = vec!["false".into()];
        crate::io::write(&config.source.join("index.html"), "<p>").unwrap();

        let err = Markup.run(&Context::new(&config)).unwrap_err();

        assert!(err.to_string().contains("index.html"));
        assert!(!config.output.join("index.html").exists());
    }
}
