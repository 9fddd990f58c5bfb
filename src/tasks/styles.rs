use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use thiserror::Error;

use crate::config;
use crate::graph::{Context, Task};

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// The compiled CSS couldn't be prefixed or minified.
    #[error("CSS error: {0}")]
    Css(String),

    /// The source map couldn't be produced.
    #[error("Source map error: {0}")]
    SourceMap(String),
}

/// A compiled stylesheet together with its source map.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    pub css: String,
    pub map: String,
}

/// Compiles the entry stylesheet to prefixed, minified CSS.
pub struct Styles;

impl Task for Styles {
    fn name(&self) -> &str {
        "styles"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let config = ctx.config;
        let entry = config.source.join(&config.styles.entry);
        let path_css = config.output.join(&config.styles.output);
        let path_map = map_path(&path_css);

        // Nothing is written unless the whole chain succeeds, a broken edit
        // leaves the previous stylesheet in place.
        let sheet = compile(&entry, &path_css, &config.styles.browsers)?;

        crate::io::write(&path_css, &sheet.css)?;
        crate::io::write(&path_map, &sheet.map)?;

        if let Some(reload) = ctx.reload {
            reload.update_css(config.href(&path_css));
        }

        Ok(vec![path_css, path_map])
    }
}

fn map_path(css: &Utf8Path) -> Utf8PathBuf {
    let mut path = css.as_str().to_string();
    path.push_str(".map");
    path.into()
}

/// Compiles `entry` (SCSS) into CSS destined for `output`, adding the vendor
/// prefixes required by `browsers` and minifying the result.
pub fn compile(
    entry: &Utf8Path,
    output: &Utf8Path,
    browsers: &config::Browsers,
) -> Result<Stylesheet, StyleError> {
    let expanded = grass::from_path(entry, &grass::Options::default())?;
    let targets = Targets::from(to_browsers(browsers));
    let source = entry.file_name().unwrap_or(entry.as_str()).to_string();

    let mut sheet = StyleSheet::parse(
        &expanded,
        ParserOptions {
            filename: source.clone(),
            ..Default::default()
        },
    )
    .map_err(|e| StyleError::Css(e.to_string()))?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..Default::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    let mut map = SourceMap::new("/");
    let index = map.add_source(&source);
    map.set_source_content(index as usize, &expanded)
        .map_err(|e| StyleError::SourceMap(e.to_string()))?;

    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            source_map: Some(&mut map),
            targets,
            ..Default::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    let map = map
        .to_json(None)
        .map_err(|e| StyleError::SourceMap(e.to_string()))?;

    let name = map_path(Utf8Path::new(output.file_name().unwrap_or("style.css")));
    let css = format!("{}\n/*# sourceMappingURL={} */\n", printed.code, name);

    Ok(Stylesheet { css, map })
}

/// Browser versions are encoded as `major << 16 | minor << 8 | patch`.
fn to_browsers(browsers: &config::Browsers) -> Browsers {
    let encode = |major: Option<u32>| major.map(|major| major << 16);

    Browsers {
        android: encode(browsers.android),
        chrome: encode(browsers.chrome),
        edge: encode(browsers.edge),
        firefox: encode(browsers.firefox),
        ie: None,
        ios_saf: encode(browsers.ios_saf),
        opera: encode(browsers.opera),
        safari: encode(browsers.safari),
        samsung: encode(browsers.samsung),
    }
}
