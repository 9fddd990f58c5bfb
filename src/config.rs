//! Source layout and tunables of the pipeline.
//!
//! Every field has a default reproducing the conventional layout:
//!
//! ```text
//! source/                      build/
//! ├── *.html              ──►  ├── *.html
//! ├── *.ico               ──►  ├── *.ico
//! ├── fonts/*.woff2       ──►  ├── fonts/
//! ├── sass/style.scss     ──►  ├── css/style.min.css (+ .map)
//! ├── js/*.js             ──►  ├── js/script.min.js
//! └── img/                ──►  └── img/ (+ *.webp, sprite.svg)
//!     └── icons/*.svg
//! ```
//!
//! A `kamado.toml` file may override any subset of it.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the optional configuration file looked up by the binary.
pub const CONFIG_FILE: &str = "kamado.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the source tree. Never written to.
    pub source: Utf8PathBuf,
    /// Root of the output tree. Deleted and regenerated on every run.
    pub output: Utf8PathBuf,
    pub styles: StylesConfig,
    pub markup: MarkupConfig,
    pub scripts: ScriptsConfig,
    pub images: ImagesConfig,
    pub webp: WebpConfig,
    pub sprite: SpriteConfig,
    pub copy: CopyConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: "source".into(),
            output: "build".into(),
            styles: StylesConfig::default(),
            markup: MarkupConfig::default(),
            scripts: ScriptsConfig::default(),
            images: ImagesConfig::default(),
            webp: WebpConfig::default(),
            sprite: SpriteConfig::default(),
            copy: CopyConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file, falling back to the defaults
    /// when the file does not exist.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Places both trees under `root`, keeping their relative names.
    pub fn rooted(mut self, root: impl AsRef<Utf8Path>) -> Self {
        self.source = root.as_ref().join(&self.source);
        self.output = root.as_ref().join(&self.output);
        self
    }

    /// URL path under which a file of the output tree is served.
    pub fn href(&self, file: &Utf8Path) -> String {
        let relative = file.strip_prefix(&self.output).unwrap_or(file);
        format!("/{}", relative.as_str().trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StylesConfig {
    /// Entry stylesheet, relative to the source root.
    pub entry: Utf8PathBuf,
    /// Glob of every stylesheet reachable from the entry.
    pub watch: String,
    /// Compiled stylesheet, relative to the output root. The source map is
    /// written next to it with a `.map` suffix.
    pub output: Utf8PathBuf,
    /// Oldest browser versions to emit vendor prefixes for.
    pub browsers: Browsers,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            entry: "sass/style.scss".into(),
            watch: "sass/**/*.scss".into(),
            output: "css/style.min.css".into(),
            browsers: Browsers::default(),
        }
    }
}

/// Major browser versions, the oldest of each engine that must be supported.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Browsers {
    pub android: Option<u32>,
    pub chrome: Option<u32>,
    pub edge: Option<u32>,
    pub firefox: Option<u32>,
    pub ios_saf: Option<u32>,
    pub opera: Option<u32>,
    pub safari: Option<u32>,
    pub samsung: Option<u32>,
}

impl Default for Browsers {
    fn default() -> Self {
        Self {
            android: Some(120),
            chrome: Some(109),
            edge: Some(120),
            firefox: Some(115),
            ios_saf: Some(15),
            opera: Some(100),
            safari: Some(15),
            samsung: Some(23),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkupConfig {
    /// Globs relative to the source root. Only top level files are expected.
    pub include: Vec<String>,
    /// Minifier reading markup on stdin and writing it to stdout.
    pub command: Vec<String>,
    /// Glob of files triggering a markup rebuild in watch mode.
    pub watch: String,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            include: vec!["*.html".into()],
            command: vec!["html-minifier-terser".into(), "--remove-comments".into()],
            watch: "*.html".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptsConfig {
    /// Directory of scripts, relative to the source root.
    pub base: Utf8PathBuf,
    pub include: Vec<String>,
    /// Bundle path, relative to the output root.
    pub output: Utf8PathBuf,
    /// Minifier reading a script on stdin and writing it to stdout.
    pub command: Vec<String>,
    /// Glob of files triggering a script rebuild in watch mode.
    pub watch: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            base: "js".into(),
            include: vec!["*.js".into()],
            output: "js/script.min.js".into(),
            command: vec!["esbuild".into(), "--minify".into(), "--loader=js".into()],
            watch: "**/*.js".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Image directory, relative to the source root.
    pub base: Utf8PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Image directory, relative to the output root.
    pub output: Utf8PathBuf,
    /// JPEG re-encoding quality (1-100).
    pub jpeg_quality: u8,
    /// PNG optimisation level (0-7).
    pub png_level: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            base: "img".into(),
            include: vec!["**/*.png".into(), "**/*.jpg".into(), "**/*.svg".into()],
            exclude: vec!["icons/*.svg".into()],
            output: "img".into(),
            jpeg_quality: 75,
            png_level: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebpConfig {
    pub base: Utf8PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub output: Utf8PathBuf,
    /// Lossy encoding quality (0-100).
    pub quality: f32,
}

impl Default for WebpConfig {
    fn default() -> Self {
        Self {
            base: "img".into(),
            include: vec!["**/*.png".into(), "**/*.jpg".into()],
            exclude: vec![],
            output: "img".into(),
            quality: 90.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpriteConfig {
    /// Directory of icons, relative to the source root.
    pub base: Utf8PathBuf,
    pub include: Vec<String>,
    /// Sprite document, relative to the output root.
    pub output: Utf8PathBuf,
}

impl Default for SpriteConfig {
    fn default() -> Self {
        Self {
            base: "img/icons".into(),
            include: vec!["*.svg".into()],
            output: "img/sprite.svg".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CopyConfig {
    /// Globs relative to the source root. Matches keep their relative path.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            include: vec![
                "fonts/*.woff2".into(),
                "fonts/*.woff".into(),
                "*.ico".into(),
                "img/*.ico".into(),
                "img/**/*.svg".into(),
            ],
            // icons only ever reach the output through the sprite
            exclude: vec!["img/icons/*.svg".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    /// HTTP port serving the output tree.
    pub port: u16,
    /// Preferred websocket port for live reload, an ephemeral one is used
    /// when it is taken.
    pub reload_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            reload_port: 3001,
        }
    }
}
