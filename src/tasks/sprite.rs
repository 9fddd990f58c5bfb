use std::collections::BTreeMap;
use std::fs;

use camino::Utf8PathBuf;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::error::SelectError;
use crate::graph::{Context, Task};

const SVG_NS: &str = "http://www.w3.org/2000/svg";

/// Root attributes which make no sense on a `<symbol>`.
const DROPPED: &[&[u8]] = &[b"width", b"height", b"version", b"id", b"x", b"y"];

#[derive(Debug, Error)]
pub enum SpriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed SVG: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed SVG attribute: {0}")]
    Attr(#[from] AttrError),

    #[error("Icon '{0}' has no <svg> root element")]
    NotSvg(String),

    #[error(transparent)]
    Select(#[from] SelectError),
}

/// Combines every icon into one sprite document. Each icon becomes a
/// `<symbol>` whose id is the icon's file stem.
pub struct Sprite;

impl Task for Sprite {
    fn name(&self) -> &str {
        "sprite"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let config = &ctx.config.sprite;
        let base = ctx.config.source.join(&config.base);

        let mut icons = Vec::new();
        for relative in crate::io::select(&base, &config.include, &[])? {
            let id = relative.file_stem().unwrap_or(relative.as_str()).to_string();
            let svg = fs::read_to_string(base.join(&relative))?;
            icons.push((id, svg));
        }

        let sprite = assemble(&icons).map_err(|e| anyhow::anyhow!("{base}: {e}"))?;
        let path = ctx.config.output.join(&config.output);
        crate::io::write(&path, sprite)?;

        Ok(vec![path])
    }
}

/// Builds a sprite out of `(id, svg)` pairs, keeping their order.
pub fn assemble(icons: &[(String, String)]) -> Result<String, SpriteError> {
    let mut hoisted = BTreeMap::new();
    let mut body = Writer::new(Vec::new());

    for (id, svg) in icons {
        symbol(id, svg, &mut body, &mut hoisted)?;
    }

    let mut root = BytesStart::new("svg");
    root.push_attribute(("xmlns", SVG_NS));
    for (key, value) in &hoisted {
        root.push_attribute((key.as_str(), value.as_str()));
    }

    let mut out = Writer::new(Vec::new());
    out.write_event(Event::Start(root))?;
    out.get_mut().extend(body.into_inner());
    out.write_event(Event::End(BytesEnd::new("svg")))?;

    Ok(String::from_utf8_lossy(&out.into_inner()).into_owned())
}

fn symbol(
    id: &str,
    svg: &str,
    out: &mut Writer<Vec<u8>>,
    hoisted: &mut BTreeMap<String, String>,
) -> Result<(), SpriteError> {
    let mut reader = Reader::from_str(svg);
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut found = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if depth == 0 => {
                let start = open_symbol(id, &e, hoisted)?;
                out.write_event(Event::Start(start))?;
                found = true;
                depth += 1;
            }
            Event::Empty(e) if depth == 0 => {
                let start = open_symbol(id, &e, hoisted)?;
                out.write_event(Event::Empty(start))?;
                found = true;
            }
            Event::End(_) if depth == 1 => {
                out.write_event(Event::End(BytesEnd::new("symbol")))?;
                depth -= 1;
            }
            Event::Start(e) => {
                out.write_event(Event::Start(e))?;
                depth += 1;
            }
            Event::End(e) => {
                out.write_event(Event::End(e))?;
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            Event::Decl(_) | Event::DocType(_) | Event::PI(_) | Event::Comment(_) => {}
            // text outside the root element is dropped
            _ if depth == 0 => {}
            event => out.write_event(event)?,
        }
    }

    if !found {
        return Err(SpriteError::NotSvg(id.to_string()));
    }

    Ok(())
}

fn open_symbol(
    id: &str,
    root: &BytesStart,
    hoisted: &mut BTreeMap<String, String>,
) -> Result<BytesStart<'static>, SpriteError> {
    if root.local_name().as_ref() != b"svg" {
        return Err(SpriteError::NotSvg(id.to_string()));
    }

    let mut symbol = BytesStart::new("symbol");
    symbol.push_attribute(("id", id));

    for attr in root.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();

        if key == b"xmlns" {
            continue;
        }

        if key.starts_with(b"xmlns:") {
            let key = String::from_utf8_lossy(key).into_owned();
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            hoisted.entry(key).or_insert(value);
            continue;
        }

        if DROPPED.contains(&key) {
            continue;
        }

        symbol.push_attribute(attr);
    }

    Ok(symbol.into_owned())
}
