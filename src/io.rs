use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use glob::{MatchOptions, Pattern, glob_with};
use tracing::info;

use crate::error::{CleanError, CopyError, SelectError};

const ANSI_BLUE: Style = Style::new().blue();

/// `*` and `?` never cross a directory boundary, `**` does.
pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete the entire output directory if it exists.
pub fn clean(output: &Utf8Path) -> Result<(), CleanError> {
    let s = Instant::now();

    if fs::metadata(output).is_ok() {
        fs::remove_dir_all(output)?;
    }

    info!("cleaned {} {}", output, as_overhead(s));

    Ok(())
}

/// Lists the files under `base` matching any of `include` and none of
/// `exclude`. Returned paths are relative to `base`, sorted and unique.
///
/// A base directory that doesn't exist simply yields no files.
pub fn select(
    base: &Utf8Path,
    include: &[String],
    exclude: &[String],
) -> Result<Vec<Utf8PathBuf>, SelectError> {
    let exclude = exclude
        .iter()
        .map(|glob| Pattern::new(glob))
        .collect::<Result<Vec<_>, _>>()?;

    let root = Pattern::escape(base.as_str());
    let mut found = BTreeSet::new();

    for glob in include {
        let pattern = Utf8Path::new(&root).join(glob);

        for path in glob_with(pattern.as_str(), MATCH_OPTIONS)? {
            let path = Utf8PathBuf::try_from(path?)?;

            if !path.is_file() {
                continue;
            }

            let relative = match path.strip_prefix(base) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };

            if exclude
                .iter()
                .any(|p| p.matches_with(relative.as_str(), MATCH_OPTIONS))
            {
                continue;
            }

            found.insert(relative);
        }
    }

    Ok(found.into_iter().collect())
}

/// Copies the selected files verbatim from `base` to `dest`, preserving their
/// path relative to `base`. Returns the written paths.
pub fn copy(
    base: &Utf8Path,
    dest: &Utf8Path,
    include: &[String],
    exclude: &[String],
) -> Result<Vec<Utf8PathBuf>, CopyError> {
    let mut written = Vec::new();

    for relative in select(base, include, exclude)? {
        let target = dest.join(&relative);

        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::copy(base.join(&relative), &target)?;
        written.push(target);
    }

    Ok(written)
}

/// Writes a file, creating its parent directories first.
pub fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Utf8Path, path: &str) {
        write(&root.join(path), path).unwrap();
    }

    fn tree() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        for path in [
            "index.html",
            "about.html",
            "nested/deep.html",
            "favicon.ico",
            "img/logo.svg",
            "img/bg/hero.svg",
            "img/icons/cart.svg",
            "fonts/sans.woff2",
            "fonts/sans.woff",
            "fonts/sans.ttf",
        ] {
            touch(&root, path);
        }

        (dir, root)
    }

    #[test]
    fn test_select_top_level_only() {
        let (_dir, root) = tree();

        let found = select(&root, &["*.html".into()], &[]).unwrap();

        assert_eq!(found, vec!["about.html", "index.html"]);
    }

    #[test]
    fn test_select_exclude() {
        let (_dir, root) = tree();

        let found = select(&root, &["img/**/*.svg".into()], &["img/icons/*.svg".into()]).unwrap();

        assert_eq!(found, vec!["img/bg/hero.svg", "img/logo.svg"]);
    }

    #[test]
    fn test_select_dedup_and_sort() {
        let (_dir, root) = tree();

        let found = select(
            &root,
            &["fonts/*.woff2".into(), "fonts/*".into(), "fonts/*.woff".into()],
            &[],
        )
        .unwrap();

        assert_eq!(
            found,
            vec!["fonts/sans.ttf", "fonts/sans.woff", "fonts/sans.woff2"]
        );
    }

    #[test]
    fn test_select_missing_base() {
        let (_dir, root) = tree();

        let found = select(&root.join("nope"), &["*.js".into()], &[]).unwrap();

        assert!(found.is_empty());
    }

    #[test]
    fn test_clean_then_copy_into_missing_output() {
        let (_dir, root) = tree();
        let output = root.join("build");

        clean(&output).unwrap();
        clean(&output).unwrap();

        let written = copy(&root, &output, &["img/**/*.svg".into()], &["img/icons/*.svg".into()])
            .unwrap();

        assert_eq!(written.len(), 2);
        assert!(output.join("img/bg/hero.svg").is_file());
        assert!(!output.join("img/icons").exists());

        clean(&output).unwrap();
        assert!(!output.exists());
    }
}
