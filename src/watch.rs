//! Rebuilds on file changes.
//!
//! Which builder reacts to which change is plain data, a [`WatchTable`] of
//! glob patterns. The [`Watcher`] runs the matching builders for any batch of
//! changed paths, whether they come from `notify` or from a test.
//!
//! There's no debouncing, an editor saving a file twice in quick succession
//! triggers two rebuilds.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, channel};
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecursiveMode, Watcher as _};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::WatchError;
use crate::graph::{Context, Task};
use crate::io::{MATCH_OPTIONS, as_overhead};
use crate::live::LiveReload;
use crate::tasks::{Markup, Scripts, Styles};

/// A rebuild triggered by a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Recompile the stylesheet, clients swap it in place.
    Styles,
    /// Rebuild the script bundle, clients reload.
    Scripts,
    /// Minify the markup again, clients reload.
    Markup,
}

impl Action {
    fn task(self) -> &'static dyn Task {
        match self {
            Action::Styles => &Styles,
            Action::Scripts => &Scripts,
            Action::Markup => &Markup,
        }
    }
}

/// Ordered `pattern → action` rules.
#[derive(Debug, Default)]
pub struct WatchTable {
    rules: Vec<(Pattern, Action)>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule. The glob is matched against whole paths, `*` never
    /// crosses a directory boundary.
    pub fn rule(mut self, glob: &str, action: Action) -> Result<Self, glob::PatternError> {
        self.rules.push((Pattern::new(glob)?, action));
        Ok(self)
    }

    /// The rules of the dev flow, rooted at `source`.
    pub fn from_config(config: &Config, source: &Utf8Path) -> Result<Self, glob::PatternError> {
        let root = Pattern::escape(source.as_str());
        let glob = |suffix: &str| format!("{root}/{suffix}");

        Self::new()
            .rule(&glob(&config.styles.watch), Action::Styles)?
            .rule(&glob(&config.scripts.watch), Action::Scripts)?
            .rule(&glob(&config.markup.watch), Action::Markup)
    }

    /// Actions triggered by a change to `path`, in rule order.
    pub fn actions_for(&self, path: &Utf8Path) -> Vec<Action> {
        let mut actions = Vec::new();

        for (pattern, action) in &self.rules {
            if pattern.matches_with(path.as_str(), MATCH_OPTIONS) && !actions.contains(action) {
                actions.push(*action);
            }
        }

        actions
    }

    /// Directories which have to be watched recursively to observe every
    /// rule.
    pub fn roots(&self) -> Vec<Utf8PathBuf> {
        let roots = self
            .rules
            .iter()
            .map(|(pattern, _)| static_root(Utf8Path::new(pattern.as_str())))
            .collect();

        collapse_watch_paths(roots)
    }
}

/// The leading components of a glob which contain no wildcards.
fn static_root(glob: &Utf8Path) -> Utf8PathBuf {
    let root: Utf8PathBuf = glob
        .components()
        .take_while(|c| !c.as_str().contains(['*', '?', '[']))
        .collect();

    if root.as_str().is_empty() {
        Utf8PathBuf::from(".")
    } else {
        root
    }
}

/// `path` made absolute against `cwd`, with `.` and `..` resolved lexically.
fn absolute(path: &Utf8Path, cwd: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();

    for component in cwd.join(path).components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                out.pop();
            }
            component => out.push(component),
        }
    }

    out
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because the
/// watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

/// Runs the builders matching each change and notifies the clients.
///
/// Rules are rooted at the canonical source directory and every changed path
/// is resolved the same way before matching, so `./source`, `source` and an
/// absolute path all watch the same tree.
pub struct Watcher {
    config: Config,
    table: WatchTable,
    reload: Arc<LiveReload>,
    cwd: Utf8PathBuf,
}

impl Watcher {
    pub fn new(config: Config, reload: Arc<LiveReload>) -> Result<Self, WatchError> {
        let cwd = std::env::current_dir()?.canonicalize()?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| std::io::Error::other("working directory isn't valid UTF-8"))?;

        let source = absolute(&config.source, &cwd);
        let source = source.canonicalize_utf8().unwrap_or(source);
        let table = WatchTable::from_config(&config, &source)?;

        Ok(Self {
            config,
            table,
            reload,
            cwd,
        })
    }

    /// Absolute form of a changed path. The parent directory is canonicalised
    /// when it still exists, the file itself may already be gone.
    fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        let path = absolute(path, &self.cwd);

        let canonical = match (path.parent(), path.file_name()) {
            (Some(dir), Some(name)) => dir.canonicalize_utf8().ok().map(|dir| dir.join(name)),
            _ => None,
        };

        canonical.unwrap_or(path)
    }

    /// Actions triggered by a batch of changed paths, each at most once.
    pub fn actions(&self, paths: &[Utf8PathBuf]) -> Vec<Action> {
        let mut actions = Vec::new();

        for path in paths {
            for action in self.table.actions_for(&self.resolve(path)) {
                if !actions.contains(&action) {
                    actions.push(action);
                }
            }
        }

        actions
    }

    /// Handles one batch of changed paths. Every matching action runs once,
    /// a failing action is logged and never stops the others.
    pub fn handle(&self, paths: &[Utf8PathBuf]) -> Vec<(Action, anyhow::Result<()>)> {
        self.actions(paths)
            .into_iter()
            .map(|action| (action, self.apply(action)))
            .collect()
    }

    fn apply(&self, action: Action) -> anyhow::Result<()> {
        let s = Instant::now();
        let ctx = Context::with_reload(&self.config, &self.reload);
        let task = action.task();

        if let Err(e) = task.run(&ctx) {
            error!("{} failed:\n{e:#}", task.name());
            return Err(e);
        }

        // the stylesheet and script builders notify the clients on their own
        if action == Action::Markup {
            self.reload.reload_all();
        }

        info!("rebuilt {} {}", task.name(), as_overhead(s));
        Ok(())
    }

    /// Watches the source tree until the process is interrupted.
    pub fn run(&self) -> Result<(), WatchError> {
        let (tx, rx) = channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(tx)?;

        for root in self.table.roots() {
            if !root.exists() {
                warn!("not watching {root}, it doesn't exist");
                continue;
            }

            info!("watching {root}");
            watcher.watch(root.as_std_path(), RecursiveMode::Recursive)?;
        }

        self.listen(rx);
        Ok(())
    }

    /// Handles events until every sender is gone. Returns the number of
    /// batches which triggered at least one action.
    pub fn listen(&self, events: Receiver<notify::Result<notify::Event>>) -> usize {
        let mut handled = 0;

        for event in events {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    error!("watch error: {e}");
                    continue;
                }
            };

            if matches!(event.kind, EventKind::Access(_)) {
                continue;
            }

            let paths: Vec<_> = event
                .paths
                .iter()
                .filter_map(|path| Utf8Path::from_path(path))
                .map(Utf8Path::to_path_buf)
                .collect();

            if !self.handle(&paths).is_empty() {
                handled += 1;
            }
        }

        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::live::{Message, Transport};

    fn table() -> WatchTable {
        WatchTable::from_config(&Config::default(), Utf8Path::new("source")).unwrap()
    }

    #[test]
    fn test_stylesheet_change() {
        let table = table();

        assert_eq!(
            table.actions_for(Utf8Path::new("source/sass/style.scss")),
            vec![Action::Styles]
        );
        assert_eq!(
            table.actions_for(Utf8Path::new("source/sass/blocks/header.scss")),
            vec![Action::Styles]
        );
    }

    #[test]
    fn test_script_change_anywhere() {
        let table = table();

        assert_eq!(
            table.actions_for(Utf8Path::new("source/js/app.js")),
            vec![Action::Scripts]
        );
        assert_eq!(
            table.actions_for(Utf8Path::new("source/js/vendor/lib.js")),
            vec![Action::Scripts]
        );
    }

    #[test]
    fn test_markup_top_level_only() {
        let table = table();

        assert_eq!(
            table.actions_for(Utf8Path::new("source/index.html")),
            vec![Action::Markup]
        );
        assert!(
            table
                .actions_for(Utf8Path::new("source/partials/nav.html"))
                .is_empty()
        );
    }

    #[test]
    fn test_unrelated_change() {
        let table = table();

        assert!(table.actions_for(Utf8Path::new("source/img/a.png")).is_empty());
        assert!(table.actions_for(Utf8Path::new("build/js/script.min.js")).is_empty());
    }

    #[test]
    fn test_overlapping_rules_dedup() {
        let table = WatchTable::new()
            .rule("src/*.js", Action::Scripts)
            .unwrap()
            .rule("src/**/*.js", Action::Scripts)
            .unwrap()
            .rule("src/**/*", Action::Markup)
            .unwrap();

        assert_eq!(
            table.actions_for(Utf8Path::new("src/a.js")),
            vec![Action::Scripts, Action::Markup]
        );
    }

    #[test]
    fn test_roots_are_collapsed() {
        assert_eq!(table().roots(), vec![Utf8PathBuf::from("source")]);
    }

    #[test]
    fn test_static_root() {
        assert_eq!(static_root(Utf8Path::new("a/b/**/*.scss")), "a/b");
        assert_eq!(static_root(Utf8Path::new("*.html")), ".");
        assert_eq!(static_root(Utf8Path::new("a/[bc]/d")), "a");
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        assert_eq!(
            collapse_watch_paths(paths),
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_absolute() {
        let cwd = Utf8Path::new("/work");

        assert_eq!(absolute(Utf8Path::new("source"), cwd), "/work/source");
        assert_eq!(absolute(Utf8Path::new("./source/./a.js"), cwd), "/work/source/a.js");
        assert_eq!(absolute(Utf8Path::new("x/../source"), cwd), "/work/source");
        assert_eq!(absolute(Utf8Path::new("/srv/site"), cwd), "/srv/site");
    }

    struct Silent;

    impl Transport for Silent {
        fn broadcast(&self, _: &Message) {}
    }

    fn watcher(source: impl Into<Utf8PathBuf>) -> Watcher {
        let config = Config {
            source: source.into(),
            ..Config::default()
        };

        Watcher::new(config, Arc::new(LiveReload::new(Silent))).unwrap()
    }

    #[test]
    fn test_source_spellings_match_the_same_paths() {
        let cwd = std::env::current_dir().unwrap().canonicalize().unwrap();
        let cwd = Utf8PathBuf::from_path_buf(cwd).unwrap();

        for source in [
            Utf8PathBuf::from("site-src"),
            Utf8PathBuf::from("./site-src"),
            Utf8PathBuf::from("nested/../site-src"),
            cwd.join("site-src"),
        ] {
            let watcher = watcher(source.clone());

            for changed in [
                cwd.join("site-src/index.html"),
                Utf8PathBuf::from("site-src/index.html"),
                Utf8PathBuf::from("./site-src/index.html"),
            ] {
                assert_eq!(
                    watcher.actions(&[changed.clone()]),
                    vec![Action::Markup],
                    "source {source}, changed {changed}"
                );
            }

            assert!(watcher.actions(&[cwd.join("index.html")]).is_empty());
        }
    }

    #[test]
    fn test_watch_roots_are_absolute() {
        for root in watcher("./site-src").table.roots() {
            assert!(root.is_absolute(), "{root}");
        }
    }

    #[test]
    fn test_listen_until_senders_are_gone() {
        let cwd = std::env::current_dir().unwrap();
        let watcher = watcher("site-src");
        let (tx, rx) = channel();

        let unrelated = notify::Event::new(EventKind::Any).add_path(cwd.join("README.md"));
        let access = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(cwd.join("site-src/js/a.js"));

        tx.send(Ok(unrelated)).unwrap();
        tx.send(Ok(access)).unwrap();
        tx.send(Err(notify::Error::generic("lost"))).unwrap();
        drop(tx);

        assert_eq!(watcher.listen(rx), 0);
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapse_watch_paths(paths),
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }
}
