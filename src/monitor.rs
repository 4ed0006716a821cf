//! Filesystem monitors for kneeboard textures and the briefings folder.
//!
//! An [`AssetMonitor`] registers a set of paths with the platform watcher
//! (`notify`) and reports each changed path once per quiet period on an
//! `mpsc` channel as an [`AssetChange`].
//!
//! ## Event flow
//!
//! ```text
//! notify thread ──raw events──▶ debounce task ──AssetChange──▶ controller
//! ```
//!
//! Watchers fire several times for one logical write (truncate, write,
//! close). The debounce task keeps a deadline per path and only emits after
//! `debounce` has passed without a new event for it. An event on a file
//! inside a watched directory is reported as the directory.
//!
//! The watched set is checked again when a change is emitted, so a path
//! removed by [`AssetMonitor::restart`] never produces a notification, even
//! if its events were still waiting out the debounce.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::WatchError;

/// Which monitor produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    Kneeboard,
    Briefing,
}

/// A watched path changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetChange {
    pub kind: WatchKind,
    /// The watched path (file, or directory for events on its entries).
    pub path: PathBuf,
}

type WatchedSet = Arc<Mutex<BTreeSet<PathBuf>>>;

/// Watches a fixed set of paths and reports changes per path.
pub struct AssetMonitor {
    kind: WatchKind,
    watcher: RecommendedWatcher,
    watched: WatchedSet,
    task: JoinHandle<()>,
}

impl AssetMonitor {
    /// Start watching `paths`. Must be called inside a tokio runtime.
    ///
    /// Paths that cannot be registered are logged and skipped; the call only
    /// fails if none of them could be.
    pub fn start(
        kind: WatchKind,
        paths: &[PathBuf],
        debounce: Duration,
        changes: mpsc::UnboundedSender<AssetChange>,
    ) -> Result<Self, WatchError> {
        if paths.is_empty() {
            return Err(WatchError::Empty);
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )?;

        let wanted: BTreeSet<PathBuf> = paths.iter().cloned().collect();
        let registered = wanted
            .iter()
            .filter(|p| register(&mut watcher, kind, p))
            .count();
        if registered == 0 {
            return Err(WatchError::NothingWatched {
                count: wanted.len(),
                first: paths[0].clone(),
            });
        }
        debug!("{kind:?} monitor watching {registered}/{} path(s)", wanted.len());

        let watched = Arc::new(Mutex::new(wanted));
        let task = tokio::spawn(debounce_loop(
            kind,
            raw_rx,
            Arc::clone(&watched),
            debounce,
            changes,
        ));

        Ok(Self {
            kind,
            watcher,
            watched,
            task,
        })
    }

    /// Currently watched paths, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        lock(&self.watched).iter().cloned().collect()
    }

    /// Replace the watched set, or re-register the current one when
    /// `new_paths` is `None`.
    ///
    /// Paths present in both the old and the new set stay registered
    /// throughout, so their events are not lost. Fails only if no path of
    /// the resulting set could be registered.
    pub fn restart(&mut self, new_paths: Option<&[PathBuf]>) -> Result<(), WatchError> {
        let mut watched = lock(&self.watched);
        let registered = match new_paths {
            Some(paths) => {
                let new: BTreeSet<PathBuf> = paths.iter().cloned().collect();
                for old in watched.difference(&new) {
                    let _ = self.watcher.unwatch(old);
                }
                let mut registered = watched.intersection(&new).count();
                for added in new.difference(&watched) {
                    if register(&mut self.watcher, self.kind, added) {
                        registered += 1;
                    }
                }
                *watched = new;
                registered
            }
            None => {
                // Watching a watched path refreshes it in place. Some backends
                // drop a watch once its file is replaced, so retry from scratch.
                watched
                    .iter()
                    .filter(|p| {
                        self.watcher.watch(p, RecursiveMode::NonRecursive).is_ok() || {
                            let _ = self.watcher.unwatch(p);
                            register(&mut self.watcher, self.kind, p)
                        }
                    })
                    .count()
            }
        };

        match watched.iter().next() {
            None => Err(WatchError::Empty),
            Some(first) if registered == 0 => Err(WatchError::NothingWatched {
                count: watched.len(),
                first: first.clone(),
            }),
            Some(_) => Ok(()),
        }
    }
}

impl Drop for AssetMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(set: &WatchedSet) -> MutexGuard<'_, BTreeSet<PathBuf>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

fn register(watcher: &mut RecommendedWatcher, kind: WatchKind, path: &Path) -> bool {
    match watcher.watch(path, RecursiveMode::NonRecursive) {
        Ok(()) => true,
        Err(e) => {
            warn!("{kind:?} monitor cannot watch {}: {e}", path.display());
            false
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) | EventKind::Remove(_) => false,
        _ => true,
    }
}

/// The watched entry an event path belongs to: itself, or its parent folder.
fn attribute(watched: &BTreeSet<PathBuf>, path: &Path) -> Option<PathBuf> {
    if watched.contains(path) {
        return Some(path.to_path_buf());
    }
    path.parent()
        .filter(|parent| watched.contains(*parent))
        .map(Path::to_path_buf)
}

async fn debounce_loop(
    kind: WatchKind,
    mut raw: mpsc::UnboundedReceiver<notify::Result<Event>>,
    watched: WatchedSet,
    debounce: Duration,
    changes: mpsc::UnboundedSender<AssetChange>,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let next_due = pending.values().min().copied();
        tokio::select! {
            received = raw.recv() => match received {
                Some(Ok(event)) => {
                    if !is_relevant(&event.kind) {
                        continue;
                    }
                    let set = lock(&watched);
                    for path in &event.paths {
                        if let Some(entry) = attribute(&set, path) {
                            pending.insert(entry, Instant::now() + debounce);
                        }
                    }
                }
                Some(Err(e)) => warn!("{kind:?} monitor error: {e}"),
                None => break,
            },
            () = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    pending.remove(&path);
                    if !lock(&watched).contains(&path) {
                        continue;
                    }
                    debug!("{kind:?} change: {}", path.display());
                    if changes.send(AssetChange { kind, path }).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const DEBOUNCE: Duration = Duration::from_millis(50);
    const QUIET: Duration = Duration::from_millis(600);

    fn touch_all(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| {
                let p = dir.join(n);
                std::fs::write(&p, b"0").unwrap();
                p
            })
            .collect()
    }

    fn root(temp: &TempDir) -> PathBuf {
        temp.path().canonicalize().unwrap()
    }

    #[tokio::test]
    async fn test_write_reports_once() {
        let temp = TempDir::new().unwrap();
        let paths = touch_all(&root(&temp), &["7982.dds", "7983.dds"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _monitor = AssetMonitor::start(WatchKind::Kneeboard, &paths, DEBOUNCE, tx).unwrap();

        std::fs::write(&paths[1], b"new texture").unwrap();

        let change = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change.kind, WatchKind::Kneeboard);
        assert_eq!(change.path, paths[1]);
        assert!(timeout(QUIET, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_restart_moves_watch() {
        let temp = TempDir::new().unwrap();
        let paths = touch_all(&root(&temp), &["a.dds", "b.dds", "c.dds"]);
        let (a, b, c) = (paths[0].clone(), paths[1].clone(), paths[2].clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor =
            AssetMonitor::start(WatchKind::Kneeboard, &[a.clone(), b.clone()], DEBOUNCE, tx)
                .unwrap();

        monitor.restart(Some(&[b.clone(), c.clone()])).unwrap();
        assert_eq!(monitor.watched_paths(), vec![b.clone(), c.clone()]);

        std::fs::write(&c, b"1").unwrap();
        let change = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change.path, c);
        assert!(timeout(QUIET, rx.recv()).await.is_err());

        std::fs::write(&a, b"1").unwrap();
        assert!(timeout(QUIET, rx.recv()).await.is_err());

        std::fs::write(&b, b"1").unwrap();
        let change = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change.path, b);
        assert!(timeout(QUIET, rx.recv()).await.is_err());

        monitor.restart(None).unwrap();
        std::fs::write(&b, b"2").unwrap();
        let change = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change.path, b);
        assert!(timeout(QUIET, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_rearm_keeps_set() {
        let temp = TempDir::new().unwrap();
        let paths = touch_all(&root(&temp), &["7990.dds"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = AssetMonitor::start(WatchKind::Kneeboard, &paths, DEBOUNCE, tx).unwrap();

        monitor.restart(None).unwrap();
        assert_eq!(monitor.watched_paths(), paths);

        std::fs::write(&paths[0], b"2").unwrap();
        let change = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change.path, paths[0]);
    }

    #[tokio::test]
    async fn test_write_during_rearm_is_reported() {
        let temp = TempDir::new().unwrap();
        let paths = touch_all(&root(&temp), &["7982.dds"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = AssetMonitor::start(WatchKind::Kneeboard, &paths, DEBOUNCE, tx).unwrap();

        std::fs::write(&paths[0], b"3").unwrap();
        monitor.restart(None).unwrap();

        let change = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change.path, paths[0]);
        assert!(timeout(QUIET, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_directory_events_attributed_to_directory() {
        let temp = TempDir::new().unwrap();
        let dir = root(&temp).join("Briefings");
        std::fs::create_dir_all(&dir).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _monitor =
            AssetMonitor::start(WatchKind::Briefing, &[dir.clone()], DEBOUNCE, tx).unwrap();

        std::fs::write(dir.join("briefing.html"), b"<html>").unwrap();

        let change = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change, AssetChange {
            kind: WatchKind::Briefing,
            path: dir
        });
    }

    #[tokio::test]
    async fn test_start_fails_when_nothing_registers() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let missing = vec![temp.path().join("gone.dds")];
        assert!(matches!(
            AssetMonitor::start(WatchKind::Kneeboard, &missing, DEBOUNCE, tx.clone()),
            Err(WatchError::NothingWatched { count: 1, .. })
        ));
        assert!(matches!(
            AssetMonitor::start(WatchKind::Kneeboard, &[], DEBOUNCE, tx),
            Err(WatchError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_partial_registration_succeeds() {
        let temp = TempDir::new().unwrap();
        let mut paths = touch_all(&root(&temp), &["7982.dds"]);
        paths.push(root(&temp).join("7983.dds"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let monitor = AssetMonitor::start(WatchKind::Kneeboard, &paths, DEBOUNCE, tx).unwrap();
        assert_eq!(monitor.watched_paths().len(), 2);
    }

    #[test]
    fn test_attribute() {
        let set: BTreeSet<PathBuf> = [PathBuf::from("/kb/7982.dds"), PathBuf::from("/brief")]
            .into_iter()
            .collect();
        assert_eq!(
            attribute(&set, Path::new("/kb/7982.dds")),
            Some(PathBuf::from("/kb/7982.dds"))
        );
        assert_eq!(
            attribute(&set, Path::new("/brief/briefing.html")),
            Some(PathBuf::from("/brief"))
        );
        assert_eq!(attribute(&set, Path::new("/kb/7983.dds")), None);
    }
}
