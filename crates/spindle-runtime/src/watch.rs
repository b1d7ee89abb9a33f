//! Source watcher. Reports changes under a route's source directory using
//! the `notify` crate.
//!
//! The root route builds from `src/` itself, which also holds every other
//! route's directory, so it is watched without descending.
//!
//! Editors tend to emit several events per save, so events arriving within
//! the debounce window collapse into one change tick.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Keeps the underlying OS watch alive; dropping it stops the ticks.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl SourceWatcher {
    /// Watch `dir`, descending into subdirectories when `recursive`. Each
    /// receive on the returned channel is one coalesced batch of changes.
    pub fn spawn(dir: &Path, recursive: bool, debounce: Duration) -> Result<(Self, mpsc::Receiver<()>), WatchError> {
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
        let (tick_tx, tick_rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(e) => warn!("File watcher error: {e}"),
        })
        .map_err(|source| WatchError::Watch {
            path: dir.to_path_buf(),
            source,
        })?;

        watcher
            .watch(dir, mode)
            .map_err(|source| WatchError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;

        let label = dir.display().to_string();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if !is_change(&event.kind) {
                    continue;
                }
                // Swallow the rest of the burst.
                loop {
                    match tokio::time::timeout(debounce, event_rx.recv()).await {
                        Ok(Some(_)) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                debug!("Change detected under {label}");
                if tick_tx.send(()).await.is_err() {
                    return;
                }
            }
        });

        Ok((
            Self {
                _watcher: watcher,
                path: dir.to_path_buf(),
            },
            tick_rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn burst_of_writes_yields_a_tick() {
        let dir = TempDir::new().unwrap();
        let (watcher, mut ticks) = SourceWatcher::spawn(dir.path(), true, Duration::from_millis(100)).unwrap();
        assert_eq!(watcher.path(), dir.path());

        for n in 0..3 {
            std::fs::write(dir.path().join("main.go"), format!("package main // {n}")).unwrap();
        }

        let tick = tokio::time::timeout(Duration::from_secs(10), ticks.recv()).await;
        assert!(matches!(tick, Ok(Some(()))));
    }

    #[tokio::test]
    async fn route_edit_does_not_wake_root_watcher() {
        let dir = TempDir::new().unwrap();
        let blog = dir.path().join("blog");
        std::fs::create_dir_all(&blog).unwrap();
        std::fs::write(blog.join("main.go"), "package main").unwrap();

        let debounce = Duration::from_millis(100);
        let (_root, mut root_ticks) = SourceWatcher::spawn(dir.path(), false, debounce).unwrap();
        let (_blog, mut blog_ticks) = SourceWatcher::spawn(&blog, true, debounce).unwrap();

        std::fs::write(blog.join("main.go"), "package main // edited").unwrap();

        let tick = tokio::time::timeout(Duration::from_secs(10), blog_ticks.recv()).await;
        assert!(matches!(tick, Ok(Some(()))));
        let root = tokio::time::timeout(Duration::from_millis(500), root_ticks.recv()).await;
        assert!(root.is_err(), "root route rebuilt for an edit under blog/");

        std::fs::write(dir.path().join("main.go"), "package main").unwrap();
        let tick = tokio::time::timeout(Duration::from_secs(10), root_ticks.recv()).await;
        assert!(matches!(tick, Ok(Some(()))));
    }
}
