//! Drop-directory watching.
//!
//! A thin bridge from `notify`'s callback thread into the async ingest loop.
//! The watcher covers a single directory, non-recursively, and only create
//! events survive classification; everything else the platform reports is
//! dropped here. Removal of the watched directory itself is forwarded as its
//! own message because the daemon cannot recover from it.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Buffered messages before the notify callback thread blocks.
const CHANNEL_CAPACITY: usize = 256;

/// One file creation observed in the drop directory.
#[derive(Clone, Debug)]
pub struct DropEvent {
    /// Absolute path of the created file.
    pub path: PathBuf,
    /// File name portion of `path`.
    pub file_name: String,
    /// When the event was classified.
    pub occurred_at: DateTime<Utc>,
}

/// Messages the watch thread hands to the ingest loop.
#[derive(Debug)]
pub enum WatchMessage {
    /// A file appeared in the drop directory.
    Created(DropEvent),
    /// The drop directory itself was removed. Fatal.
    RootLost(PathBuf),
    /// The backend reported an error; the loop decides whether it is fatal.
    Error(String),
}

/// Owns the platform watcher for the drop directory and the receiving half
/// of the bridge channel. Dropping it stops the watch.
pub struct DropWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<WatchMessage>,
    root: PathBuf,
}

impl fmt::Debug for DropWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl DropWatcher {
    /// Attach a non-recursive watcher to `root`.
    pub fn new(root: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        // The backend reports resolved paths, so classification has to
        // compare against the resolved root.
        let root_buf = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let callback_root = root_buf.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| {
                let messages = match result {
                    Ok(event) => classify(&callback_root, event),
                    Err(err) => vec![WatchMessage::Error(err.to_string())],
                };
                for message in messages {
                    if tx.blocking_send(message).is_err() {
                        // Receiver dropped during shutdown; nothing to do.
                        return;
                    }
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| {
            IngestError::Watch(format!(
                "failed to create watcher for {}: {err}",
                root.display()
            ))
        })?;

        watcher
            .watch(&root_buf, RecursiveMode::NonRecursive)
            .map_err(|err| {
                IngestError::Watch(format!("failed to watch {}: {err}", root.display()))
            })?;

        Ok(Self {
            _watcher: watcher,
            rx,
            root: root_buf,
        })
    }

    /// Next message, or `None` once the watch thread has shut down.
    pub async fn recv(&mut self) -> Option<WatchMessage> {
        self.rx.recv().await
    }

    /// Directory this watcher is attached to.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Turn one raw notify event into the messages the ingest loop cares about.
fn classify(root: &Path, event: Event) -> Vec<WatchMessage> {
    match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter_map(|path| created(root, path))
            .collect(),
        EventKind::Remove(_) => {
            // Child removals are routine; losing the root is not.
            if event.paths.iter().any(|path| path == root) {
                vec![WatchMessage::RootLost(root.to_path_buf())]
            } else {
                Vec::new()
            }
        }
        other => {
            debug!(kind = ?other, "ignoring filesystem event");
            Vec::new()
        }
    }
}

fn created(root: &Path, path: &Path) -> Option<WatchMessage> {
    if path == root {
        return None;
    }
    let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        warn!(path = %path.display(), "create event without a file name");
        return None;
    };
    Some(WatchMessage::Created(DropEvent {
        path: path.to_path_buf(),
        file_name,
        occurred_at: Utc::now(),
    }))
}
