//! Compensating rollback for failed jobs.
//!
//! The register pipeline mutates the filesystem in several places (asset
//! folder, two symlinks, two catalog documents) with no transaction around
//! them. Each mutation records its inverse here first: created artifacts
//! are removed on unwind, replaced ones are parked aside and moved back.
//! When a later stage fails, the recorded actions run in reverse so a
//! failed job leaves no half-registered item behind; a committed job drops
//! the parked copies instead.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

#[derive(Debug)]
enum Undo {
    RemoveDir(PathBuf),
    RemoveLink(PathBuf),
    RestoreDir {
        path: PathBuf,
        /// Where the directory that used to live at `path` is parked.
        backup: PathBuf,
    },
    RestoreLink {
        path: PathBuf,
        /// What the replaced link pointed at.
        target: PathBuf,
    },
    RestoreFile {
        path: PathBuf,
        /// Bytes before the job touched the file; `None` if it did not exist.
        prior: Option<Vec<u8>>,
    },
}

/// Records undo actions while a job runs and replays them in reverse if the
/// job fails. A job that completes calls [`Rollback::commit`] to discard the
/// record.
#[derive(Debug, Default)]
pub struct Rollback {
    actions: Vec<Undo>,
}

impl Rollback {
    pub fn new() -> Self {
        Self::default()
    }

    /// The job created (or is about to create) the directory at `path`.
    pub fn created_dir(&mut self, path: PathBuf) {
        self.actions.push(Undo::RemoveDir(path));
    }

    /// The job created the symlink at `path`.
    pub fn created_link(&mut self, path: PathBuf) {
        self.actions.push(Undo::RemoveLink(path));
    }

    /// The job moved the directory previously at `path` to `backup`.
    pub fn replaced_dir(&mut self, path: PathBuf, backup: PathBuf) {
        self.actions.push(Undo::RestoreDir { path, backup });
    }

    /// The job replaced the symlink at `path`, which pointed at `target`.
    pub fn replaced_link(&mut self, path: PathBuf, target: PathBuf) {
        self.actions.push(Undo::RestoreLink { path, target });
    }

    /// Capture `path`'s content before the job rewrites it.
    pub fn about_to_rewrite(&mut self, path: &Path) {
        let prior = fs::read(path).ok();
        self.actions.push(Undo::RestoreFile {
            path: path.to_path_buf(),
            prior,
        });
    }

    /// The job succeeded; forget the record and drop parked directories.
    pub fn commit(&mut self) {
        for action in self.actions.drain(..) {
            if let Undo::RestoreDir { backup, .. } = action {
                if let Err(err) = fs::remove_dir_all(&backup) {
                    if err.kind() != io::ErrorKind::NotFound {
                        warn!(
                            backup = %backup.display(),
                            error = %err,
                            "parked directory was not cleaned up"
                        );
                    }
                }
            }
        }
    }

    /// Undo every recorded action, newest first. Individual failures are
    /// logged and skipped so one stuck artifact does not strand the rest.
    pub fn unwind(&mut self) {
        while let Some(action) = self.actions.pop() {
            if let Err(err) = apply(&action) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(?action, error = %err, "rollback step failed");
                }
            }
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn apply(action: &Undo) -> io::Result<()> {
    match action {
        Undo::RemoveDir(path) => {
            debug!(path = %path.display(), "rollback: removing directory");
            fs::remove_dir_all(path)
        }
        Undo::RemoveLink(path) => {
            debug!(path = %path.display(), "rollback: removing link");
            fs::remove_file(path)
        }
        Undo::RestoreDir { path, backup } => {
            debug!(path = %path.display(), "rollback: restoring replaced directory");
            if path.exists() {
                fs::remove_dir_all(path)?;
            }
            fs::rename(backup, path)
        }
        Undo::RestoreLink { path, target } => {
            debug!(path = %path.display(), "rollback: restoring replaced link");
            match fs::symlink_metadata(path) {
                Ok(_) => fs::remove_file(path)?,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            std::os::unix::fs::symlink(target, path)
        }
        Undo::RestoreFile { path, prior } => match prior {
            Some(bytes) => {
                debug!(path = %path.display(), "rollback: restoring prior content");
                fs::write(path, bytes)
            }
            None => {
                debug!(path = %path.display(), "rollback: removing created file");
                fs::remove_file(path)
            }
        },
    }
}
