//! Archive normalization.
//!
//! Uploads arrive as ZIP files with no agreed internal shape: some wrap the
//! game in a single top-level folder, some put the files at the archive root,
//! and macOS uploads drag `__MACOSX` resource forks along. Normalization
//! extracts into a throwaway work directory, strips the packaging noise,
//! and moves exactly one canonical asset folder into place.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::descriptor::sanitize;
use crate::error::{IngestError, Result};
use crate::rollback::Rollback;

/// Top-level archive entries that are packaging noise, not game content.
const IGNORED_TOP_LEVEL: &[&str] = &["__MACOSX", ".DS_Store"];

/// Extracts uploads into scratch space under `work_root` and shapes them
/// into asset folders.
#[derive(Clone, Debug)]
pub struct ArchiveNormalizer {
    work_root: PathBuf,
}

impl ArchiveNormalizer {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
        }
    }

    /// Extract `archive_path` and install its content as
    /// `destination_root/<sanitized item_name>`.
    ///
    /// If the archive holds a single top-level directory (ignoring packaging
    /// noise), that directory becomes the asset folder, so the wrapper name
    /// chosen by the uploader's zip tool never leaks into the layout. Any
    /// other shape is moved wholesale into a fresh folder. An asset folder
    /// already at the destination is parked next to it and recorded in
    /// `rollback`: a failed job moves it back, a committed one discards it.
    /// Returns the asset folder path.
    pub fn normalize(
        &self,
        archive_path: &Path,
        destination_root: &Path,
        item_name: &str,
        rollback: &mut Rollback,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.work_root)?;
        let scratch = tempfile::Builder::new()
            .prefix("ingest-")
            .tempdir_in(&self.work_root)?;

        self.extract(archive_path, scratch.path())?;
        let content = content_entries(scratch.path())?;

        fs::create_dir_all(destination_root)?;
        let destination = destination_root.join(sanitize(item_name));
        if destination.exists() {
            let backup = park_path(&destination, scratch.path());
            info!(
                path = %destination.display(),
                backup = %backup.display(),
                "parking existing asset folder"
            );
            fs::rename(&destination, &backup)?;
            rollback.replaced_dir(destination.clone(), backup);
        }
        // Recorded before any content lands so a failure partway through
        // the moves cannot leave a half-populated folder behind.
        rollback.created_dir(destination.clone());

        match content.as_slice() {
            [single] if single.is_dir() => {
                // The uploader's wrapper folder becomes the asset folder.
                move_entry(single, &destination)?;
            }
            entries => {
                fs::create_dir_all(&destination)?;
                for entry in entries {
                    let Some(name) = entry.file_name() else {
                        continue;
                    };
                    move_entry(entry, &destination.join(name))?;
                }
            }
        }

        debug!(
            archive = %archive_path.display(),
            destination = %destination.display(),
            "archive normalized"
        );
        Ok(destination)
    }

    fn extract(&self, archive_path: &Path, scratch: &Path) -> Result<()> {
        let file = File::open(archive_path)?;
        let mut archive = ZipArchive::new(file).map_err(|err| IngestError::InvalidArchive {
            path: archive_path.to_path_buf(),
            reason: err.to_string(),
        })?;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|err| IngestError::InvalidArchive {
                    path: archive_path.to_path_buf(),
                    reason: err.to_string(),
                })?;

            let Some(relative) = entry.enclosed_name() else {
                warn!(
                    entry = %entry.name(),
                    "skipping archive entry that escapes the extraction root"
                );
                continue;
            };
            let out_path = scratch.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            io::copy(&mut entry, &mut out)?;
        }

        Ok(())
    }
}

/// Sibling path the occupied asset folder is parked at while the job runs.
/// Same parent directory, so the move is a plain one-filesystem rename; the
/// scratch directory's unique basename keeps jobs from colliding.
fn park_path(destination: &Path, scratch: &Path) -> PathBuf {
    let unique = scratch
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());
    destination.with_file_name(format!(".{unique}.prior"))
}

/// Top-level entries of `dir` that count as game content.
fn content_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let name = dirent.file_name();
        let name = name.to_string_lossy();
        if IGNORED_TOP_LEVEL
            .iter()
            .any(|noise| name.eq_ignore_ascii_case(noise))
        {
            debug!(entry = %name, "ignoring packaging noise");
            continue;
        }
        entries.push(dirent.path());
    }
    entries.sort();
    Ok(entries)
}

/// Move `from` to `to`, falling back to copy-and-delete when a plain rename
/// is refused (the work root and the destination may sit on different
/// filesystems).
fn move_entry(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_recursive(from, to)?;
            if from.is_dir() {
                fs::remove_dir_all(from)?;
            } else {
                fs::remove_file(from)?;
            }
            Ok(())
        }
    }
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to)?;
        for dirent in fs::read_dir(from)? {
            let dirent = dirent?;
            copy_recursive(&dirent.path(), &to.join(dirent.file_name()))?;
        }
    } else {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Build a ZIP at `path`. Names ending in `/` become directories.
    fn build_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in entries {
            if let Some(dir) = name.strip_suffix('/') {
                writer.add_directory(dir, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        archive: PathBuf,
        destination_root: PathBuf,
        normalizer: ArchiveNormalizer,
    }

    fn fixture(entries: &[(&str, &str)]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("game.zip");
        build_zip(&archive, entries);
        let destination_root = tmp.path().join("gamedata").join("Arcade");
        let normalizer = ArchiveNormalizer::new(tmp.path().join("work"));
        Fixture {
            _tmp: tmp,
            archive,
            destination_root,
            normalizer,
        }
    }

    #[test]
    fn single_wrapper_directory_is_flattened() {
        let fix = fixture(&[
            ("Space Runner Final/", ""),
            ("Space Runner Final/runner.bin", "binary"),
            ("Space Runner Final/assets/tiles.png", "png"),
        ]);

        let folder = fix
            .normalizer
            .normalize(
                &fix.archive,
                &fix.destination_root,
                "Space Runner",
                &mut Rollback::new(),
            )
            .unwrap();

        assert_eq!(folder, fix.destination_root.join("Space_Runner"));
        assert_eq!(fs::read(folder.join("runner.bin")).unwrap(), b"binary");
        assert!(folder.join("assets/tiles.png").is_file());
        assert!(!folder.join("Space Runner Final").exists());
    }

    #[test]
    fn multiple_top_level_entries_are_wrapped() {
        let fix = fixture(&[
            ("index.html", "<html></html>"),
            ("scripts/", ""),
            ("scripts/main.js", "js"),
        ]);

        let folder = fix
            .normalizer
            .normalize(&fix.archive, &fix.destination_root, "Maze", &mut Rollback::new())
            .unwrap();

        assert!(folder.join("index.html").is_file());
        assert!(folder.join("scripts/main.js").is_file());
    }

    #[test]
    fn packaging_noise_does_not_count_as_content() {
        let fix = fixture(&[
            ("__MACOSX/", ""),
            ("__MACOSX/._junk", "fork"),
            (".DS_Store", "finder"),
            ("Game/", ""),
            ("Game/run.sh", "#!/bin/sh"),
        ]);

        let folder = fix
            .normalizer
            .normalize(
                &fix.archive,
                &fix.destination_root,
                "Cleaned",
                &mut Rollback::new(),
            )
            .unwrap();

        // The one real directory was flattened; the noise never moved over.
        assert!(folder.join("run.sh").is_file());
        assert!(!folder.join("__MACOSX").exists());
        assert!(!fix.destination_root.join("__MACOSX").exists());
        assert!(!folder.join(".DS_Store").exists());
    }

    #[test]
    fn empty_archive_yields_an_empty_asset_folder() {
        let fix = fixture(&[]);

        let folder = fix
            .normalizer
            .normalize(&fix.archive, &fix.destination_root, "Empty", &mut Rollback::new())
            .unwrap();

        assert!(folder.is_dir());
        assert_eq!(fs::read_dir(&folder).unwrap().count(), 0);
    }

    #[test]
    fn existing_asset_folder_is_replaced() {
        let fix = fixture(&[("Game/", ""), ("Game/v2.bin", "new")]);
        let stale = fix.destination_root.join("Rerun");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("v1.bin"), "old").unwrap();

        let mut rollback = Rollback::new();
        let folder = fix
            .normalizer
            .normalize(&fix.archive, &fix.destination_root, "Rerun", &mut rollback)
            .unwrap();
        rollback.commit();

        assert!(folder.join("v2.bin").is_file());
        assert!(!folder.join("v1.bin").exists());
        // The parked copy of the old folder went away with the commit.
        assert_eq!(fs::read_dir(&fix.destination_root).unwrap().count(), 1);
    }

    #[test]
    fn replaced_folder_comes_back_on_unwind() {
        let fix = fixture(&[("Game/", ""), ("Game/v2.bin", "new")]);
        let prior = fix.destination_root.join("Rerun");
        fs::create_dir_all(&prior).unwrap();
        fs::write(prior.join("v1.bin"), "old").unwrap();

        let mut rollback = Rollback::new();
        fix.normalizer
            .normalize(&fix.archive, &fix.destination_root, "Rerun", &mut rollback)
            .unwrap();
        rollback.unwind();

        assert_eq!(fs::read_to_string(prior.join("v1.bin")).unwrap(), "old");
        assert!(!prior.join("v2.bin").exists());
        assert_eq!(fs::read_dir(&fix.destination_root).unwrap().count(), 1);
    }

    #[test]
    fn non_zip_payload_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("game.zip");
        fs::write(&archive, "plain text, not an archive").unwrap();
        let normalizer = ArchiveNormalizer::new(tmp.path().join("work"));

        let err = normalizer
            .normalize(
                &archive,
                &tmp.path().join("gamedata"),
                "Broken",
                &mut Rollback::new(),
            )
            .unwrap_err();

        assert!(matches!(err, IngestError::InvalidArchive { .. }));
    }

    #[test]
    fn scratch_space_is_cleaned_up() {
        let fix = fixture(&[("Game/", ""), ("Game/a.bin", "a")]);

        fix.normalizer
            .normalize(&fix.archive, &fix.destination_root, "Tidy", &mut Rollback::new())
            .unwrap();

        let work = fix._tmp.path().join("work");
        assert_eq!(fs::read_dir(&work).unwrap().count(), 0);
    }
}
