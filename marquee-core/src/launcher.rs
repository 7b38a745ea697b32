//! Launcher registration.
//!
//! A registered game is reachable through a chain of two symlinks: the
//! frontend scans `roms/<collection>/<item>.game`, which points at the
//! engine registry entry `engines/<engine>/<item>.game`, which points at the
//! real entry point inside the asset folder. Launch scripts resolve whatever
//! the frontend hands them, so the chain has to stay intact end to end.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::config::LINK_EXTENSION;
use crate::descriptor::Engine;
use crate::error::{IngestError, Result};
use crate::rollback::Rollback;

/// Well-known entry point for browser games.
const WEB_ENTRY: &str = "index.html";
/// Mode granted to executable entry points.
const EXEC_MODE: u32 = 0o755;

/// Directories the registrar writes links into, derived from the service
/// configuration by the caller.
#[derive(Clone, Debug)]
pub struct RegistrarPaths {
    /// Registry directory for the item's engine.
    pub engine_dir: PathBuf,
    /// Link directory for the item's collection.
    pub rom_dir: PathBuf,
}

/// The two links created for a registered item.
#[derive(Clone, Debug)]
pub struct LinkPair {
    /// Engine registry link, pointing at the entry point.
    pub registry: PathBuf,
    /// Collection link scanned by the frontend, pointing at `registry`.
    pub rom: PathBuf,
    /// Resolved entry point inside the asset folder.
    pub entry_point: PathBuf,
}

/// Register `asset_folder` as a launchable item named `item_id`.
///
/// Resolves the engine's entry point, grants execute permission where the
/// engine runs a real executable, and creates both links. Each link is
/// recorded in `rollback` as it appears, with the old target kept for links
/// that replaced one, so a failure between the two cannot strand the first
/// or lose what a re-registration overwrote. A regular file squatting on a
/// link location fails the job instead.
pub fn register(
    engine: &Engine,
    asset_folder: &Path,
    exe_name: Option<&str>,
    item_id: &str,
    paths: &RegistrarPaths,
    rollback: &mut Rollback,
) -> Result<LinkPair> {
    let entry_point = resolve_entry_point(engine, asset_folder, exe_name)?;
    if engine.needs_exe() {
        grant_execute(&entry_point)?;
    }

    fs::create_dir_all(&paths.engine_dir)?;
    fs::create_dir_all(&paths.rom_dir)?;

    let link_name = format!("{item_id}.{LINK_EXTENSION}");
    let registry = paths.engine_dir.join(&link_name);
    let rom = paths.rom_dir.join(&link_name);

    match replace_link(&entry_point, &registry)? {
        Some(prior) => rollback.replaced_link(registry.clone(), prior),
        None => rollback.created_link(registry.clone()),
    }
    match replace_link(&registry, &rom)? {
        Some(prior) => rollback.replaced_link(rom.clone(), prior),
        None => rollback.created_link(rom.clone()),
    }

    info!(
        item = item_id,
        engine = %engine,
        entry = %entry_point.display(),
        "item registered with launcher"
    );
    Ok(LinkPair {
        registry,
        rom,
        entry_point,
    })
}

/// Locate the file the launcher will ultimately execute or open.
fn resolve_entry_point(
    engine: &Engine,
    asset_folder: &Path,
    exe_name: Option<&str>,
) -> Result<PathBuf> {
    let relative = match engine {
        Engine::CodeOrg => WEB_ENTRY,
        Engine::Java | Engine::Native => {
            exe_name.ok_or(IngestError::MissingField { field: "exeName" })?
        }
        Engine::Unknown(raw) => {
            return Err(IngestError::UnrecognizedEngine {
                engine: raw.clone(),
            });
        }
    };

    // The declared name must stay inside the asset folder; `..`, absolute
    // paths, and the like cannot name files outside the extracted upload.
    let escapes = Path::new(relative)
        .components()
        .any(|part| !matches!(part, Component::Normal(_)));
    let entry = asset_folder.join(relative);
    if escapes || !entry.is_file() {
        return Err(IngestError::MissingEntryPoint { path: entry });
    }
    Ok(entry)
}

fn grant_execute(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(EXEC_MODE);
    fs::set_permissions(path, perms)?;
    debug!(path = %path.display(), mode = EXEC_MODE, "granted execute permission");
    Ok(())
}

/// Create a symlink at `link` pointing at `target`, replacing a previous
/// link if one is there. Returns the replaced link's old target so the
/// rollback can put it back. Anything else occupying `link` is a conflict.
fn replace_link(target: &Path, link: &Path) -> Result<Option<PathBuf>> {
    let prior = match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let old_target = fs::read_link(link)?;
            fs::remove_file(link)?;
            Some(old_target)
        }
        Ok(_) => {
            return Err(IngestError::FilesystemConflict {
                path: link.to_path_buf(),
            });
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };
    std::os::unix::fs::symlink(target, link)?;
    Ok(prior)
}
