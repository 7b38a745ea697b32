//! Runtime configuration for the ingest daemon.
//!
//! Every path the pipeline touches hangs off a single root directory so a
//! test (or a second deployment) can point the whole service somewhere else
//! by overriding one value. Individual locations can still be moved with
//! their own environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Default base directory for all service state.
const DEFAULT_ROOT: &str = "/srv/marquee";
/// Descriptor file name the uploader writes into the drop directory.
const DEFAULT_DESCRIPTOR_NAME: &str = "job.json";
/// Archive file name the uploader writes into the upload directory.
const DEFAULT_ARCHIVE_NAME: &str = "game.zip";
/// File extension shared by every launcher link the service creates.
pub const LINK_EXTENSION: &str = "game";

/// Paths and tuning knobs for one ingest run.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Base directory every default path is derived from.
    pub root: PathBuf,
    /// Directory watched for newly created files.
    pub watch_dir: PathBuf,
    /// File name of the job descriptor inside `watch_dir`.
    pub descriptor_name: String,
    /// Directory the uploader drops the archive into.
    pub upload_dir: PathBuf,
    /// File name of the uploaded archive inside `upload_dir`.
    pub archive_name: String,
    /// Root of the per-collection asset folders.
    pub game_data_root: PathBuf,
    /// Root of the per-collection link directories scanned by the frontend.
    pub rom_root: PathBuf,
    /// Root of the per-engine registry directories.
    pub engine_root: PathBuf,
    /// Global system list document.
    pub system_list_path: PathBuf,
    /// Launcher script substituted into each system's launch command.
    pub launcher_script: PathBuf,
    /// Scratch directory for in-flight extractions.
    pub work_root: PathBuf,
    /// Pause between a create event and the first stability probe.
    pub settle_delay: Duration,
    /// Longest the pipeline waits for an upload to stop growing.
    pub stability_timeout: Duration,
    /// Interval between stability probes.
    pub stability_poll: Duration,
    /// Fail jobs with an unrecognized engine instead of skipping the link step.
    pub reject_unknown_engine: bool,
    /// Append log output to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl IngestConfig {
    /// Configuration with every path derived from `root` and default tuning.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let engine_root = root.join("engines");
        Self {
            watch_dir: root.join("inbox"),
            descriptor_name: DEFAULT_DESCRIPTOR_NAME.to_string(),
            upload_dir: root.join("upload"),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            game_data_root: root.join("gamedata"),
            rom_root: root.join("roms"),
            system_list_path: root.join("systemlist.xml"),
            launcher_script: engine_root.join("launch.sh"),
            work_root: root.join("work"),
            engine_root,
            settle_delay: Duration::from_millis(500),
            stability_timeout: Duration::from_millis(30_000),
            stability_poll: Duration::from_millis(250),
            reject_unknown_engine: false,
            log_file: None,
            root,
        }
    }

    /// Load configuration from the environment, with `.env` support.
    pub fn from_env() -> Self {
        Self::from_env_with_root(None)
    }

    /// Same as [`IngestConfig::from_env`] but with the root directory forced
    /// to `root_override` when given (CLI flags win over the environment).
    pub fn from_env_with_root(root_override: Option<PathBuf>) -> Self {
        dotenvy::dotenv().ok();

        let root = root_override
            .or_else(|| env_path("MARQUEE_ROOT"))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
        let mut config = Self::rooted(root);

        if let Some(path) = env_path("MARQUEE_WATCH_DIR") {
            config.watch_dir = path;
        }
        if let Some(name) = env_string("MARQUEE_DESCRIPTOR_NAME") {
            config.descriptor_name = name;
        }
        if let Some(path) = env_path("MARQUEE_UPLOAD_DIR") {
            config.upload_dir = path;
        }
        if let Some(name) = env_string("MARQUEE_ARCHIVE_NAME") {
            config.archive_name = name;
        }
        if let Some(path) = env_path("MARQUEE_GAME_DATA_ROOT") {
            config.game_data_root = path;
        }
        if let Some(path) = env_path("MARQUEE_ROM_ROOT") {
            config.rom_root = path;
        }
        if let Some(path) = env_path("MARQUEE_ENGINE_ROOT") {
            config.engine_root = path;
            config.launcher_script = config.engine_root.join("launch.sh");
        }
        if let Some(path) = env_path("MARQUEE_SYSTEM_LIST") {
            config.system_list_path = path;
        }
        if let Some(path) = env_path("MARQUEE_LAUNCHER_SCRIPT") {
            config.launcher_script = path;
        }
        if let Some(path) = env_path("MARQUEE_WORK_ROOT") {
            config.work_root = path;
        }
        if let Some(delay) = env_duration_ms("MARQUEE_SETTLE_DELAY_MS") {
            config.settle_delay = delay;
        }
        if let Some(timeout) = env_duration_ms("MARQUEE_STABILITY_TIMEOUT_MS") {
            config.stability_timeout = timeout;
        }
        if let Some(interval) = env_duration_ms("MARQUEE_STABILITY_POLL_MS") {
            config.stability_poll = interval;
        }
        if let Some(reject) = env_bool("MARQUEE_REJECT_UNKNOWN_ENGINE") {
            config.reject_unknown_engine = reject;
        }
        if let Some(path) = env_path("MARQUEE_LOG_FILE") {
            config.log_file = Some(path);
        }

        config
    }

    /// Create every directory the pipeline writes into.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.watch_dir)?;
        fs::create_dir_all(&self.upload_dir)?;
        fs::create_dir_all(&self.game_data_root)?;
        fs::create_dir_all(&self.rom_root)?;
        fs::create_dir_all(&self.engine_root)?;
        fs::create_dir_all(&self.work_root)?;
        if let Some(parent) = self.system_list_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Full path of the job descriptor.
    pub fn descriptor_path(&self) -> PathBuf {
        self.watch_dir.join(&self.descriptor_name)
    }

    /// Full path of the uploaded archive.
    pub fn archive_path(&self) -> PathBuf {
        self.upload_dir.join(&self.archive_name)
    }

    /// Asset folder root for one collection.
    pub fn collection_data_dir(&self, collection_id: &str) -> PathBuf {
        self.game_data_root.join(collection_id)
    }

    /// Link directory the frontend scans for one collection.
    pub fn collection_rom_dir(&self, collection_id: &str) -> PathBuf {
        self.rom_root.join(collection_id)
    }

    /// Game list document for one collection.
    pub fn game_list_path(&self, collection_id: &str) -> PathBuf {
        self.collection_rom_dir(collection_id).join("gamelist.xml")
    }

    /// Registry directory for one engine.
    pub fn engine_dir(&self, engine_dir_name: &str) -> PathBuf {
        self.engine_root.join(engine_dir_name)
    }

    /// Launch command recorded in the system list for every collection.
    pub fn launch_command(&self) -> String {
        format!("bash {} %ROM%", self.launcher_script.display())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_duration_ms(key: &str) -> Option<Duration> {
    env_string(key)?.parse().ok().map(Duration::from_millis)
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key)?.parse().ok()
}

/// True when `path` exists and is a directory.
pub fn is_directory(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_dir()).unwrap_or(false)
}
