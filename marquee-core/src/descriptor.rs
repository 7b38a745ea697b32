//! Job descriptor parsing and validation.
//!
//! The uploader announces work by writing a small JSON file into the drop
//! directory. Parsing is strict about shape (invalid JSON fails the job) but
//! lenient about extras: unknown fields are ignored so older and newer
//! uploaders can share a daemon.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use serde::Deserialize;

use crate::error::{IngestError, Result};

/// Behavior selector carried in the descriptor's `command` field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// Register the uploaded game with the frontend.
    Register,
    /// Any other integer. Reserved codes are acknowledged and skipped.
    Reserved(i64),
}

impl From<i64> for Command {
    fn from(raw: i64) -> Self {
        match raw {
            1 => Command::Register,
            other => Command::Reserved(other),
        }
    }
}

/// Launcher strategy declared by the uploader.
///
/// The recognized set is closed; anything else is carried verbatim so the
/// skip-or-reject policy can name it in logs and errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Engine {
    /// Browser game with a well-known `index.html` entry point.
    CodeOrg,
    /// Java build launched through its declared jar.
    Java,
    /// Native executable launched directly.
    Native,
    Unknown(String),
}

impl Engine {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "code.org" => Engine::CodeOrg,
            "java" => Engine::Java,
            "native" => Engine::Native,
            other => Engine::Unknown(other.to_string()),
        }
    }

    /// Registry directory name for this engine.
    pub fn dir_name(&self) -> &str {
        match self {
            Engine::CodeOrg => "code.org",
            Engine::Java => "java",
            Engine::Native => "native",
            Engine::Unknown(raw) => raw,
        }
    }

    /// Engines whose entry point is named by the descriptor's `exeName`.
    pub fn needs_exe(&self) -> bool {
        matches!(self, Engine::Java | Engine::Native)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Engine::Unknown(_))
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Raw descriptor as written by the uploader.
///
/// Only `command` is required at parse time; per-command requirements are
/// enforced by [`JobDescriptor::register_job`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub command: i64,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub game_name: Option<String>,
    #[serde(default)]
    pub student_game_engine: Option<String>,
    #[serde(default)]
    pub exe_name: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub dev: Option<String>,
}

impl JobDescriptor {
    pub fn command(&self) -> Command {
        Command::from(self.command)
    }

    /// Validate the fields a register job needs and produce the typed job.
    ///
    /// `exeName` is only required for engines that launch a named executable;
    /// `code.org` games carry their entry point implicitly.
    pub fn register_job(&self) -> Result<RegisterJob> {
        let collection = require(&self.collection, "collection")?;
        let game_name = require(&self.game_name, "gameName")?;
        let raw_engine = require(&self.student_game_engine, "studentGameEngine")?;
        let desc = require(&self.desc, "desc")?;
        let dev = require(&self.dev, "dev")?;

        let engine = Engine::parse(&raw_engine);
        let exe_name = self.exe_name.clone();
        if engine.needs_exe() && exe_name.is_none() {
            return Err(IngestError::MissingField { field: "exeName" });
        }

        Ok(RegisterJob {
            collection,
            game_name,
            engine,
            exe_name,
            desc,
            dev,
        })
    }
}

/// Fully validated register request.
#[derive(Clone, Debug)]
pub struct RegisterJob {
    /// Collection label as the uploader wrote it.
    pub collection: String,
    /// Game label as the uploader wrote it.
    pub game_name: String,
    pub engine: Engine,
    pub exe_name: Option<String>,
    pub desc: String,
    pub dev: String,
}

impl RegisterJob {
    /// Collection identifier used for directory and catalog keys.
    pub fn collection_id(&self) -> String {
        sanitize(&self.collection)
    }

    /// Game identifier used for folder and link names.
    pub fn game_id(&self) -> String {
        sanitize(&self.game_name)
    }
}

/// Read and parse the descriptor at `path`.
pub fn load(path: &Path) -> Result<JobDescriptor> {
    let raw = fs::read_to_string(path).map_err(|source| IngestError::DescriptorRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| IngestError::DescriptorParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Modification time of `path`, if it can be read at all.
pub fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Make a label safe to use as a path segment and catalog key.
///
/// Spaces become underscores; everything else passes through. Applying this
/// twice gives the same answer, so already-sanitized input is fine.
pub fn sanitize(label: &str) -> String {
    label.replace(' ', "_")
}

fn require(field: &Option<String>, name: &'static str) -> Result<String> {
    field
        .clone()
        .filter(|value| !value.is_empty())
        .ok_or(IngestError::MissingField { field: name })
}
