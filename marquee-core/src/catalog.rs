//! XML catalog maintenance.
//!
//! The frontend reads two kinds of catalog: a per-collection game list and
//! one global system list. Both are plain XML documents owned by this
//! service. Updates go through a full read-modify-write cycle: parse into
//! typed models, upsert, re-serialize the whole document with fixed
//! two-space indentation. Rewriting everything keeps the output canonical,
//! so a document that is loaded and written back unchanged is byte
//! identical. Leading and trailing whitespace in free-text fields is not
//! significant and is dropped when a document is written; interior
//! whitespace is kept as supplied. Documents that are missing are created
//! empty first; documents that exist but fail to parse fail the job rather
//! than being clobbered.

use std::fs;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LINK_EXTENSION;
use crate::error::{IngestError, Result};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// One `<game>` element in a collection's game list.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct GameEntry {
    /// Frontend-relative launch path, `./<item>.game`.
    pub path: String,
    /// Display name shown in menus. Also the upsert key.
    pub name: String,
    pub desc: String,
    pub developer: String,
}

impl GameEntry {
    pub fn new(item_id: &str, display_name: &str, desc: &str, developer: &str) -> Self {
        Self {
            path: format!("./{item_id}.{LINK_EXTENSION}"),
            name: display_name.to_string(),
            desc: desc.to_string(),
            developer: developer.to_string(),
        }
    }
}

/// Per-collection `gamelist.xml` document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename = "gameList")]
pub struct GameList {
    #[serde(rename = "game", default)]
    pub games: Vec<GameEntry>,
}

impl GameList {
    /// Parse the document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        read_document(path)
    }
}

/// One `<system>` element in the global system list.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct SystemEntry {
    /// Sanitized collection identifier. Also the upsert key.
    pub name: String,
    /// Collection label as the uploader wrote it.
    pub fullname: String,
    /// Directory the frontend scans for this collection's items.
    pub path: String,
    /// File extension of launchable entries, with the leading dot.
    pub extension: String,
    /// Command line the frontend runs, with `%ROM%` as the item placeholder.
    pub command: String,
}

impl SystemEntry {
    pub fn new(collection_id: &str, label: &str, rom_dir: &Path, launch_command: &str) -> Self {
        Self {
            name: collection_id.to_string(),
            fullname: label.to_string(),
            path: rom_dir.display().to_string(),
            extension: format!(".{LINK_EXTENSION}"),
            command: launch_command.to_string(),
        }
    }
}

/// Global `systemlist.xml` document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename = "systemList")]
pub struct SystemList {
    #[serde(rename = "system", default)]
    pub systems: Vec<SystemEntry>,
}

impl SystemList {
    /// Parse the document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        read_document(path)
    }
}

/// Insert `entry` into the game list at `list_path`, or replace the entry
/// with the same display name. The document is created if missing.
pub fn upsert_game(list_path: &Path, entry: GameEntry) -> Result<()> {
    let mut list: GameList = load_or_init(list_path)?;
    match list.games.iter_mut().find(|game| game.name == entry.name) {
        Some(existing) => {
            debug!(name = %entry.name, "replacing existing game entry");
            *existing = entry;
        }
        None => list.games.push(entry),
    }
    write_document(list_path, &list)?;
    info!(path = %list_path.display(), games = list.games.len(), "game list updated");
    Ok(())
}

/// Insert `entry` into the system list at `list_path`, or replace the entry
/// with the same identifier. The document is created if missing.
pub fn upsert_system(list_path: &Path, entry: SystemEntry) -> Result<()> {
    let mut list: SystemList = load_or_init(list_path)?;
    match list
        .systems
        .iter_mut()
        .find(|system| system.name == entry.name)
    {
        Some(existing) => {
            debug!(name = %entry.name, "replacing existing system entry");
            *existing = entry;
        }
        None => list.systems.push(entry),
    }
    write_document(list_path, &list)?;
    info!(path = %list_path.display(), systems = list.systems.len(), "system list updated");
    Ok(())
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|err| catalog_error(path, err))?;
    quick_xml::de::from_str(&raw).map_err(|err| catalog_error(path, err))
}

/// Load the document at `path`, creating an empty one first if nothing is
/// there yet. A document that exists but does not parse is an error; it is
/// never overwritten.
fn load_or_init<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    if path.exists() {
        read_document(path)
    } else {
        let empty = T::default();
        write_document(path, &empty)?;
        Ok(empty)
    }
}

fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let body = render(document).map_err(|message| IngestError::Catalog {
        path: path.to_path_buf(),
        message,
    })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, body)?;
    Ok(())
}

/// Serialize `document` and reformat it with two-space indentation.
///
/// `quick_xml::se` emits everything on one line, so the flat output is run
/// back through a reader/writer pair that re-indents it. The result is a
/// pure function of the model, which is what keeps rewrites canonical.
/// Trimming on the reader is what makes boundary whitespace in text fields
/// insignificant.
fn render<T: Serialize>(document: &T) -> std::result::Result<String, String> {
    let flat = quick_xml::se::to_string(document).map_err(|err| err.to_string())?;

    let mut reader = Reader::from_str(&flat);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => writer.write_event(event).map_err(|err| err.to_string())?,
            Err(err) => return Err(err.to_string()),
        }
    }

    let body = String::from_utf8(writer.into_inner()).map_err(|err| err.to_string())?;
    Ok(format!("{XML_DECLARATION}\n{body}\n"))
}

fn catalog_error(path: &Path, err: impl std::fmt::Display) -> IngestError {
    IngestError::Catalog {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
