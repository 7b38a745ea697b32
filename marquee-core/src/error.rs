use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while ingesting an upload.
///
/// Variants are grouped by pipeline stage: descriptor handling, upload
/// stability, archive normalization, launcher registration, catalog
/// maintenance, and the watch loop itself. Only [`IngestError::WatchLost`]
/// is fatal to the process; every other variant fails the current job and
/// leaves the daemon watching.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("cannot read descriptor at {path}: {source}")]
    DescriptorRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("descriptor at {path} is not valid JSON: {source}")]
    DescriptorParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("descriptor is missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("upload at {path} never reached a stable size")]
    UnstableUpload { path: PathBuf },

    #[error("invalid archive at {path}: {reason}")]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("declared entry point {path} does not exist in the extracted upload")]
    MissingEntryPoint { path: PathBuf },

    #[error("unrecognized engine `{engine}`")]
    UnrecognizedEngine { engine: String },

    #[error("{path} is occupied by something other than a symlink")]
    FilesystemConflict { path: PathBuf },

    #[error("catalog {path}: {message}")]
    Catalog { path: PathBuf, message: String },

    #[error("watched directory {path} is gone")]
    WatchLost { path: PathBuf },

    #[error("watcher error: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
