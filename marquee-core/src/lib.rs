//! # Marquee Core
//!
//! Library behind the Marquee ingest daemon: everything needed to turn a
//! student game upload into a playable arcade item. The pipeline watches a
//! drop directory for a job descriptor, waits for the upload to settle,
//! unpacks and normalizes the archive into the collection's asset area,
//! wires the launcher symlinks, and folds the item into the XML catalogs
//! the frontend reads.
//!
//! Modules follow the pipeline stages:
//!
//! - [`watch`]: drop-directory watching, bridged into the async loop
//! - [`stability`]: wait for an upload to stop growing
//! - [`descriptor`]: parse and validate the JSON job descriptor
//! - [`archive`]: extract and normalize the uploaded ZIP
//! - [`launcher`]: entry-point resolution and the symlink chain
//! - [`catalog`]: game list and system list maintenance
//! - [`rollback`]: compensating cleanup for failed jobs
//! - [`orchestrator`]: the loop that strings the stages together

#![allow(missing_docs)]

pub mod archive;
pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod launcher;
pub mod orchestrator;
pub mod rollback;
pub mod stability;
pub mod watch;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use orchestrator::{Flow, IngestOrchestrator};
pub use watch::{DropEvent, DropWatcher, WatchMessage};
