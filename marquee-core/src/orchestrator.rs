//! Event orchestration.
//!
//! One create event is one job. Each job runs to completion (or failure)
//! before the next message is looked at; there is no queue and no
//! concurrency, because a kiosk deployment uploads one game at a time and
//! the catalogs are not safe to rewrite from two jobs at once. A job that
//! fails is logged, rolled back, and absorbed so the daemon keeps watching
//! with the descriptor left in place for inspection. A job that succeeds
//! removes its descriptor and ends the run; the supervisor restarts the
//! process fresh for the next upload.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::archive::ArchiveNormalizer;
use crate::catalog::{self, GameEntry, SystemEntry};
use crate::config::{self, IngestConfig};
use crate::descriptor::{self, Command, Engine, RegisterJob};
use crate::error::{IngestError, Result};
use crate::launcher::{self, RegistrarPaths};
use crate::rollback::Rollback;
use crate::stability;
use crate::watch::{DropEvent, DropWatcher, WatchMessage};

/// What the ingest loop should do after one message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Keep watching.
    Continue,
    /// One job completed; the run is over.
    Finished,
}

/// Drives the ingest pipeline off the watcher's message stream.
#[derive(Debug)]
pub struct IngestOrchestrator {
    config: IngestConfig,
    /// Modification time of the descriptor behind the most recent failed
    /// job. Armed when a job reads its descriptor and cleared when one
    /// succeeds, so it survives only across failures. Events that
    /// re-observe a descriptor no newer than this are skipped instead of
    /// replaying the same failure.
    stale_descriptor: Option<SystemTime>,
}

impl IngestOrchestrator {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            stale_descriptor: None,
        }
    }

    /// Run until one job completes or the watch is lost.
    pub async fn run(&mut self, watcher: &mut DropWatcher) -> Result<()> {
        loop {
            let Some(message) = watcher.recv().await else {
                return Err(IngestError::Watch(
                    "watch channel closed unexpectedly".to_string(),
                ));
            };
            if self.handle_message(message).await? == Flow::Finished {
                return Ok(());
            }
        }
    }

    /// Handle one watcher message.
    ///
    /// Job failures are logged, rolled back, and absorbed. Only loss of the
    /// watched directory itself escapes as an error.
    pub async fn handle_message(&mut self, message: WatchMessage) -> Result<Flow> {
        match message {
            WatchMessage::Created(event) => self.handle_created(event).await,
            WatchMessage::RootLost(path) => Err(IngestError::WatchLost { path }),
            WatchMessage::Error(message) => {
                // Some backends report the root disappearing as a plain
                // error rather than a remove event.
                if !config::is_directory(&self.config.watch_dir) {
                    return Err(IngestError::WatchLost {
                        path: self.config.watch_dir.clone(),
                    });
                }
                warn!(error = %message, "watcher reported a transient error");
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_created(&mut self, event: DropEvent) -> Result<Flow> {
        let job_id = Uuid::new_v4();
        info!(
            job = %job_id,
            file = %event.file_name,
            observed_at = %event.occurred_at,
            "file appeared in drop directory"
        );

        match self.process(&event).await {
            Ok(flow) => {
                if flow == Flow::Finished {
                    info!(job = %job_id, "job complete");
                }
                Ok(flow)
            }
            Err(err) => {
                let contents =
                    fs::read_to_string(self.config.descriptor_path()).unwrap_or_default();
                error!(
                    job = %job_id,
                    error = %err,
                    descriptor = %contents.trim(),
                    "job failed; descriptor left in place"
                );
                Ok(Flow::Continue)
            }
        }
    }

    async fn process(&mut self, event: &DropEvent) -> Result<Flow> {
        // Give the writer a head start, then insist the file stops growing.
        sleep(self.config.settle_delay).await;
        if !stability::wait_until_stable(
            &event.path,
            self.config.stability_timeout,
            self.config.stability_poll,
        )
        .await
        {
            return Err(IngestError::UnstableUpload {
                path: event.path.clone(),
            });
        }

        let descriptor_path = self.config.descriptor_path();
        if self.is_stale(&descriptor_path) {
            info!(
                path = %descriptor_path.display(),
                "descriptor unchanged since the last failure; skipping event"
            );
            return Ok(Flow::Continue);
        }

        // The fence marks the descriptor being read, not the trigger file:
        // a failure before this point must leave a never-read descriptor
        // processable by the next event.
        self.stale_descriptor = descriptor::modified_at(&descriptor_path);

        let job = descriptor::load(&descriptor_path)?;
        match job.command() {
            Command::Register => self.register(&job.register_job()?).await?,
            Command::Reserved(code) => {
                info!(code, "reserved command; nothing to do");
            }
        }

        // One job per run: remove the descriptor and let the process exit
        // so the supervisor restarts it with a clean slate.
        fs::remove_file(&descriptor_path)?;
        self.stale_descriptor = None;
        info!(path = %descriptor_path.display(), "descriptor removed");
        Ok(Flow::Finished)
    }

    /// True when the descriptor on disk is the one a previous job already
    /// failed on.
    fn is_stale(&self, descriptor_path: &Path) -> bool {
        match (self.stale_descriptor, descriptor::modified_at(descriptor_path)) {
            (Some(failed_at), Some(current)) => current <= failed_at,
            _ => false,
        }
    }

    async fn register(&self, job: &RegisterJob) -> Result<()> {
        info!(
            collection = %job.collection,
            game = %job.game_name,
            engine = %job.engine,
            "register job accepted"
        );

        if let Engine::Unknown(raw) = &job.engine {
            if self.config.reject_unknown_engine {
                return Err(IngestError::UnrecognizedEngine {
                    engine: raw.clone(),
                });
            }
            warn!(
                engine = %raw,
                "unrecognized engine; item will be extracted but not launchable"
            );
        }

        // The archive is written before the descriptor, but a slow uploader
        // can still be mid-copy. Same stability bar as the trigger file.
        let archive_path = self.config.archive_path();
        if !stability::wait_until_stable(
            &archive_path,
            self.config.stability_timeout,
            self.config.stability_poll,
        )
        .await
        {
            return Err(IngestError::UnstableUpload { path: archive_path });
        }

        let mut rollback = Rollback::new();
        match self.register_stages(job, &archive_path, &mut rollback) {
            Ok(()) => {
                rollback.commit();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "register stage failed; rolling back");
                rollback.unwind();
                Err(err)
            }
        }
    }

    /// The filesystem-mutating part of a register job, in pipeline order:
    /// asset folder, launcher links, catalogs.
    fn register_stages(
        &self,
        job: &RegisterJob,
        archive_path: &Path,
        rollback: &mut Rollback,
    ) -> Result<()> {
        let collection_id = job.collection_id();
        let game_id = job.game_id();

        let data_dir = self.config.collection_data_dir(&collection_id);
        let normalizer = ArchiveNormalizer::new(&self.config.work_root);
        let asset_folder =
            normalizer.normalize(archive_path, &data_dir, &job.game_name, rollback)?;

        if job.engine.is_known() {
            let paths = RegistrarPaths {
                engine_dir: self.config.engine_dir(job.engine.dir_name()),
                rom_dir: self.config.collection_rom_dir(&collection_id),
            };
            launcher::register(
                &job.engine,
                &asset_folder,
                job.exe_name.as_deref(),
                &game_id,
                &paths,
                rollback,
            )?;
        }

        let game_list_path = self.config.game_list_path(&collection_id);
        rollback.about_to_rewrite(&game_list_path);
        catalog::upsert_game(
            &game_list_path,
            GameEntry::new(&game_id, &job.game_name, &job.desc, &job.dev),
        )?;

        rollback.about_to_rewrite(&self.config.system_list_path);
        catalog::upsert_system(
            &self.config.system_list_path,
            SystemEntry::new(
                &collection_id,
                &job.collection,
                &self.config.collection_rom_dir(&collection_id),
                &self.config.launch_command(),
            ),
        )?;

        Ok(())
    }
}
