//! # Marquee Ingest
//!
//! Unattended ingest daemon for the Marquee arcade. The daemon watches the
//! drop directory for a job descriptor, runs the upload through the ingest
//! pipeline (stability wait, extraction, launcher links, catalogs), and
//! exits zero after one completed job so the supervisor restarts it with a
//! clean slate. Job failures keep it watching; only loss of the drop
//! directory itself brings it down non-zero.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use marquee_core::{DropWatcher, IngestConfig, IngestOrchestrator};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "marquee-ingest")]
#[command(about = "Watches the drop directory and registers uploaded games with the arcade frontend")]
struct Cli {
    /// Base directory for all service state
    #[arg(long, env = "MARQUEE_ROOT")]
    root: Option<PathBuf>,

    /// Directory to watch for job descriptors
    #[arg(long, env = "MARQUEE_WATCH_DIR")]
    watch_dir: Option<PathBuf>,

    /// Append log output to this file instead of the console
    #[arg(long, env = "MARQUEE_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = build_config(Cli::parse());

    init_tracing(config.log_file.as_ref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %config.root.display(),
        "starting marquee-ingest"
    );

    config.ensure_directories().with_context(|| {
        format!(
            "failed to prepare directories under {}",
            config.root.display()
        )
    })?;

    info!(
        watch = %config.watch_dir.display(),
        descriptor = %config.descriptor_path().display(),
        archive = %config.archive_path().display(),
        system_list = %config.system_list_path.display(),
        "ingest layout ready"
    );

    let mut watcher =
        DropWatcher::new(&config.watch_dir).context("failed to start the drop-directory watcher")?;
    info!(path = %watcher.root().display(), "watching drop directory");

    let mut orchestrator = IngestOrchestrator::new(config);

    tokio::select! {
        result = orchestrator.run(&mut watcher) => match result {
            Ok(()) => {
                info!("job completed; exiting for a clean restart");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "ingest loop failed");
                Err(err.into())
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
            Ok(())
        }
    }
}

/// Resolve the effective configuration: flags win over environment
/// variables, which win over defaults derived from the root.
fn build_config(cli: Cli) -> IngestConfig {
    let mut config = IngestConfig::from_env_with_root(cli.root);
    if let Some(watch_dir) = cli.watch_dir {
        config.watch_dir = watch_dir;
    }
    if let Some(log_file) = cli.log_file {
        config.log_file = Some(log_file);
    }
    config
}

/// Route logs to the console, or append them to the configured log file.
fn init_tracing(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_ansi(false),
                )
                .init();
        }
        None => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, build_config};
    use clap::Parser;
    use std::ffi::OsString;
    use std::path::Path;

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<OsString>,
    }

    impl EnvVarGuard {
        fn unset(key: &'static str) -> Self {
            let previous = std::env::var_os(key);
            // SAFETY: tests run in isolation and restore previous environment state on drop.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, previous }
        }

        fn set(key: &'static str, value: impl AsRef<std::ffi::OsStr>) -> Self {
            let previous = std::env::var_os(key);
            // SAFETY: tests run in isolation and restore previous environment state on drop.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            // SAFETY: we reinstate the environment variable to its prior state.
            unsafe {
                match &self.previous {
                    Some(prev) => std::env::set_var(self.key, prev),
                    None => std::env::remove_var(self.key),
                }
            }
        }
    }

    #[test]
    fn flags_env_and_defaults_resolve_in_priority_order() {
        // Flags beat the environment; the environment beats derived defaults.
        {
            let _root = EnvVarGuard::set("MARQUEE_ROOT", "/env/root");
            let _watch = EnvVarGuard::set("MARQUEE_WATCH_DIR", "/env/inbox");
            let _log = EnvVarGuard::unset("MARQUEE_LOG_FILE");

            let cli = Cli::try_parse_from(["marquee-ingest", "--root", "/flag/root"])
                .expect("flags should parse");
            let config = build_config(cli);

            assert_eq!(config.root, Path::new("/flag/root"));
            assert_eq!(config.watch_dir, Path::new("/env/inbox"));
            assert_eq!(config.log_file, None);
        }

        // With nothing set, every path derives from the default root.
        {
            let _root = EnvVarGuard::unset("MARQUEE_ROOT");
            let _watch = EnvVarGuard::unset("MARQUEE_WATCH_DIR");
            let _log = EnvVarGuard::unset("MARQUEE_LOG_FILE");

            let cli = Cli::try_parse_from(["marquee-ingest", "--log-file", "/var/log/marquee.log"])
                .expect("flags should parse");
            let config = build_config(cli);

            assert_eq!(config.root, Path::new("/srv/marquee"));
            assert_eq!(config.watch_dir, Path::new("/srv/marquee/inbox"));
            assert_eq!(config.log_file.as_deref(), Some(Path::new("/var/log/marquee.log")));
        }
    }
}
