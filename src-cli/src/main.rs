//! Slidesave - command-line driver for the autosave pipeline
//!
//! Reads editor commands from stdin and prints every save status change.
//! `--init` writes the effective settings file and exits.

mod commands;

use anyhow::{bail, Context, Result};
use autosave::{AutosaveService, HttpSaveBackend, MemoryBackend, SaveBackend};
use commands::Command;
use std::path::PathBuf;
use std::sync::Arc;
use store::{AppSettings, FileStorage, KeyValueStorage, MemoryStorage, SettingsManager};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    dry_run: bool,
    /// Write the effective settings file and exit
    init: bool,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().context("--config requires a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--dry-run" => parsed.dry_run = true,
                "--init" => parsed.init = true,
                other => bail!("unexpected argument: {}", other),
            }
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    tracing::info!("Starting slidesave");

    let mut manager = settings_manager(&args);
    let path = manager.settings_path().clone();
    manager
        .load()
        .await
        .with_context(|| format!("failed to read {:?}", path))?;

    if args.init {
        manager
            .save()
            .await
            .with_context(|| format!("failed to write {:?}", path))?;
        println!("Settings written to {}", path.display());
        return Ok(());
    }

    let settings = manager.get().clone();
    let storage: Arc<dyn KeyValueStorage> = match &settings.storage_dir {
        Some(dir) => {
            tracing::info!("Pending saves stored in {:?}", dir);
            Arc::new(FileStorage::open(dir)?)
        }
        None => {
            tracing::warn!("No storage directory configured, pending saves are kept in memory");
            Arc::new(MemoryStorage::new())
        }
    };

    if args.dry_run {
        tracing::info!("Dry run, saves go to an in-memory backend");
        run(settings, MemoryBackend::new(), storage).await
    } else {
        let backend = HttpSaveBackend::from_config(&settings.autosave)?;
        tracing::info!("Saving to {}", settings.autosave.endpoint);
        run(settings, backend, storage).await
    }
}

fn settings_manager(args: &Args) -> SettingsManager {
    match &args.config {
        Some(path) => SettingsManager::with_path(path.clone()),
        None => SettingsManager::new(PathBuf::from(".")),
    }
}

async fn run<B>(settings: AppSettings, backend: B, storage: Arc<dyn KeyValueStorage>) -> Result<()>
where
    B: SaveBackend + 'static,
{
    let service = AutosaveService::new(settings.autosave, backend, storage)?;
    let listener = service.start();

    let mut status_rx = service.subscribe_status();
    let printer = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            println!("[{}] {}", status.glyph(), status.label());
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{:#}", e);
                continue;
            }
        };
        if !commands::execute(&service, command).await? {
            break;
        }
    }

    match service.shutdown().await {
        Ok(outcome) => tracing::info!("Final flush: {:?}", outcome),
        Err(e) => tracing::warn!("Shutdown skipped: {}", e),
    }
    let remaining = service.pending_count().await;
    if remaining > 0 {
        tracing::warn!("{} saves still pending", remaining);
    }

    listener.shutdown();
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        Args::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_args_defaults() {
        let parsed = args(&[]).unwrap();
        assert!(parsed.config.is_none());
        assert!(!parsed.dry_run);
        assert!(!parsed.init);
    }

    #[test]
    fn test_args_init() {
        assert!(args(&["--init"]).unwrap().init);
    }

    #[test]
    fn test_args_default_settings_path() {
        let manager = settings_manager(&Args::default());
        assert_eq!(manager.settings_path(), &PathBuf::from("./settings.json"));

        let explicit = args(&["--config", "/etc/slidesave.json"]).unwrap();
        assert_eq!(
            settings_manager(&explicit).settings_path(),
            &PathBuf::from("/etc/slidesave.json")
        );
    }

    #[test]
    fn test_args_config_and_dry_run() {
        let parsed = args(&["--config", "/tmp/s.json", "--dry-run"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/s.json")));
        assert!(parsed.dry_run);
    }

    #[test]
    fn test_args_rejects_unknown() {
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["--config"]).is_err());
    }
}
