//! Command execution

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use livecfg_core::{ConfigDiff, ConfigFacade, FacadeOptions, StoreOptions};
use livecfg_utils::{paths, LivecfgError, Result};

use crate::cli::{parse_value, Cli, Command};

/// Extra time allowed for a deferred save to land after its window
const DEFERRED_SAVE_GRACE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run one command; returns the process exit code
pub async fn execute(cli: Cli, out: &mut dyn Write) -> Result<i32> {
    let config_path = cli.config.unwrap_or_else(paths::config_file);
    let mut options = FacadeOptions::with_store(StoreOptions::at(&config_path));
    if let Command::Set {
        defer_ms: Some(ms), ..
    } = &cli.command
    {
        options.debounce_window = Duration::from_millis(*ms);
    }
    let window = options.debounce_window;

    let (facade, report) = ConfigFacade::open(options);
    if report.degraded {
        warn!(
            "Using defaults; {} could not be loaded: {}",
            config_path.display(),
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    debug!(source = ?report.source, migrated = ?report.migrated, "Configuration loaded");

    match cli.command {
        Command::Get { key } => {
            let Some(value) = facade.document().get(&key).cloned() else {
                eprintln!("livecfg: '{}' is not set", key);
                return Ok(1);
            };
            writeln!(out, "{}", render(&value)?)?;
        }

        Command::Set { key, value, defer_ms } => {
            let value = parse_value(&value);
            let diff = match defer_ms {
                Some(_) => set_deferred(&facade, &key, value, window).await?,
                None => facade.set_setting(&key, value, true)?.unwrap_or_default(),
            };
            print_diff(out, &diff)?;
        }

        Command::Unset { key } => {
            let (removed, diff) = facade.remove_setting(&key, true)?;
            if removed.is_none() {
                eprintln!("livecfg: '{}' is not set", key);
                return Ok(1);
            }
            print_diff(out, &diff.unwrap_or_default())?;
        }

        Command::Show => {
            writeln!(out, "{}", facade.document())?;
        }

        Command::Export { path } => {
            facade.export_settings(&path)?;
            writeln!(out, "exported to {}", path.display())?;
        }

        Command::Import { path } => {
            let diff = facade.import_settings(&path)?;
            print_diff(out, &diff)?;
        }

        Command::Backup => {
            let path = facade.backup_settings()?;
            writeln!(out, "{}", path.display())?;
        }

        Command::Backups => {
            for backup in facade.list_backups()? {
                writeln!(
                    out,
                    "{}  {:>8}  {}",
                    backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                    backup.size,
                    backup.path.display()
                )?;
            }
        }

        Command::Restore { path } => {
            let diff = facade.restore_backup(&path)?;
            print_diff(out, &diff)?;
        }

        Command::Reset => {
            let diff = facade.reset_to_defaults()?;
            print_diff(out, &diff)?;
        }
    }

    Ok(0)
}

/// Set through the debounce timer and wait for the flush to land
async fn set_deferred(facade: &Arc<ConfigFacade>, key: &str, value: Value, window: Duration) -> Result<ConfigDiff> {
    let before = facade.store().save_count();
    let baseline = facade.last_saved();
    facade.set_setting(key, value, false)?;
    tokio::time::sleep(window).await;

    let deadline = Instant::now() + DEFERRED_SAVE_GRACE;
    while facade.store().save_count() == before {
        // Timer not yet fired: flush it ourselves
        if let Some(diff) = facade.flush()? {
            return Ok(diff);
        }
        if Instant::now() >= deadline {
            return Err(LivecfgError::save(
                facade.store().path(),
                "deferred save did not complete",
            ));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    Ok(ConfigDiff::between(&baseline, &facade.last_saved()))
}

fn render(value: &Value) -> Result<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other)?,
    })
}

fn print_diff(out: &mut dyn Write, diff: &ConfigDiff) -> Result<()> {
    if diff.is_empty() {
        writeln!(out, "no changes")?;
        return Ok(());
    }
    for key in &diff.added {
        writeln!(out, "+ {}", key)?;
    }
    for key in &diff.modified {
        writeln!(out, "~ {}", key)?;
    }
    for key in &diff.removed {
        writeln!(out, "- {}", key)?;
    }
    Ok(())
}
