use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use colored::Colorize;
use log::{Level, LevelFilter};

use crate::error::{RealtimeError, Result};

/// Parses a level name; unknown names fall back to `info`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn colored_level(level: Level) -> String {
    let tag = level.to_string();
    match level {
        Level::Error => tag.red().bold().to_string(),
        Level::Warn => tag.yellow().to_string(),
        Level::Info => tag.green().to_string(),
        Level::Debug => tag.blue().to_string(),
        Level::Trace => tag.dimmed().to_string(),
    }
}

/// Installs the global logger: colored lines on stdout and plain lines in
/// `<log_dir>/<app_name>_<timestamp>.log`. Older log files of the same app
/// are removed so only the newest `keep` remain. Returns the new file's path.
pub fn setup_logging(app_name: &str, log_dir: &Path, level: &str, keep: usize) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    // The file created below is one of the files to keep.
    cleanup_old_logs(app_name, log_dir, keep.saturating_sub(1))?;

    let log_path = log_dir.join(format!(
        "{}_{}.log",
        app_name,
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));

    let terminal = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                colored_level(record.level()),
                message
            ))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                Local::now().format("[%Y-%m-%d %H:%M:%S%.3f]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(fern::log_file(&log_path)?);

    fern::Dispatch::new()
        .level(parse_level(level))
        // Handshake internals are noisy at debug.
        .level_for("tungstenite", LevelFilter::Warn)
        .level_for("tokio_tungstenite", LevelFilter::Warn)
        .chain(terminal)
        .chain(file)
        .apply()
        .map_err(|e| RealtimeError::Logger(e.to_string()))?;

    Ok(log_path)
}

/// Deletes all but the newest `keep` files named `<app_name>_*.log`.
/// File names embed a sortable timestamp, so name order is age order.
pub fn cleanup_old_logs(app_name: &str, log_dir: &Path, keep: usize) -> Result<usize> {
    let prefix = format!("{app_name}_");
    let mut logs: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "log")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();

    logs.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old in logs.iter().skip(keep) {
        match fs::remove_file(old) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {}", old.display(), e),
        }
    }
    Ok(removed)
}
