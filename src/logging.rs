use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Keeps the background log writer alive. Drop it last so buffered lines are flushed.
pub struct LogHandle {
    pub path: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

/// Console at INFO (or `RUST_LOG`), plus a DEBUG log file under `log_dir`.
pub fn init(log_dir: &Path) -> LogHandle {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let (path, guard) = match open_log_file(log_dir) {
        Some((path, file)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_filter(
                    Targets::new()
                        .with_target(env!("CARGO_CRATE_NAME"), LevelFilter::DEBUG)
                        .with_default(LevelFilter::INFO),
                );
            let _ = tracing_subscriber::registry()
                .with(console)
                .with(file_layer)
                .try_init();
            (Some(path), Some(guard))
        }
        None => {
            let _ = tracing_subscriber::registry().with(console).try_init();
            warn!("Logging to console only");
            (None, None)
        }
    };

    if let Some(path) = &path {
        info!("Logging to {}", path.display());
    }
    info!(
        "universal-tts {} on {} ({})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    LogHandle {
        path,
        _guard: guard,
    }
}

pub fn log_file_name() -> String {
    format!("tts_log_{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Falls back to the working directory when `log_dir` cannot be created.
fn open_log_file(log_dir: &Path) -> Option<(PathBuf, File)> {
    let dir = match fs::create_dir_all(log_dir) {
        Ok(()) => log_dir.to_path_buf(),
        Err(e) => {
            eprintln!(
                "Could not create log directory {}: {}. Using the current directory",
                log_dir.display(),
                e
            );
            PathBuf::from(".")
        }
    };

    let path = dir.join(log_file_name());
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some((path, file)),
        Err(e) => {
            eprintln!("Could not open log file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_file_is_created_in_nested_dir() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs").join("nested");
        let (path, _file) = open_log_file(&log_dir).unwrap();
        assert!(path.starts_with(&log_dir));
        assert!(path.exists());
    }

    #[test]
    fn log_file_name_pattern() {
        let name = log_file_name();
        let re = regex::Regex::new(r"^tts_log_\d{8}_\d{6}\.log$").unwrap();
        assert!(re.is_match(&name), "{}", name);
    }
}
