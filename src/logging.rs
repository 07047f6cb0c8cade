//! Process-wide logging to the console and a log file.
//!
//! Both outputs carry a timestamp and one line per event. The file writer
//! is non-blocking: when it falls behind, lines are dropped instead of
//! stalling a relay task, and a failing disk never surfaces as an error.

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Where and how verbosely to log.
#[derive(Clone, Debug)]
pub struct LogOptions {
    /// Verbosity threshold in the 10/20/30/40 convention.
    pub threshold: u8,
    pub file: PathBuf,
    pub rotate_daily: bool,
}

/// Maps a numeric threshold to a tracing level. Lower numbers are more
/// verbose: 10 is debug, 20 info, 30 warning and anything above is error.
pub fn level_for(threshold: u8) -> Level {
    match threshold {
        0..=5 => Level::TRACE,
        6..=10 => Level::DEBUG,
        11..=20 => Level::INFO,
        21..=30 => Level::WARN,
        _ => Level::ERROR,
    }
}

/// Installs the global subscriber. `RUST_LOG`, when set, takes precedence
/// over the numeric threshold.
///
/// The returned guard flushes the file writer when dropped, so keep it
/// alive for the lifetime of the process. `None` means the log file could
/// not be opened and only the console is logged to.
pub fn init(options: &LogOptions) -> Option<WorkerGuard> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level_for(options.threshold)).into())
        .from_env_lossy();

    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match file_writer(&options.file, options.rotate_daily) {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("warning: logging already initialised: {e}");
    }

    guard
}

fn file_writer(path: &Path, rotate_daily: bool) -> Option<(NonBlocking, WorkerGuard)> {
    let (dir, name) = split_log_path(path)?;

    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!(
            "warning: could not create log directory {}: {e}",
            dir.display()
        );
        return None;
    }

    let rotation = if rotate_daily {
        Rotation::DAILY
    } else {
        Rotation::NEVER
    };
    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(name.to_string_lossy())
        .build(&dir);
    match appender {
        Ok(appender) => Some(tracing_appender::non_blocking(appender)),
        Err(e) => {
            eprintln!("warning: could not open log file {}: {e}", path.display());
            None
        }
    }
}

/// Splits a log path into its directory (current directory when bare) and
/// file name.
fn split_log_path(path: &Path) -> Option<(PathBuf, PathBuf)> {
    let name = PathBuf::from(path.file_name()?);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_follow_ordinal_levels() {
        assert_eq!(level_for(0), Level::TRACE);
        assert_eq!(level_for(10), Level::DEBUG);
        assert_eq!(level_for(20), Level::INFO);
        assert_eq!(level_for(30), Level::WARN);
        assert_eq!(level_for(40), Level::ERROR);
        assert_eq!(level_for(50), Level::ERROR);
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        let (dir, name) = split_log_path(Path::new("forward.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, PathBuf::from("forward.log"));

        let (dir, name) = split_log_path(Path::new("/var/log/forward/relay.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/forward"));
        assert_eq!(name, PathBuf::from("relay.log"));

        assert!(split_log_path(Path::new("/")).is_none());
    }

    #[test]
    fn file_writer_creates_missing_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("relay.log");
        let (_writer, guard) = file_writer(&path, false).unwrap();
        drop(guard);
        assert!(tmp.path().join("nested").is_dir());
        assert!(path.exists());
    }
}
