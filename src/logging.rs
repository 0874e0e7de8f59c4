//! Log routing for the `corpus` binary.
//!
//! Command output owns stdout, so diagnostics are written to stderr. Setting
//! `CORPUS_LOG_FILE` also appends every event (with its target) to that
//! file through a non-blocking writer. `RUST_LOG` filters both, defaulting
//! to `info`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE_ENV: &str = "CORPUS_LOG_FILE";

/// Keeps the file writer's worker alive until the process exits.
static FILE_WRITER: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = log_file_from_env().and_then(|path| {
        let (dir, name) = split_log_path(&path);
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name)
            .build(&dir);
        match appender {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_WRITER.set(guard);
                Some(fmt::layer().with_writer(writer).with_ansi(false).compact())
            }
            Err(err) => {
                eprintln!("Cannot log to {}: {}", path.display(), err);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(file_layer)
        .init();
}

fn log_file_from_env() -> Option<PathBuf> {
    std::env::var_os(LOG_FILE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Directory and file name for the appender. A bare file name lands in the
/// working directory.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "corpus.log".to_string());
    (dir, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_split_into_dir_and_name() {
        assert_eq!(
            split_log_path(Path::new("/var/log/corpus/ingest.log")),
            (PathBuf::from("/var/log/corpus"), "ingest.log".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("ingest.log")),
            (PathBuf::from("."), "ingest.log".to_string())
        );
    }
}
