//! Tracing setup for the bridge.
//!
//! Logs go to stderr by default so stdout stays clean for command output.
//! With a log file, each start rotates the previous files and appends to a
//! fresh one through a line-buffered writer.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::settings::LogLevel;

/// Rotated files kept next to the active log.
pub const KEEP_ROTATED: u32 = 3;

/// Filter used when `RUST_LOG` is unset.
fn default_filter(level: LogLevel) -> String {
    format!("mcp_bridge={},warn", level.as_str())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `level`. Fails if a subscriber is already installed
/// or the log file cannot be opened. Rotation problems are logged once the
/// subscriber is up and never stop startup.
pub fn init_tracing(level: LogLevel, log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let Some(path) = log_file else {
        return fmt::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()));
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rotation_failures = rotate_log_file(path, KEEP_ROTATED);
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(line_flushed(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %path.display(),
        pid = std::process::id(),
        "=== mcp-bridge starting ==="
    );
    for (file, error) in rotation_failures {
        tracing::warn!(file = %file.display(), %error, "log rotation step failed");
    }
    Ok(())
}

/// Shift `bridge.log` to `bridge.log.1`, `.1` to `.2`, up to `.{keep}`.
///
/// The oldest numbered file is dropped and missing links in the chain are
/// skipped. Returns the steps that failed for a reason other than a missing
/// file.
pub fn rotate_log_file(base_path: &Path, keep: u32) -> Vec<(PathBuf, io::Error)> {
    let numbered = |n: u32| PathBuf::from(format!("{}.{n}", base_path.display()));
    let mut failures = Vec::new();
    let mut record = |path: PathBuf, result: io::Result<()>| match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => failures.push((path, e)),
        _ => {}
    };

    if keep == 0 {
        record(base_path.to_path_buf(), std::fs::remove_file(base_path));
        return failures;
    }

    let oldest = numbered(keep);
    record(oldest.clone(), std::fs::remove_file(&oldest));
    for n in (1..keep).rev() {
        let from = numbered(n);
        record(from.clone(), std::fs::rename(&from, numbered(n + 1)));
    }
    record(base_path.to_path_buf(), std::fs::rename(base_path, numbered(1)));

    failures
}

/// Writer for the log file. Each finished line reaches disk immediately so
/// nothing is lost if the process dies.
fn line_flushed(file: File) -> Mutex<LineWriter<File>> {
    Mutex::new(LineWriter::new(file))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracing_subscriber::fmt::MakeWriter;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_rotate_shifts_chain_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("bridge.log");
        std::fs::write(&base, "current").unwrap();
        std::fs::write(dir.path().join("bridge.log.1"), "one").unwrap();
        std::fs::write(dir.path().join("bridge.log.2"), "two").unwrap();
        std::fs::write(dir.path().join("bridge.log.3"), "three").unwrap();

        assert!(rotate_log_file(&base, 3).is_empty());

        assert!(!base.exists());
        assert_eq!(read(&dir.path().join("bridge.log.1")), "current");
        assert_eq!(read(&dir.path().join("bridge.log.2")), "one");
        assert_eq!(read(&dir.path().join("bridge.log.3")), "two");
    }

    #[test]
    fn test_rotate_with_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("bridge.log");
        std::fs::write(&base, "current").unwrap();

        rotate_log_file(&base, 3);

        assert_eq!(read(&dir.path().join("bridge.log.1")), "current");
        assert!(!dir.path().join("bridge.log.2").exists());
    }

    #[test]
    fn test_rotate_missing_base_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("bridge.log");
        assert!(rotate_log_file(&base, 3).is_empty());
        assert!(!dir.path().join("bridge.log.1").exists());
    }

    #[test]
    fn test_rotate_reports_blocked_step() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("bridge.log");
        std::fs::write(&base, "current").unwrap();
        // A non-empty directory where the oldest file should be cannot be removed.
        let oldest = dir.path().join("bridge.log.1");
        std::fs::create_dir_all(oldest.join("inner")).unwrap();

        let failures = rotate_log_file(&base, 1);
        assert_eq!(failures[0].0, oldest);
        // The current log is never lost when the shift is blocked.
        assert_eq!(read(&base), "current");
    }

    #[test]
    fn test_rotate_keep_zero_deletes_current() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("bridge.log");
        std::fs::write(&base, "current").unwrap();

        assert!(rotate_log_file(&base, 0).is_empty());
        assert!(!base.exists());
    }

    #[test]
    fn test_log_writer_flushes_each_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let writer = line_flushed(File::create(&path).unwrap());

        writer.make_writer().write_all(b"line one\n").unwrap();
        assert_eq!(read(&path), "line one\n");

        writer.make_writer().write_all(b"partial").unwrap();
        assert_eq!(read(&path), "line one\n");
    }

    #[test]
    fn test_default_filter_uses_level() {
        assert_eq!(default_filter(LogLevel::Debug), "mcp_bridge=debug,warn");
        assert_eq!(default_filter(LogLevel::Info), "mcp_bridge=info,warn");
    }
}
