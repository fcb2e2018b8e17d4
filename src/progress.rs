use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persisted batch cursor: the count of manifest records already attempted.
///
/// A trait so the scheduler can be tested against an in-memory store. No
/// locking; one run per output directory is assumed.
pub trait ProgressStore: Send + Sync {
    fn read(&self) -> Result<Option<u64>>;
    fn write(&self, cursor: u64) -> Result<()>;
}

/// Append-only record of per-page failures.
pub trait ErrorLog: Send + Sync {
    fn append(&self, title: &str, url: &str, message: &str) -> Result<()>;
}

impl<T: ProgressStore> ProgressStore for std::sync::Arc<T> {
    fn read(&self) -> Result<Option<u64>> {
        self.as_ref().read()
    }

    fn write(&self, cursor: u64) -> Result<()> {
        self.as_ref().write(cursor)
    }
}

impl<T: ErrorLog> ErrorLog for std::sync::Arc<T> {
    fn append(&self, title: &str, url: &str, message: &str) -> Result<()> {
        self.as_ref().append(title, url, message)
    }
}

/// Cursor backed by a single small file holding a decimal integer.
pub struct FileProgressStore {
    path: PathBuf,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProgressStore for FileProgressStore {
    fn read(&self) -> Result<Option<u64>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read progress file: {}", self.path.display()))?;
        let cursor = contents.trim().parse::<u64>().with_context(|| {
            format!("Corrupt progress file: {}", self.path.display())
        })?;
        Ok(Some(cursor))
    }

    fn write(&self, cursor: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(&self.path, cursor.to_string())
            .with_context(|| format!("Failed to write progress file: {}", self.path.display()))
    }
}

/// Error log appending `[timestamp] title (url): message` lines, never
/// rotated or mutated.
pub struct FileErrorLog {
    path: PathBuf,
}

impl FileErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ErrorLog for FileErrorLog {
    fn append(&self, title: &str, url: &str, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open error log: {}", self.path.display()))?;
        writeln!(file, "[{timestamp}] {title} ({url}): {message}")
            .with_context(|| format!("Failed to append to error log: {}", self.path.display()))
    }
}

/// Default location of the progress file relative to the working directory.
pub fn default_progress_path() -> &'static Path {
    Path::new("logs/download_progress.txt")
}

/// Default location of the error log relative to the working directory.
pub fn default_error_log_path() -> &'static Path {
    Path::new("logs/error_log.txt")
}
