//! Daily JSON log files.
//!
//! The file layer writes one JSON object per line into
//! `<dir>/toptea_YYYY-MM-DD.log`. The date is resolved on every write, so the
//! file rolls over at midnight UTC without a restart.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, error, info};
use tracing_subscriber::fmt::MakeWriter;

pub const LOG_FILE_PREFIX: &str = "toptea";

const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct DailyFile {
    dir: PathBuf,
    prefix: String,
}

impl DailyFile {
    /// Create the writer, making sure the log directory exists.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            prefix: prefix.to_string(),
        })
    }

    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.log", self.prefix, date.format("%Y-%m-%d")))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Writer for a single event. A file that failed to open swallows the event;
/// logging must never take a request down.
pub struct DailyFileWriter {
    file: Option<File>,
}

impl Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DailyFile {
    type Writer = DailyFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let path = self.path_for(Utc::now().date_naive());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| eprintln!("Failed to open log file {}: {err}", path.display()))
            .ok();
        DailyFileWriter { file }
    }
}

/// Date encoded in a `<prefix>_YYYY-MM-DD.log` file name.
fn file_date(name: &str, prefix: &str) -> Option<NaiveDate> {
    let date = name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(".log")?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete log files dated more than `retention_days` before `today`.
/// Files that do not follow the naming scheme are left alone.
///
/// # Errors
/// Returns an error if the directory cannot be listed.
pub fn prune(dir: &Path, prefix: &str, retention_days: u32, today: NaiveDate) -> Result<usize> {
    let cutoff = today - chrono::Duration::days(i64::from(retention_days));
    let mut removed = 0;

    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to list log directory: {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(|name| file_date(name, prefix)) else {
            continue;
        };
        if date < cutoff {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => error!("Failed to remove old log file {:?}: {err}", entry.path()),
            }
        }
    }

    Ok(removed)
}

/// Prune once now and then once a day.
pub fn spawn_pruner(dir: PathBuf, retention_days: u32) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            match prune(&dir, LOG_FILE_PREFIX, retention_days, Utc::now().date_naive()) {
                Ok(0) => debug!("No log files to prune"),
                Ok(removed) => info!(removed, "Pruned old log files"),
                Err(err) => error!("Failed to prune log files: {err}"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid test date")
    }

    #[test]
    fn path_for_uses_prefix_and_date() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let daily = DailyFile::new(dir.path(), "toptea")?;
        assert_eq!(
            daily.path_for(date("2026-01-03")),
            dir.path().join("toptea_2026-01-03.log")
        );
        Ok(())
    }

    #[test]
    fn new_creates_missing_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("logs").join("kds");
        let daily = DailyFile::new(&nested, "toptea")?;
        assert!(daily.dir().is_dir());
        Ok(())
    }

    #[test]
    fn writer_appends_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let daily = DailyFile::new(dir.path(), "toptea")?;
        daily.make_writer().write_all(b"{\"level\":\"WARN\"}\n")?;
        daily.make_writer().write_all(b"{\"level\":\"INFO\"}\n")?;

        let contents = fs::read_to_string(daily.path_for(Utc::now().date_naive()))?;
        assert_eq!(contents.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn file_date_requires_the_naming_scheme() {
        assert_eq!(
            file_date("toptea_2026-01-03.log", "toptea"),
            Some(date("2026-01-03"))
        );
        assert_eq!(file_date("toptea_latest.log", "toptea"), None);
        assert_eq!(file_date("kds_2026-01-03.log", "toptea"), None);
        assert_eq!(file_date("toptea_2026-01-03.txt", "toptea"), None);
    }

    #[test]
    fn prune_removes_only_expired_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in [
            "toptea_2025-11-01.log",
            "toptea_2025-12-20.log",
            "toptea_2026-01-03.log",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), "{}\n")?;
        }

        let removed = prune(dir.path(), "toptea", 30, date("2026-01-03"))?;
        assert_eq!(removed, 1);
        assert!(!dir.path().join("toptea_2025-11-01.log").exists());
        assert!(dir.path().join("toptea_2025-12-20.log").exists());
        assert!(dir.path().join("toptea_2026-01-03.log").exists());
        assert!(dir.path().join("notes.txt").exists());
        Ok(())
    }
}
