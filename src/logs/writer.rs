use crate::error::{TendError, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{File as TokioFile, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Tag written after the timestamp on every line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
    Event,
}

impl LogStream {
    pub fn tag(self) -> &'static str {
        match self {
            LogStream::Stdout => "out",
            LogStream::Stderr => "err",
            LogStream::Event => "event",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Append-only log file writing `<timestamp> <stream> <text>` lines
pub struct LogWriter {
    path: PathBuf,
    file: TokioFile,
    date_format: String,
}

impl LogWriter {
    /// Open `path` for appending, creating parent directories as needed
    pub async fn open(path: &Path, date_format: &str) -> Result<Self> {
        let open_error = |source| TendError::LogOpenError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(open_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(open_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            date_format: date_format.to_string(),
        })
    }

    /// Write one line; a trailing newline in `data` is not duplicated
    pub async fn write_line(&mut self, stream: LogStream, data: &[u8]) -> Result<()> {
        let entry = self.format_log_entry(&Local::now(), stream, data);

        self.file
            .write_all(&entry)
            .await
            .map_err(|e| TendError::LogError(format!("Failed to write to {}: {}", self.path.display(), e)))?;

        self.file
            .flush()
            .await
            .map_err(|e| TendError::LogError(format!("Failed to flush {}: {}", self.path.display(), e)))?;

        Ok(())
    }

    fn format_log_entry(&self, timestamp: &DateTime<Local>, stream: LogStream, data: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(data);
        let text = text.trim_end_matches(['\n', '\r']);
        format!(
            "{} {} {}\n",
            timestamp.format(&self.date_format),
            stream.tag(),
            text
        )
        .into_bytes()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %z";

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/deeper/out.log");

        let writer = LogWriter::open(&path, FORMAT).await.unwrap();
        assert!(writer.path().exists());
    }

    #[tokio::test]
    async fn test_open_unwritable_path() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let result = LogWriter::open(&blocker.join("out.log"), FORMAT).await;
        assert!(matches!(result, Err(TendError::LogOpenError { .. })));
    }

    #[tokio::test]
    async fn test_lines_are_tagged_and_appended() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.log");
        std::fs::write(&path, "existing line\n").unwrap();

        let mut writer = LogWriter::open(&path, FORMAT).await.unwrap();
        writer.write_line(LogStream::Stdout, b"hello\n").await.unwrap();
        writer.write_line(LogStream::Event, b"started pid=1").await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "existing line");
        assert!(lines[1].ends_with(" out hello"));
        assert!(lines[2].ends_with(" event started pid=1"));
    }

    #[tokio::test]
    async fn test_format_uses_configured_date_format() {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::open(&temp_dir.path().join("err.log"), "%Y-%m-%d %H:%M")
            .await
            .unwrap();

        let timestamp = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let entry = writer.format_log_entry(&timestamp, LogStream::Stderr, b"boom\r\n");

        assert_eq!(String::from_utf8(entry).unwrap(), "2024-03-09 14:05 err boom\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_lossy() {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::open(&temp_dir.path().join("out.log"), "%H")
            .await
            .unwrap();

        let timestamp = Local.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let entry = writer.format_log_entry(&timestamp, LogStream::Stdout, b"ok \xff end");

        assert_eq!(String::from_utf8(entry).unwrap(), "08 out ok \u{fffd} end\n");
    }
}
