use crate::config::ProcessSpec;
use crate::error::Result;
use crate::logs::{LogStream, LogWriter};
use tracing::warn;

/// Routes one process's output streams and lifecycle events to its log files
pub struct LogRouter {
    name: String,
    stdout: LogWriter,
    stderr: LogWriter,
}

impl LogRouter {
    /// Open both log files for a spec. Relative paths resolve against the
    /// spec's working directory.
    pub async fn open(spec: &ProcessSpec) -> Result<Self> {
        let stdout_path = spec.resolve_path(&spec.stdout_path);
        let stderr_path = spec.resolve_path(&spec.stderr_path);

        let stdout = LogWriter::open(&stdout_path, &spec.log_date_format).await?;
        let stderr = LogWriter::open(&stderr_path, &spec.log_date_format).await?;

        Ok(Self {
            name: spec.name.clone(),
            stdout,
            stderr,
        })
    }

    /// Write a line to the file for `stream`; events go to the stdout file.
    /// Write failures are logged and the line dropped.
    pub async fn write(&mut self, stream: LogStream, data: &[u8]) {
        let writer = match stream {
            LogStream::Stdout | LogStream::Event => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        };

        if let Err(e) = writer.write_line(stream, data).await {
            warn!(
                process = %self.name,
                stream = %stream,
                path = %writer.path().display(),
                error = %e,
                "dropping log line"
            );
        }
    }

    pub async fn event(&mut self, message: &str) {
        self.write(LogStream::Event, message.as_bytes()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_routes_streams_to_their_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = ProcessSpec::new("router", "/bin/true", "logs/out.log", "logs/err.log");
        spec.working_dir = Some(temp_dir.path().to_path_buf());

        let mut router = LogRouter::open(&spec).await.unwrap();
        router.write(LogStream::Stdout, b"to stdout").await;
        router.write(LogStream::Stderr, b"to stderr").await;
        router.event("started pid=99").await;

        let out = std::fs::read_to_string(temp_dir.path().join("logs/out.log")).unwrap();
        let err = std::fs::read_to_string(temp_dir.path().join("logs/err.log")).unwrap();

        assert!(out.contains(" out to stdout"));
        assert!(out.contains(" event started pid=99"));
        assert!(!out.contains("to stderr"));
        assert!(err.contains(" err to stderr"));
    }

    #[tokio::test]
    async fn test_shared_path_for_both_streams() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("combined.log");
        let spec = ProcessSpec::new("combined", "/bin/true", &path, &path);

        let mut router = LogRouter::open(&spec).await.unwrap();
        router.write(LogStream::Stdout, b"one").await;
        router.write(LogStream::Stderr, b"two").await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
