use crate::config::ProcessSpec;
use crate::error::{TendError, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn a process from its spec
///
/// Applies arguments, working directory and environment, and pipes stdout and
/// stderr so the log router can consume them. The child is killed if the
/// returned handle is dropped without being waited on.
pub fn spawn_process(spec: &ProcessSpec) -> Result<SpawnedProcess> {
    let mut command = Command::new(&spec.command);

    command.args(&spec.args);

    if let Some(ref dir) = spec.working_dir {
        command.current_dir(dir);
    }

    command.envs(&spec.env);

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let child = command.spawn().map_err(|source| TendError::SpawnError {
        name: spec.name.clone(),
        source,
    })?;

    // A child that was reaped already has no id
    let pid = child.id().ok_or_else(|| TendError::SpawnError {
        name: spec.name.clone(),
        source: std::io::Error::new(std::io::ErrorKind::Other, "process exited before pid was read"),
    })?;

    Ok(SpawnedProcess { child, pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_spec(name: &str, command: &str) -> ProcessSpec {
        ProcessSpec::new(name, command, "/tmp/out.log", "/tmp/err.log")
    }

    #[tokio::test]
    async fn test_spawn_simple_process() {
        let spec = create_test_spec("test-echo", "/bin/echo");

        let spawned = spawn_process(&spec).unwrap();
        assert!(spawned.pid > 0);
    }

    #[tokio::test]
    async fn test_spawn_with_env_and_cwd() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = create_test_spec("test-env", "/bin/sh");
        spec.args = vec!["-c".to_string(), "echo \"$TEST_VAR $(pwd)\"".to_string()];
        spec.working_dir = Some(temp_dir.path().to_path_buf());
        spec.env
            .insert("TEST_VAR".to_string(), "test_value".to_string());

        let spawned = spawn_process(&spec).unwrap();
        let output = spawned.child.wait_with_output().await.unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);

        assert!(stdout.contains("test_value"));
        let dir_name = temp_dir.path().file_name().unwrap().to_string_lossy();
        assert!(stdout.contains(dir_name.as_ref()));
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let spec = create_test_spec("test-nonexistent", "/nonexistent/command");

        match spawn_process(&spec) {
            Err(TendError::SpawnError { name, source }) => {
                assert_eq!(name, "test-nonexistent");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("Expected SpawnError, got {:?}", other.map(|s| s.pid)),
        }
    }

    #[tokio::test]
    async fn test_spawn_captures_stdout_stderr() {
        let spec = create_test_spec("test-output", "/bin/echo");

        let spawned = spawn_process(&spec).unwrap();

        assert!(spawned.child.stdout.is_some());
        assert!(spawned.child.stderr.is_some());
    }
}
