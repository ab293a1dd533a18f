use serde::{Deserialize, Serialize};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Exited,
}

impl ProcessState {
    /// Whether a handle in this state may still have an OS process behind it
    pub fn is_live(self) -> bool {
        !matches!(self, ProcessState::Exited)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Exited => write!(f, "exited"),
        }
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Exit record for a process that never came up
    pub fn not_started() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "not started"),
        }
    }
}

/// Supervision outcome of a spec, independent of its current handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Exits are fed to the restart policy
    Supervised,
    /// Stopped by the operator
    Stopped,
    /// The restart policy gave up
    GaveUp,
    /// Fatal per-spec failure, such as an unwritable log path
    Failed(String),
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Supervised => write!(f, "supervised"),
            Disposition::Stopped => write!(f, "stopped"),
            Disposition::GaveUp => write!(f, "gave up"),
            Disposition::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Runtime record of one spawned instance of a spec
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    /// Name of the process spec this handle belongs to
    pub name: String,
    /// Supervisor-wide handle counter; watcher reports carry it
    pub generation: u64,
    pub pid: Option<u32>,
    pub started_at: SystemTime,
    pub started: Instant,
    pub state: ProcessState,
    pub last_exit: Option<ExitInfo>,
    pub restart_count: u32,
    pub memory_bytes: Option<u64>,
}

impl ProcessHandle {
    pub fn starting(name: String, generation: u64, restart_count: u32) -> Self {
        Self {
            name,
            generation,
            pid: None,
            started_at: SystemTime::now(),
            started: Instant::now(),
            state: ProcessState::Starting,
            last_exit: None,
            restart_count,
            memory_bytes: None,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn mark_running(&mut self, pid: u32) {
        self.pid = Some(pid);
        if self.state == ProcessState::Starting {
            self.state = ProcessState::Running;
        }
    }

    pub fn mark_stopping(&mut self) {
        self.state = ProcessState::Stopping;
    }

    pub fn mark_exited(&mut self, exit: ExitInfo) {
        self.state = ProcessState::Exited;
        self.last_exit = Some(exit);
    }
}

/// Snapshot of a spec and its current handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub name: String,
    pub state: Option<ProcessState>,
    pub disposition: Disposition,
    pub pid: Option<u32>,
    pub started_at: Option<SystemTime>,
    pub uptime: Option<Duration>,
    pub restart_count: u32,
    pub last_exit: Option<ExitInfo>,
    pub memory_bytes: Option<u64>,
    pub restart_pending: bool,
}

impl ProcessStatus {
    /// Whether an OS process is (or may be) alive for this spec
    pub fn is_live(&self) -> bool {
        self.state.map(ProcessState::is_live).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_lifecycle() {
        let mut handle = ProcessHandle::starting("web".to_string(), 7, 2);
        assert_eq!(handle.state, ProcessState::Starting);
        assert_eq!(handle.pid, None);

        handle.mark_running(4242);
        assert_eq!(handle.state, ProcessState::Running);
        assert_eq!(handle.pid, Some(4242));

        handle.mark_stopping();
        handle.mark_exited(ExitInfo {
            code: Some(0),
            signal: None,
        });
        assert_eq!(handle.state, ProcessState::Exited);
        assert!(handle.last_exit.unwrap().success());
        assert_eq!(handle.restart_count, 2);
    }

    #[test]
    fn test_running_does_not_override_stopping() {
        let mut handle = ProcessHandle::starting("web".to_string(), 1, 0);
        handle.mark_stopping();
        handle.mark_running(10);
        assert_eq!(handle.state, ProcessState::Stopping);
        assert_eq!(handle.pid, Some(10));
    }

    #[test]
    fn test_exit_info_display() {
        let by_code = ExitInfo {
            code: Some(3),
            signal: None,
        };
        let by_signal = ExitInfo {
            code: None,
            signal: Some(9),
        };
        assert_eq!(by_code.to_string(), "code 3");
        assert_eq!(by_signal.to_string(), "signal 9");
        assert_eq!(ExitInfo::not_started().to_string(), "not started");
        assert!(ProcessState::Stopping.is_live());
        assert!(!ProcessState::Exited.is_live());
    }
}
