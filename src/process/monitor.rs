use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of resident memory samples for a pid
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in bytes, or `None` if the pid is gone
    fn resident_bytes(&self, pid: u32) -> Option<u64>;
}

/// Memory probe backed by sysinfo
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn resident_bytes(&self, pid: u32) -> Option<u64> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        system.process(sys_pid).map(|process| process.memory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_sample_live_process() {
        let probe = SysinfoProbe::new();

        let mut child = Command::new("/bin/sleep")
            .arg("5")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");

        let rss = probe.resident_bytes(pid);
        assert!(rss.unwrap_or(0) > 0);

        child.kill().await.expect("Failed to kill process");
    }

    #[tokio::test]
    async fn test_sample_dead_process() {
        let probe = SysinfoProbe::new();

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");
        let _ = child.wait().await;

        assert_eq!(probe.resident_bytes(pid), None);
    }
}
