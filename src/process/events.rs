use crate::process::types::ExitInfo;
use serde::Serialize;
use std::time::Duration;

/// Observable supervision events, published on the supervisor's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Spawned {
        name: String,
        pid: u32,
        restart_count: u32,
    },
    SpawnFailed {
        name: String,
        error: String,
    },
    Exited {
        name: String,
        pid: Option<u32>,
        exit: ExitInfo,
    },
    RestartScheduled {
        name: String,
        delay: Duration,
        restart_count: u32,
        reason: String,
    },
    GaveUp {
        name: String,
        reason: String,
    },
    MemoryLimitExceeded {
        name: String,
        pid: u32,
        resident_bytes: u64,
        limit_bytes: u64,
    },
    LogOpenFailed {
        name: String,
        error: String,
    },
    Stopped {
        name: String,
    },
}

impl SupervisorEvent {
    /// Name of the process the event concerns
    pub fn name(&self) -> &str {
        match self {
            SupervisorEvent::Spawned { name, .. }
            | SupervisorEvent::SpawnFailed { name, .. }
            | SupervisorEvent::Exited { name, .. }
            | SupervisorEvent::RestartScheduled { name, .. }
            | SupervisorEvent::GaveUp { name, .. }
            | SupervisorEvent::MemoryLimitExceeded { name, .. }
            | SupervisorEvent::LogOpenFailed { name, .. }
            | SupervisorEvent::Stopped { name } => name,
        }
    }
}
