// Process module - spawning, supervision and restart policy

mod coordinator;
pub mod events;
pub mod monitor;
pub mod restart;
pub mod signal;
pub mod spawner;
mod supervisor;
pub mod types;
mod watcher;

pub use events::SupervisorEvent;
pub use monitor::{MemoryProbe, SysinfoProbe};
pub use restart::{RestartAction, RestartDecision, RestartPolicy};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::Supervisor;
pub use types::{Disposition, ExitInfo, ProcessHandle, ProcessState, ProcessStatus};
