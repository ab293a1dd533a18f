use crate::config::{ProcessSpec, SupervisorSettings};
use crate::error::{Result, TendError};
use crate::process::coordinator::{Coordinator, Message};
use crate::process::events::SupervisorEvent;
use crate::process::monitor::{MemoryProbe, SysinfoProbe};
use crate::process::types::ProcessStatus;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// Handle to a running supervisor.
///
/// Cloning is cheap; every clone talks to the same coordinating loop, which
/// serializes all registration, exit handling and restart decisions. The loop
/// keeps running until [`Supervisor::shutdown`] is called.
#[derive(Clone)]
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    /// Start a supervisor sampling memory through sysinfo.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(settings: SupervisorSettings) -> Self {
        Self::with_probe(settings, Arc::new(SysinfoProbe::new()))
    }

    /// Start a supervisor with a custom memory probe
    pub fn with_probe(settings: SupervisorSettings, probe: Arc<dyn MemoryProbe>) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let coordinator = Coordinator::new(settings, probe, inbox, commands.clone(), events.clone());
        tokio::spawn(coordinator.run());

        Self { commands, events }
    }

    /// Register a spec and spawn it.
    ///
    /// Resolves to the pid once the OS confirms creation. Fails with
    /// `DuplicateName` if the name is already live, `SpawnError` if the OS
    /// refuses (the restart policy still runs), or `LogOpenError` if the log
    /// files cannot be opened (the process is then marked failed).
    pub async fn start(&self, spec: ProcessSpec) -> Result<u32> {
        self.request(|respond_to| Message::Start { spec, respond_to })
            .await?
    }

    /// Start every spec; one failure does not prevent the others
    pub async fn start_all<I>(&self, specs: I) -> Vec<(String, Result<u32>)>
    where
        I: IntoIterator<Item = ProcessSpec>,
    {
        let mut results = Vec::new();
        for spec in specs {
            let name = spec.name.clone();
            let result = self.start(spec).await;
            results.push((name, result));
        }
        results
    }

    /// Stop a process: stop signal, grace period, then SIGKILL.
    ///
    /// Resolves once the exit has been processed. Stopping an exited process
    /// is a no-op.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|respond_to| Message::Stop { name, respond_to })
            .await?
    }

    /// Stop a process if needed and drop its spec
    pub async fn remove(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|respond_to| Message::Remove { name, respond_to })
            .await?
    }

    /// Operator reset of a spec's restart count
    pub async fn reset_restarts(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|respond_to| Message::ResetRestarts { name, respond_to })
            .await?
    }

    pub async fn status(&self, name: &str) -> Result<ProcessStatus> {
        let name = name.to_string();
        self.request(|respond_to| Message::Status { name, respond_to })
            .await?
    }

    /// Snapshots of every registered spec, sorted by name
    pub async fn list(&self) -> Result<Vec<ProcessStatus>> {
        self.request(|respond_to| Message::List { respond_to }).await
    }

    /// Subscribe to supervision events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Stop every process and end the coordinating loop.
    ///
    /// Later calls on any clone fail with `ShuttingDown`.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|respond_to| Message::Shutdown { respond_to })
            .await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(build(respond_to))
            .map_err(|_| TendError::ShuttingDown)?;
        response.await.map_err(|_| TendError::ShuttingDown)
    }
}
