use crate::config::{ProcessSpec, SupervisorSettings};
use crate::error::{Result, TendError};
use crate::process::events::SupervisorEvent;
use crate::process::monitor::MemoryProbe;
use crate::process::restart::{RestartAction, RestartPolicy};
use crate::process::types::{Disposition, ExitInfo, ProcessHandle, ProcessState, ProcessStatus};
use crate::process::watcher::{Watcher, WatcherCommand, WatcherReport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Everything the coordinating loop consumes: operator requests, watcher
/// reports and restart timers share one queue.
pub(crate) enum Message {
    Start {
        spec: ProcessSpec,
        respond_to: oneshot::Sender<Result<u32>>,
    },
    Stop {
        name: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Remove {
        name: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    ResetRestarts {
        name: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Status {
        name: String,
        respond_to: oneshot::Sender<Result<ProcessStatus>>,
    },
    List {
        respond_to: oneshot::Sender<Vec<ProcessStatus>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
    Report {
        name: String,
        generation: u64,
        report: WatcherReport,
    },
    RestartDue {
        name: String,
        token: u64,
    },
}

/// Table row: a spec, its current handle and supervision bookkeeping
struct Entry {
    spec: Arc<ProcessSpec>,
    handle: Option<ProcessHandle>,
    control: Option<mpsc::UnboundedSender<WatcherCommand>>,
    disposition: Disposition,
    restart_count: u32,
    rapid_failures: u32,
    pending_restart: Option<u64>,
    start_waiter: Option<oneshot::Sender<Result<u32>>>,
    stop_waiters: Vec<oneshot::Sender<Result<()>>>,
    remove_on_exit: bool,
}

impl Entry {
    fn new(spec: ProcessSpec) -> Self {
        Self {
            spec: Arc::new(spec),
            handle: None,
            control: None,
            disposition: Disposition::Supervised,
            restart_count: 0,
            rapid_failures: 0,
            pending_restart: None,
            start_waiter: None,
            stop_waiters: Vec::new(),
            remove_on_exit: false,
        }
    }

    fn handle_live(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| h.state.is_live())
            .unwrap_or(false)
    }

    /// Live handle or a restart on its way
    fn is_live(&self) -> bool {
        self.handle_live() || self.pending_restart.is_some()
    }

    /// Ask the live handle to stop. Returns false if there is nothing to stop.
    fn request_stop(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };

        match handle.state {
            ProcessState::Starting | ProcessState::Running => {
                handle.mark_stopping();
                if let Some(control) = &self.control {
                    // A closed channel means the exit report is already queued
                    let _ = control.send(WatcherCommand::Stop);
                }
                true
            }
            ProcessState::Stopping => true,
            ProcessState::Exited => false,
        }
    }

    fn status(&self) -> ProcessStatus {
        let handle = self.handle.as_ref();
        let live = self.handle_live();
        ProcessStatus {
            name: self.spec.name.clone(),
            state: handle.map(|h| h.state),
            disposition: self.disposition.clone(),
            pid: handle.and_then(|h| h.pid),
            started_at: handle.map(|h| h.started_at),
            uptime: handle.filter(|_| live).map(|h| h.uptime()),
            restart_count: self.restart_count,
            last_exit: handle.and_then(|h| h.last_exit),
            memory_bytes: handle.filter(|_| live).and_then(|h| h.memory_bytes),
            restart_pending: self.pending_restart.is_some(),
        }
    }
}

fn emit(events: &broadcast::Sender<SupervisorEvent>, event: SupervisorEvent) {
    // No subscribers is fine
    let _ = events.send(event);
}

/// Single owner of the spec/handle table
pub(crate) struct Coordinator {
    entries: HashMap<String, Entry>,
    policy: RestartPolicy,
    settings: SupervisorSettings,
    probe: Arc<dyn MemoryProbe>,
    inbox: mpsc::UnboundedReceiver<Message>,
    outbox: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<SupervisorEvent>,
    next_generation: u64,
    next_token: u64,
    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Coordinator {
    pub(crate) fn new(
        settings: SupervisorSettings,
        probe: Arc<dyn MemoryProbe>,
        inbox: mpsc::UnboundedReceiver<Message>,
        outbox: mpsc::UnboundedSender<Message>,
        events: broadcast::Sender<SupervisorEvent>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            policy: RestartPolicy::from_settings(&settings.restart),
            settings,
            probe,
            inbox,
            outbox,
            events,
            next_generation: 1,
            next_token: 1,
            shutting_down: false,
            shutdown_waiters: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            sample_interval_ms = self.settings.memory_sample_interval_ms,
            "supervisor started"
        );

        while let Some(message) = self.inbox.recv().await {
            self.handle(message);

            if self.shutting_down && !self.entries.values().any(Entry::handle_live) {
                break;
            }
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!("supervisor stopped");
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Start { spec, respond_to } => self.handle_start(spec, respond_to),
            Message::Stop { name, respond_to } => self.handle_stop(&name, respond_to),
            Message::Remove { name, respond_to } => self.handle_remove(&name, respond_to),
            Message::ResetRestarts { name, respond_to } => {
                let result = match self.entries.get_mut(&name) {
                    Some(entry) => {
                        entry.restart_count = 0;
                        entry.rapid_failures = 0;
                        if let Some(handle) = entry.handle.as_mut() {
                            handle.restart_count = 0;
                        }
                        info!(process = %name, "restart count reset");
                        Ok(())
                    }
                    None => Err(TendError::ProcessNotFound(name)),
                };
                let _ = respond_to.send(result);
            }
            Message::Status { name, respond_to } => {
                let result = self
                    .entries
                    .get(&name)
                    .map(Entry::status)
                    .ok_or(TendError::ProcessNotFound(name));
                let _ = respond_to.send(result);
            }
            Message::List { respond_to } => {
                let mut statuses: Vec<ProcessStatus> =
                    self.entries.values().map(Entry::status).collect();
                statuses.sort_by(|a, b| a.name.cmp(&b.name));
                let _ = respond_to.send(statuses);
            }
            Message::Shutdown { respond_to } => self.handle_shutdown(respond_to),
            Message::Report {
                name,
                generation,
                report,
            } => self.handle_report(&name, generation, report),
            Message::RestartDue { name, token } => self.handle_restart_due(&name, token),
        }
    }

    fn handle_start(&mut self, spec: ProcessSpec, respond_to: oneshot::Sender<Result<u32>>) {
        if self.shutting_down {
            let _ = respond_to.send(Err(TendError::ShuttingDown));
            return;
        }
        if let Err(e) = spec.validate() {
            let _ = respond_to.send(Err(e));
            return;
        }

        let name = spec.name.clone();
        if self.entries.get(&name).map(Entry::is_live).unwrap_or(false) {
            let _ = respond_to.send(Err(TendError::DuplicateName(name)));
            return;
        }

        // Re-registering keeps restart_count; only an explicit reset clears it
        let entry = self
            .entries
            .entry(name.clone())
            .or_insert_with(|| Entry::new(spec.clone()));
        entry.spec = Arc::new(spec);
        entry.disposition = Disposition::Supervised;
        entry.remove_on_exit = false;
        entry.start_waiter = Some(respond_to);

        self.launch(&name);
    }

    /// Create a Starting handle and hand it to a new watcher task
    fn launch(&mut self, name: &str) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        entry.handle = Some(ProcessHandle::starting(
            name.to_string(),
            generation,
            entry.restart_count,
        ));
        entry.control = Some(control_tx);

        let watcher = Watcher::new(
            generation,
            Arc::clone(&entry.spec),
            Arc::clone(&self.probe),
            self.settings.memory_sample_interval(),
            self.outbox.clone(),
            control_rx,
        );
        tokio::spawn(watcher.run());

        debug!(process = %name, generation, restart_count = entry.restart_count, "launching");
    }

    fn handle_stop(&mut self, name: &str, respond_to: oneshot::Sender<Result<()>>) {
        let Some(entry) = self.entries.get_mut(name) else {
            let _ = respond_to.send(Err(TendError::ProcessNotFound(name.to_string())));
            return;
        };

        if entry.disposition == Disposition::Supervised {
            entry.disposition = Disposition::Stopped;
        }
        let cancelled = entry.pending_restart.take().is_some();

        if entry.request_stop() {
            info!(process = %name, "stopping");
            entry.stop_waiters.push(respond_to);
            return;
        }

        // Already exited: nothing to wait for
        if cancelled {
            info!(process = %name, "pending restart cancelled");
            emit(
                &self.events,
                SupervisorEvent::Stopped {
                    name: name.to_string(),
                },
            );
        }
        if entry.remove_on_exit {
            self.entries.remove(name);
            info!(process = %name, "removed");
        }
        let _ = respond_to.send(Ok(()));
    }

    fn handle_remove(&mut self, name: &str, respond_to: oneshot::Sender<Result<()>>) {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.remove_on_exit = true;
                self.handle_stop(name, respond_to);
            }
            None => {
                let _ = respond_to.send(Err(TendError::ProcessNotFound(name.to_string())));
            }
        }
    }

    fn handle_shutdown(&mut self, respond_to: oneshot::Sender<()>) {
        info!(processes = self.entries.len(), "shutting down");
        self.shutting_down = true;
        self.shutdown_waiters.push(respond_to);

        for entry in self.entries.values_mut() {
            if entry.disposition == Disposition::Supervised {
                entry.disposition = Disposition::Stopped;
            }
            entry.pending_restart = None;
            entry.request_stop();
        }
    }

    fn handle_restart_due(&mut self, name: &str, token: u64) {
        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };

        if entry.pending_restart != Some(token)
            || entry.disposition != Disposition::Supervised
            || self.shutting_down
        {
            debug!(process = %name, token, "stale restart timer");
            return;
        }

        entry.pending_restart = None;
        entry.restart_count += 1;
        info!(process = %name, restart_count = entry.restart_count, "restarting after backoff");
        self.launch(name);
    }

    fn handle_report(&mut self, name: &str, generation: u64, report: WatcherReport) {
        let Some(entry) = self.entries.get_mut(name) else {
            debug!(process = %name, generation, "report for removed process");
            return;
        };
        let Some(handle) = entry
            .handle
            .as_mut()
            .filter(|handle| handle.generation == generation)
        else {
            debug!(process = %name, generation, "stale report");
            return;
        };

        match report {
            WatcherReport::Spawned { pid } => {
                handle.mark_running(pid);
                info!(process = %name, pid, restart_count = entry.restart_count, "process started");
                if let Some(waiter) = entry.start_waiter.take() {
                    let _ = waiter.send(Ok(pid));
                }
                emit(
                    &self.events,
                    SupervisorEvent::Spawned {
                        name: name.to_string(),
                        pid,
                        restart_count: entry.restart_count,
                    },
                );
            }
            WatcherReport::MemorySampled { resident_bytes } => {
                handle.memory_bytes = Some(resident_bytes);
            }
            WatcherReport::MemoryExceeded {
                pid,
                resident_bytes,
                limit_bytes,
            } => {
                handle.memory_bytes = Some(resident_bytes);
                // Only a Running handle reacts; a stop already in flight wins
                if handle.state != ProcessState::Running {
                    debug!(process = %name, pid, state = %handle.state, "memory report ignored");
                    return;
                }
                warn!(
                    process = %name,
                    pid,
                    resident_bytes,
                    limit_bytes,
                    "memory limit exceeded, restarting"
                );
                emit(
                    &self.events,
                    SupervisorEvent::MemoryLimitExceeded {
                        name: name.to_string(),
                        pid,
                        resident_bytes,
                        limit_bytes,
                    },
                );
                entry.request_stop();
            }
            WatcherReport::SpawnFailed(e) => {
                handle.mark_exited(ExitInfo::not_started());
                entry.control = None;
                error!(process = %name, error = %e, "spawn failed");
                emit(
                    &self.events,
                    SupervisorEvent::SpawnFailed {
                        name: name.to_string(),
                        error: e.to_string(),
                    },
                );
                if let Some(waiter) = entry.start_waiter.take() {
                    let _ = waiter.send(Err(e));
                }
                self.after_exit(name);
            }
            WatcherReport::LogOpenFailed(e) => {
                handle.mark_exited(ExitInfo::not_started());
                entry.control = None;
                entry.disposition = Disposition::Failed(e.to_string());
                error!(process = %name, error = %e, "cannot open log files, process marked failed");
                emit(
                    &self.events,
                    SupervisorEvent::LogOpenFailed {
                        name: name.to_string(),
                        error: e.to_string(),
                    },
                );
                if let Some(waiter) = entry.start_waiter.take() {
                    let _ = waiter.send(Err(e));
                }
                self.after_exit(name);
            }
            WatcherReport::Exited { exit } => {
                let pid = handle.pid;
                handle.mark_exited(exit);
                entry.control = None;
                info!(process = %name, pid = ?pid, exit = %exit, "process exited");
                emit(
                    &self.events,
                    SupervisorEvent::Exited {
                        name: name.to_string(),
                        pid,
                        exit,
                    },
                );
                self.after_exit(name);
            }
        }
    }

    /// Settle waiters, then apply the restart policy if still supervised
    fn after_exit(&mut self, name: &str) {
        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };

        for waiter in entry.stop_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        if entry.remove_on_exit {
            self.entries.remove(name);
            info!(process = %name, "removed");
            return;
        }

        match entry.disposition {
            Disposition::Supervised => {}
            Disposition::Stopped => {
                info!(process = %name, "process stopped");
                emit(
                    &self.events,
                    SupervisorEvent::Stopped {
                        name: name.to_string(),
                    },
                );
                return;
            }
            Disposition::GaveUp | Disposition::Failed(_) => return,
        }

        let Some(handle) = entry.handle.as_ref() else {
            return;
        };
        let decision = self.policy.decide_with_streak(
            entry.restart_count,
            entry.rapid_failures,
            handle.last_exit.and_then(|exit| exit.code),
            handle.uptime(),
        );

        match decision.action {
            RestartAction::Restart => {
                entry.restart_count += 1;
                entry.rapid_failures = 0;
                info!(
                    process = %name,
                    restart_count = entry.restart_count,
                    reason = %decision.reason,
                    "restarting"
                );
                emit(
                    &self.events,
                    SupervisorEvent::RestartScheduled {
                        name: name.to_string(),
                        delay: std::time::Duration::ZERO,
                        restart_count: entry.restart_count,
                        reason: decision.reason,
                    },
                );
                self.launch(name);
            }
            RestartAction::Delay(delay) => {
                let token = self.next_token;
                self.next_token += 1;
                entry.pending_restart = Some(token);
                entry.rapid_failures = entry.rapid_failures.saturating_add(1);
                warn!(
                    process = %name,
                    delay_ms = delay.as_millis() as u64,
                    reason = %decision.reason,
                    "rapid failure, backing off"
                );
                emit(
                    &self.events,
                    SupervisorEvent::RestartScheduled {
                        name: name.to_string(),
                        delay,
                        restart_count: entry.restart_count + 1,
                        reason: decision.reason,
                    },
                );

                let outbox = self.outbox.clone();
                let name = name.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = outbox.send(Message::RestartDue { name, token });
                });
            }
            RestartAction::Stop => {
                entry.disposition = Disposition::GaveUp;
                warn!(process = %name, reason = %decision.reason, "restart policy gave up");
                emit(
                    &self.events,
                    SupervisorEvent::GaveUp {
                        name: name.to_string(),
                        reason: decision.reason,
                    },
                );
            }
        }
    }
}
