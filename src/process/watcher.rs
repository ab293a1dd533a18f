use crate::config::ProcessSpec;
use crate::error::TendError;
use crate::logs::{LogRouter, LogStream};
use crate::process::coordinator::Message;
use crate::process::monitor::MemoryProbe;
use crate::process::signal::{parse_signal, send_signal};
use crate::process::spawner::{spawn_process, SpawnedProcess};
use crate::process::types::ExitInfo;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::spawn_blocking;
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How long to keep draining pipes after exit; grandchildren may hold them open
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Longest line buffered from a child; longer output is logged in chunks
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Requests from the coordinator to a watcher
#[derive(Debug)]
pub(crate) enum WatcherCommand {
    Stop,
}

/// What a watcher tells the coordinator about its handle
#[derive(Debug)]
pub(crate) enum WatcherReport {
    LogOpenFailed(TendError),
    SpawnFailed(TendError),
    Spawned {
        pid: u32,
    },
    MemorySampled {
        resident_bytes: u64,
    },
    MemoryExceeded {
        pid: u32,
        resident_bytes: u64,
        limit_bytes: u64,
    },
    Exited {
        exit: ExitInfo,
    },
}

/// Per-handle task: opens logs, spawns the child, pumps its output, samples
/// memory, executes stop requests and reports the exit. Output is pumped for
/// the whole life of the child, including the grace period after a stop.
pub(crate) struct Watcher {
    name: String,
    generation: u64,
    spec: Arc<ProcessSpec>,
    probe: Arc<dyn MemoryProbe>,
    sample_interval: Duration,
    reports: mpsc::UnboundedSender<Message>,
    commands: mpsc::UnboundedReceiver<WatcherCommand>,
}

impl Watcher {
    pub(crate) fn new(
        generation: u64,
        spec: Arc<ProcessSpec>,
        probe: Arc<dyn MemoryProbe>,
        sample_interval: Duration,
        reports: mpsc::UnboundedSender<Message>,
        commands: mpsc::UnboundedReceiver<WatcherCommand>,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            generation,
            spec,
            probe,
            sample_interval,
            reports,
            commands,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut router = match LogRouter::open(&self.spec).await {
            Ok(router) => router,
            Err(e) => {
                self.report(WatcherReport::LogOpenFailed(e));
                return;
            }
        };

        let SpawnedProcess { mut child, pid } = match spawn_process(&self.spec) {
            Ok(spawned) => spawned,
            Err(e) => {
                router.event(&format!("spawn failed: {}", e)).await;
                self.report(WatcherReport::SpawnFailed(e));
                return;
            }
        };

        router
            .event(&format!("started pid={} command={}", pid, self.spec.command))
            .await;
        self.report(WatcherReport::Spawned { pid });

        let mut stdout = child.stdout.take().map(BufReader::new);
        let mut stderr = child.stderr.take().map(BufReader::new);
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();

        let mut ticker = interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut limit_reported = false;

        // Set once a stop is requested; output keeps flowing until the exit
        let mut kill_at: Option<Instant> = None;
        let mut killed = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                read = read_line(&mut stdout, &mut out_buf), if stdout.is_some() => {
                    if !pump(&mut router, LogStream::Stdout, read, &mut out_buf).await {
                        stdout = None;
                    }
                }
                read = read_line(&mut stderr, &mut err_buf), if stderr.is_some() => {
                    if !pump(&mut router, LogStream::Stderr, read, &mut err_buf).await {
                        stderr = None;
                    }
                }
                command = self.commands.recv(), if kill_at.is_none() => {
                    // A closed channel means the coordinator dropped this handle
                    if command.is_none() {
                        debug!(process = %self.name, "control channel closed, stopping");
                    }
                    kill_at = Some(self.begin_stop(pid, &mut router).await);
                }
                _ = deadline(kill_at), if kill_at.is_some() && !killed => {
                    killed = true;
                    warn!(process = %self.name, pid, "process still running after stop signal, sending SIGKILL");
                    router.event("sending SIGKILL").await;
                    if let Err(e) = child.start_kill() {
                        warn!(process = %self.name, pid, error = %e, "failed to send SIGKILL");
                    }
                }
                _ = ticker.tick(), if kill_at.is_none() => {
                    let Some(resident_bytes) = self.sample_memory(pid).await else {
                        continue;
                    };
                    self.report(WatcherReport::MemorySampled { resident_bytes });

                    if let Some(limit_bytes) = self.spec.memory_limit_bytes {
                        if resident_bytes > limit_bytes && !limit_reported {
                            limit_reported = true;
                            router
                                .event(&format!(
                                    "memory limit exceeded: {} bytes resident, limit {} bytes",
                                    resident_bytes, limit_bytes
                                ))
                                .await;
                            self.report(WatcherReport::MemoryExceeded {
                                pid,
                                resident_bytes,
                                limit_bytes,
                            });
                        }
                    }
                }
            }
        };

        if kill_at.is_some() && !killed {
            info!(process = %self.name, pid, "process exited within grace period");
        }

        let drain = async {
            while stdout.is_some() || stderr.is_some() {
                tokio::select! {
                    read = read_line(&mut stdout, &mut out_buf), if stdout.is_some() => {
                        if !pump(&mut router, LogStream::Stdout, read, &mut out_buf).await {
                            stdout = None;
                        }
                    }
                    read = read_line(&mut stderr, &mut err_buf), if stderr.is_some() => {
                        if !pump(&mut router, LogStream::Stderr, read, &mut err_buf).await {
                            stderr = None;
                        }
                    }
                }
            }
        };
        if timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            debug!(process = %self.name, "output pipes still open after exit");
        }

        let exit = match status {
            Ok(status) => ExitInfo::from(status),
            Err(e) => {
                warn!(process = %self.name, pid, error = %e, "failed to collect exit status");
                ExitInfo::not_started()
            }
        };

        router.event(&format!("exited pid={} {}", pid, exit)).await;
        self.report(WatcherReport::Exited { exit });
    }

    /// Send the stop signal and return the SIGKILL deadline. A signal that
    /// cannot be delivered makes the deadline immediate.
    async fn begin_stop(&self, pid: u32, router: &mut LogRouter) -> Instant {
        let grace = self.spec.stop_timeout();
        router
            .event(&format!(
                "stopping with {} (grace period {:?})",
                self.spec.stop_signal, grace
            ))
            .await;

        let signalled = parse_signal(&self.spec.stop_signal).and_then(|sig| send_signal(pid, sig));
        match signalled {
            Ok(()) => Instant::now() + grace,
            Err(e) => {
                warn!(process = %self.name, pid, error = %e, "stop signal failed, forcing termination");
                Instant::now()
            }
        }
    }

    /// Sample resident memory on the blocking pool; the probe reads /proc
    async fn sample_memory(&self, pid: u32) -> Option<u64> {
        let probe = Arc::clone(&self.probe);
        match spawn_blocking(move || probe.resident_bytes(pid)).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(process = %self.name, pid, error = %e, "memory sample failed");
                None
            }
        }
    }

    fn report(&self, report: WatcherReport) {
        let message = Message::Report {
            name: self.name.clone(),
            generation: self.generation,
            report,
        };
        if self.reports.send(message).is_err() {
            debug!(process = %self.name, "coordinator gone, dropping report");
        }
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Read one line into `buf`, or a `MAX_LINE_BYTES` chunk of a longer one.
///
/// Bytes are only consumed from the reader once copied into `buf`, so a
/// dropped call loses nothing and the next call resumes the same line.
async fn read_line<R>(reader: &mut Option<R>, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let Some(reader) = reader else {
        return std::future::pending().await;
    };

    let mut read = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read);
        }

        let room = MAX_LINE_BYTES.saturating_sub(buf.len());
        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(newline) if newline < room => (newline + 1, true),
            _ => {
                let used = available.len().min(room);
                (used, buf.len() + used >= MAX_LINE_BYTES)
            }
        };

        buf.extend_from_slice(&available[..used]);
        reader.consume(used);
        read += used;

        if complete {
            return Ok(read);
        }
    }
}

/// Forward a read line to the router. Returns false once the stream is done.
async fn pump(
    router: &mut LogRouter,
    stream: LogStream,
    read: io::Result<usize>,
    buf: &mut Vec<u8>,
) -> bool {
    match read {
        Ok(0) => {
            // Unterminated tail left by an earlier cancelled read
            if !buf.is_empty() {
                router.write(stream, buf).await;
                buf.clear();
            }
            false
        }
        Ok(_) => {
            router.write(stream, buf).await;
            buf.clear();
            true
        }
        Err(e) => {
            warn!(stream = %stream, error = %e, "failed to read process output");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_line_splits_on_newline() {
        let data = b"first\nsecond\nno newline".to_vec();
        let mut reader = Some(BufReader::new(&data[..]));
        let mut buf = Vec::new();

        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), 6);
        assert_eq!(buf, b"first\n");
        buf.clear();

        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), 7);
        assert_eq!(buf, b"second\n");
        buf.clear();

        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), 10);
        assert_eq!(buf, b"no newline");
        buf.clear();

        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_line_caps_unterminated_output() {
        let data = vec![b'x'; MAX_LINE_BYTES * 2 + 10];
        let mut reader = Some(BufReader::new(&data[..]));
        let mut buf = Vec::new();

        let mut chunks = Vec::new();
        loop {
            let read = read_line(&mut reader, &mut buf).await.unwrap();
            if read == 0 {
                break;
            }
            assert!(buf.len() <= MAX_LINE_BYTES);
            chunks.push(buf.len());
            buf.clear();
        }

        assert_eq!(chunks, vec![MAX_LINE_BYTES, MAX_LINE_BYTES, 10]);
    }

    #[tokio::test]
    async fn test_read_line_caps_long_line_before_newline() {
        let mut data = vec![b'y'; MAX_LINE_BYTES + 5];
        data.extend_from_slice(b"\nnext\n");
        let mut reader = Some(BufReader::new(&data[..]));
        let mut buf = Vec::new();

        read_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf.len(), MAX_LINE_BYTES);
        buf.clear();

        read_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"yyyyy\n");
        buf.clear();

        read_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"next\n");
    }
}
