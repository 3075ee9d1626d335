//! Process supervision for one external decoder.
//!
//! A `ProcessSupervisor` owns the decoder's child process, plus the upstream
//! process when the decoder reads from a pipe (`rtl_fm | multimon-ng`).
//! Per run it spawns:
//!
//! - a stdout reader: bytes → `LineSplitter` → parser → ring buffer + event
//! - a stderr reader per process: lines become `last_error` candidates
//! - a monitor that owns the `Child` handles and waits for exit or a stop
//!   request
//!
//! State lives behind one mutex. Every run gets a new `generation`; `stop()`
//! and a manual `start()` bump it, and exit notifications and restart timers
//! carry the generation they were created for, so anything stale is a no-op.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use signalforge_core::lines::clean_line;
use signalforge_core::{now, Backoff, DecoderSpec, OutputRecord, RingBuffer, SignalError};

use crate::discovery;
use crate::events::{DecoderEvent, EventSink};
use crate::sbs::SbsBridge;
use crate::stream::for_each_line;

/// Time a process gets to exit after SIGTERM before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(3);

/// Ring buffer shared between a supervisor, the SBS bridge and the manager.
pub type SharedOutput = Arc<Mutex<RingBuffer<OutputRecord>>>;

pub fn new_output() -> SharedOutput {
    Arc::new(Mutex::new(RingBuffer::default()))
}

/// Append to a shared ring buffer.
pub fn push_output(output: &SharedOutput, record: OutputRecord) {
    let mut ring = output.lock().unwrap_or_else(|e| e.into_inner());
    ring.push(record);
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stopped,
    Running,
    /// Crashed; a restart is scheduled.
    Backoff,
}

/// Point-in-time view of a supervisor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub name: String,
    pub kind: String,
    pub command: String,
    pub available: bool,
    pub running: bool,
    pub phase: Phase,
    pub pid: Option<u32>,
    pub started_at: Option<f64>,
    pub messages_decoded: u64,
    pub last_message_at: Option<f64>,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub current_backoff_ms: u64,
}

struct RunState {
    running: bool,
    pid: Option<u32>,
    started_at: Option<f64>,
    messages_decoded: u64,
    last_message_at: Option<f64>,
    last_error: Option<String>,
    restart_count: u32,
    backoff: Backoff,
    generation: u64,
    restart_timer: Option<JoinHandle<()>>,
    stop_tx: Option<oneshot::Sender<()>>,
    /// Monitor tasks whose processes have not been reaped yet.
    monitors: usize,
}

/// The processes of one run. The source, if any, feeds `main`'s stdin.
struct ProcessGroup {
    main: Child,
    source: Option<Child>,
}

enum Exit {
    Natural(io::Result<ExitStatus>),
    Requested,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Supervises one decoder process (or pipe-chained pair).
///
/// Cheap to clone; clones share state. `start` and the restart timer spawn
/// tokio tasks and processes, so they must run inside a tokio runtime.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    spec: DecoderSpec,
    output: SharedOutput,
    sink: EventSink,
    /// SBS feed that lives exactly as long as this decoder runs.
    bridge: Option<SbsBridge>,
    state: Mutex<RunState>,
}

impl ProcessSupervisor {
    pub fn new(spec: DecoderSpec, output: SharedOutput, sink: EventSink) -> Self {
        ProcessSupervisor::with_bridge(spec, output, sink, None)
    }

    /// Like `new`, with an SBS bridge activated on every successful start
    /// and deactivated on every stop or exit.
    pub fn with_bridge(
        spec: DecoderSpec,
        output: SharedOutput,
        sink: EventSink,
        bridge: Option<SbsBridge>,
    ) -> Self {
        let backoff = Backoff::new(spec.base_backoff_ms, spec.max_backoff_ms);
        ProcessSupervisor {
            inner: Arc::new(Inner {
                spec,
                output,
                sink,
                bridge,
                state: Mutex::new(RunState {
                    running: false,
                    pid: None,
                    started_at: None,
                    messages_decoded: 0,
                    last_message_at: None,
                    last_error: None,
                    restart_count: 0,
                    backoff,
                    generation: 0,
                    restart_timer: None,
                    stop_tx: None,
                    monitors: 0,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    pub fn spec(&self) -> &DecoderSpec {
        &self.inner.spec
    }

    pub fn output(&self) -> &SharedOutput {
        &self.inner.output
    }

    pub fn bridge(&self) -> Option<&SbsBridge> {
        self.inner.bridge.as_ref()
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the decoder binary is on `PATH` right now.
    pub fn is_available(&self) -> bool {
        discovery::is_available(&self.inner.spec.command)
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// No processes left to reap from earlier runs.
    pub fn is_idle(&self) -> bool {
        self.state().monitors == 0
    }

    pub fn get_status(&self) -> SupervisorStatus {
        let available = self.is_available();
        let spec = &self.inner.spec;
        let st = self.state();

        let phase = if st.running {
            Phase::Running
        } else if st.restart_timer.is_some() {
            Phase::Backoff
        } else {
            Phase::Stopped
        };

        SupervisorStatus {
            name: spec.name.clone(),
            kind: spec.kind.to_string(),
            command: spec.command_line(),
            available,
            running: st.running,
            phase,
            pid: st.pid,
            started_at: st.started_at,
            messages_decoded: st.messages_decoded,
            last_message_at: st.last_message_at,
            last_error: st.last_error.clone(),
            restart_count: st.restart_count,
            current_backoff_ms: st.backoff.current_ms(),
        }
    }

    /// Start the decoder. Returns `true` if it is running afterwards.
    ///
    /// Already running: no-op. Failures (missing binary, spawn error) are
    /// recorded in `last_error` and reported as `false`.
    pub fn start(&self) -> bool {
        let mut st = self.state();
        if st.running {
            return true;
        }
        let started = self.start_locked(&mut st);
        if started {
            st.backoff.reset();
        }
        started
    }

    /// Stop the decoder and cancel any pending restart.
    ///
    /// Returns immediately; the monitor task sends SIGTERM (source first)
    /// and kills the main process if it is still alive after `STOP_GRACE`.
    pub fn stop(&self) {
        let mut st = self.state();
        if let Some(timer) = st.restart_timer.take() {
            timer.abort();
        }
        st.generation += 1;
        let was_running = st.running;
        st.running = false;
        if let Some(tx) = st.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(bridge) = &self.inner.bridge {
            bridge.deactivate();
        }
        drop(st);

        if was_running {
            info!(decoder = %self.name(), "Decoder stopped");
            self.inner.sink.lifecycle(DecoderEvent::DecoderStopped {
                decoder: self.name().to_string(),
                reason: "stopped".into(),
                restart_in_ms: None,
            });
        }
    }

    /// Wait until every process from earlier runs has been reaped.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_idle() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Spawning
    // -----------------------------------------------------------------------

    fn start_locked(&self, st: &mut RunState) -> bool {
        if let Some(timer) = st.restart_timer.take() {
            timer.abort();
        }

        let mut group = match self.spawn_group() {
            Ok(group) => group,
            Err(e) => {
                let msg = e.to_string();
                warn!(decoder = %self.name(), error = %msg, "Failed to start decoder");
                st.running = false;
                st.last_error = Some(msg.clone());
                self.inner.sink.lifecycle(DecoderEvent::DecoderError {
                    decoder: self.name().to_string(),
                    error: msg,
                });
                return false;
            }
        };

        st.generation += 1;
        let generation = st.generation;
        let pid = group.main.id();

        st.running = true;
        st.pid = pid;
        st.started_at = Some(now());

        if let Some(stdout) = group.main.stdout.take() {
            let this = self.clone();
            tokio::spawn(async move {
                let result = for_each_line(stdout, |line| this.handle_line(line)).await;
                if let Err(e) = result {
                    this.note_error(format!("stdout read failed: {e}"));
                }
                debug!(decoder = %this.name(), "stdout closed");
            });
        }
        if let Some(stderr) = group.main.stderr.take() {
            self.spawn_stderr_reader(stderr, &self.inner.spec.command);
        }
        if let Some(src_stderr) = group.source.as_mut().and_then(|c| c.stderr.take()) {
            if let Some(src) = &self.inner.spec.pipe_from {
                self.spawn_stderr_reader(src_stderr, &src.command);
            }
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        st.stop_tx = Some(stop_tx);
        st.monitors += 1;
        tokio::spawn(self.clone().monitor(group, stop_rx, generation));

        if let Some(bridge) = &self.inner.bridge {
            bridge.activate();
        }

        info!(decoder = %self.name(), pid = ?pid, command = %self.inner.spec.command_line(), "Decoder started");
        self.inner.sink.lifecycle(DecoderEvent::DecoderStarted {
            decoder: self.name().to_string(),
            pid,
        });
        true
    }

    fn spawn_group(&self) -> Result<ProcessGroup, SignalError> {
        let spec = &self.inner.spec;

        if !discovery::is_available(&spec.command) {
            return Err(SignalError::BinaryNotFound(spec.command.clone()));
        }
        if let Some(src) = &spec.pipe_from {
            if !discovery::is_available(&src.command) {
                return Err(SignalError::BinaryNotFound(src.command.clone()));
            }
        }

        let mut source = match &spec.pipe_from {
            Some(src) => Some(
                Command::new(&src.command)
                    .args(&src.args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|source| SignalError::Spawn {
                        command: src.command.clone(),
                        source,
                    })?,
            ),
            None => None,
        };

        let stdin: Stdio = match source.as_mut().and_then(|c| c.stdout.take()) {
            Some(pipe) => TryInto::<Stdio>::try_into(pipe).map_err(|source| SignalError::Spawn {
                command: spec.command.clone(),
                source,
            })?,
            None => Stdio::null(),
        };

        let main = Command::new(&spec.command)
            .args(&spec.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        match main {
            Ok(main) => Ok(ProcessGroup { main, source }),
            Err(source_err) => {
                if let Some(src) = source.as_mut() {
                    let _ = src.start_kill();
                }
                Err(SignalError::Spawn {
                    command: spec.command.clone(),
                    source: source_err,
                })
            }
        }
    }

    fn spawn_stderr_reader(&self, stderr: ChildStderr, label: &str) {
        let this = self.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let _ = for_each_line(stderr, |line| {
                this.note_stderr(&label, &line);
                std::future::ready(())
            })
            .await;
        });
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    async fn handle_line(&self, raw: String) {
        let Some(line) = clean_line(&raw) else {
            return;
        };
        let timestamp = now();
        let Some(payload) = self.inner.spec.kind.parse_line(line, timestamp) else {
            trace!(decoder = %self.name(), line, "Skipping unparsed line");
            return;
        };
        self.publish(OutputRecord::new(self.name(), payload, timestamp))
            .await;
    }

    async fn publish(&self, record: OutputRecord) {
        {
            let mut st = self.state();
            st.messages_decoded += 1;
            st.last_message_at = Some(record.timestamp);
        }
        push_output(&self.inner.output, record.clone());
        self.inner
            .sink
            .record(DecoderEvent::Message {
                decoder: self.name().to_string(),
                data: record,
            })
            .await;
    }

    fn note_stderr(&self, label: &str, raw: &str) {
        if let Some(line) = clean_line(raw) {
            debug!(decoder = %self.name(), source = %label, line, "stderr");
            self.state().last_error = Some(format!("{label}: {line}"));
        }
    }

    fn note_error(&self, msg: String) {
        warn!(decoder = %self.name(), error = %msg, "Decoder stream error");
        self.state().last_error = Some(msg.clone());
        self.inner.sink.lifecycle(DecoderEvent::DecoderError {
            decoder: self.name().to_string(),
            error: msg,
        });
    }

    // -----------------------------------------------------------------------
    // Exit handling
    // -----------------------------------------------------------------------

    async fn monitor(
        self,
        mut group: ProcessGroup,
        stop_rx: oneshot::Receiver<()>,
        generation: u64,
    ) {
        let pid = group.main.id();

        let exit = tokio::select! {
            status = group.main.wait() => Exit::Natural(status),
            _ = stop_rx => Exit::Requested,
        };

        match exit {
            Exit::Requested => {
                debug!(decoder = %self.name(), pid = ?pid, "Terminating decoder processes");
                if let Some(src) = group.source.as_mut() {
                    terminate(src);
                }
                terminate(&mut group.main);
                reap(&mut group.main, STOP_GRACE).await;
                if let Some(src) = group.source.as_mut() {
                    reap(src, STOP_GRACE).await;
                }
            }
            Exit::Natural(status) => {
                if let Some(src) = group.source.as_mut() {
                    terminate(src);
                    reap(src, STOP_GRACE).await;
                }
                self.on_exit(status, generation);
            }
        }

        let mut st = self.state();
        st.monitors = st.monitors.saturating_sub(1);
        if pid.is_some() && st.pid == pid {
            st.pid = None;
        }
    }

    /// The main process exited without being asked to.
    fn on_exit(&self, status: io::Result<ExitStatus>, generation: u64) {
        let mut st = self.state();
        if st.generation != generation || !st.running {
            return;
        }

        let reason = describe_exit(&status);
        let terminated = matches!(
            &status,
            Ok(s) if exit_signal(s).is_some_and(is_termination_signal)
        );

        st.running = false;
        st.pid = None;
        st.stop_tx = None;
        st.restart_count += 1;
        st.last_error = Some(format!("process exited: {reason}"));
        if let Some(bridge) = &self.inner.bridge {
            bridge.deactivate();
        }

        let restart_in = if self.inner.spec.restart_on_crash && !terminated {
            let delay = st.backoff.next_delay();
            st.restart_timer = Some(self.schedule_restart(delay, generation));
            Some(delay)
        } else {
            None
        };
        drop(st);

        match restart_in {
            Some(delay) => warn!(
                decoder = %self.name(),
                reason = %reason,
                delay_ms = delay.as_millis() as u64,
                "Decoder exited, restart scheduled"
            ),
            None => warn!(decoder = %self.name(), reason = %reason, "Decoder exited"),
        }

        self.inner.sink.lifecycle(DecoderEvent::DecoderStopped {
            decoder: self.name().to_string(),
            reason,
            restart_in_ms: restart_in.map(|d| d.as_millis() as u64),
        });
    }

    fn schedule_restart(&self, delay: Duration, generation: u64) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.restart_due(generation);
        })
    }

    /// Restart timer callback. Only acts if nothing has happened since the
    /// crash it was scheduled for.
    fn restart_due(&self, generation: u64) -> bool {
        let mut st = self.state();
        if st.generation != generation || st.running {
            debug!(decoder = %self.name(), "Stale restart timer ignored");
            return false;
        }
        st.restart_timer = None;
        info!(decoder = %self.name(), attempt = st.restart_count, "Restarting decoder");
        self.start_locked(&mut st)
    }
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

/// Ask a child to exit. No-op once it has been reaped.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: kill(2) has no memory-safety preconditions; `pid` belongs
        // to a child we spawned and have not reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Wait up to `grace` for exit, then kill. Kill errors (already gone) are ignored.
async fn reap(child: &mut Child, grace: Duration) {
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(pid = ?child.id(), "Process ignored SIGTERM, killing");
        let _ = child.kill().await;
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Signals someone sends on purpose. Crashes (SEGV, ABRT, BUS, ...) are not
/// in this list and go through the restart path.
#[cfg(unix)]
fn is_termination_signal(sig: i32) -> bool {
    matches!(
        sig,
        libc::SIGTERM | libc::SIGINT | libc::SIGHUP | libc::SIGKILL | libc::SIGQUIT
    )
}

#[cfg(not(unix))]
fn is_termination_signal(_sig: i32) -> bool {
    false
}

fn describe_exit(status: &io::Result<ExitStatus>) -> String {
    match status {
        Ok(s) => match (s.code(), exit_signal(s)) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(sig)) => format!("killed by signal {sig}"),
            (None, None) => "unknown exit status".into(),
        },
        Err(e) => format!("wait failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
