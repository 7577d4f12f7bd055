//! Lifecycle of one engine subprocess and the RPC channel over its stdio.
//!
//! ```text
//!   NotStarted ──start()──► RunningUninitialized ──handshake ok──► RunningReady
//!        │                          │                                  │
//!        │                          └── handshake/IO failure ──► Failed ◄┘ decode/IO failure
//!        │                                                         │
//!        └────────────────────────── stop() ──────────────────► Stopped
//! ```
//!
//! `start()` is also accepted from `Failed` and `Stopped`: any leftover
//! process is reaped, ids restart at 1 and the handshake is redone.
//!
//! The channel is unpipelined: one request line out, one response line in,
//! every call takes `&mut self`. Requests carry ids 1, 2, 3, ... and the
//! response id must match the request just sent.
//!
//! `stop()` never fails and is idempotent. `Drop` calls it, so an engine
//! process is reaped on every exit path, including unwinding.

use std::{
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio},
    sync::mpsc::{self, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use attest_contracts::{
    assertion::Assertion,
    capability::CapabilitySet,
    error::{AttestError, AttestResult},
    protocol::{
        EvaluateBatchResult, InitializeParams, InitializeResult, ShutdownResult,
        SubmitPluginResultParams, SubmitPluginResultResponse, METHOD_EVALUATE_BATCH,
        METHOD_INITIALIZE, METHOD_SHUTDOWN, METHOD_SUBMIT_PLUGIN_RESULT, PROTOCOL_VERSION,
    },
    trace::Trace,
};

use crate::{
    codec::{decode_response, encode_request},
    config::EngineConfig,
    discovery::find_engine,
};

const STDERR_TARGET: &str = "attest::engine::stderr";

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    /// Spawned, handshake not yet complete.
    RunningUninitialized,
    RunningReady,
    Stopped,
    /// The channel is unusable. `stop()` or a fresh `start()` leave it.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::NotStarted => "not started",
            EngineState::RunningUninitialized => "running (uninitialized)",
            EngineState::RunningReady => "ready",
            EngineState::Stopped => "stopped",
            EngineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Owns one engine subprocess.
#[derive(Debug)]
pub struct EngineProcessManager {
    config: EngineConfig,
    state: EngineState,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    next_id: u64,
    init_result: Option<InitializeResult>,
}

impl EngineProcessManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: EngineState::NotStarted,
            child: None,
            stdin: None,
            stdout: None,
            next_id: 1,
            init_result: None,
        }
    }

    /// Run `f` against a started engine, stopping it afterwards.
    ///
    /// The engine is stopped whether `start()` fails, `f` returns an error,
    /// or `f` panics.
    pub fn scoped<T, F>(config: EngineConfig, f: F) -> AttestResult<T>
    where
        F: FnOnce(&mut EngineProcessManager) -> AttestResult<T>,
    {
        let mut engine = EngineProcessManager::new(config);
        engine.start()?;
        let outcome = f(&mut engine);
        engine.stop();
        outcome
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The handshake answer, once `start()` has succeeded.
    pub fn init_result(&self) -> Option<&InitializeResult> {
        self.init_result.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// True while the subprocess exists and has not exited.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Spawn the engine and perform the capability handshake.
    ///
    /// # Errors
    ///
    /// - `Usage` if an engine is already running.
    /// - `EngineNotFound` or `Connection` if the binary cannot be located or
    ///   spawned; the state is left as it was.
    /// - `CapabilityMismatch` if the engine lacks a required capability; the
    ///   manager is `Failed` and the process stays alive until `stop()`.
    /// - Any channel error from the handshake itself; the manager is `Failed`.
    pub fn start(&mut self) -> AttestResult<InitializeResult> {
        if matches!(
            self.state,
            EngineState::RunningUninitialized | EngineState::RunningReady
        ) {
            return Err(AttestError::Usage {
                reason: format!("start() called on an engine that is {}", self.state),
            });
        }

        if self.child.is_some() {
            debug!(state = %self.state, "reaping previous engine before restart");
            self.reap();
        }
        self.next_id = 1;
        self.init_result = None;

        let path = find_engine(self.config.engine_path.as_deref())?;
        self.spawn(path)?;

        match self.handshake() {
            Ok(result) => {
                self.state = EngineState::RunningReady;
                info!(
                    pid = ?self.pid(),
                    engine_version = %result.engine_version,
                    "engine ready"
                );
                self.init_result = Some(result.clone());
                Ok(result)
            }
            Err(e) => {
                self.state = EngineState::Failed;
                warn!(error = %e, "engine handshake failed");
                Err(e)
            }
        }
    }

    fn spawn(&mut self, path: PathBuf) -> AttestResult<()> {
        let mut child = Command::new(&path)
            .arg(format!("--log-level={}", self.config.log_level))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AttestError::Connection {
                reason: format!("failed to spawn '{}': {e}", path.display()),
            })?;

        let pid = child.id();
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr, pid);
        }
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(BufReader::new);
        self.child = Some(child);
        self.state = EngineState::RunningUninitialized;

        info!(pid, path = %path.display(), "engine spawned");
        Ok(())
    }

    fn handshake(&mut self) -> AttestResult<InitializeResult> {
        let required = self.config.capabilities();
        let params = InitializeParams {
            sdk_name: self.config.sdk_name.clone(),
            sdk_version: self.config.sdk_version.clone(),
            protocol_version: PROTOCOL_VERSION,
            required_capabilities: required.names(),
            preferred_encoding: "json".to_string(),
        };
        let raw = self.exchange(METHOD_INITIALIZE, serde_json::to_value(params)?)?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| AttestError::decode(format!("malformed initialize result: {e}")))?;

        if !result.compatible {
            let mut missing = result.missing.clone();
            if missing.is_empty() {
                let supported: CapabilitySet = result.capabilities.iter().cloned().collect();
                missing = required.missing_from(&supported);
            }
            return Err(AttestError::CapabilityMismatch { missing });
        }
        Ok(result)
    }

    /// Stop the engine. Never fails; calling it again is a no-op.
    ///
    /// A ready engine is sent `shutdown` first; if no answer arrives within
    /// the grace period the process is killed. The process is then asked to
    /// exit (stdin closed, plus `SIGTERM` on Unix) and killed if it is still
    /// alive once the grace period has passed.
    pub fn stop(&mut self) {
        if self.state == EngineState::RunningReady {
            let watchdog = self
                .pid()
                .and_then(|pid| ShutdownWatchdog::arm(pid, self.config.shutdown_grace()));
            let outcome = self.exchange(METHOD_SHUTDOWN, json!({}));
            if let Some(watchdog) = watchdog {
                watchdog.disarm();
            }
            match outcome {
                Ok(raw) => {
                    let summary: ShutdownResult = serde_json::from_value(raw).unwrap_or_default();
                    info!(
                        sessions_completed = summary.sessions_completed,
                        assertions_evaluated = summary.assertions_evaluated,
                        "engine acknowledged shutdown"
                    );
                }
                Err(e) => warn!(error = %e, "shutdown request failed, terminating anyway"),
            }
        }

        self.reap();
        self.state = EngineState::Stopped;
    }

    /// Terminate and wait for the current process, if any, and drop its pipes.
    fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            drop(self.stdin.take());
            request_terminate(&child);

            match child.wait_timeout(self.config.shutdown_grace()) {
                Ok(Some(status)) => debug!(pid, %status, "engine exited"),
                Ok(None) => {
                    warn!(pid, grace_ms = self.config.shutdown_grace_ms, "engine ignored termination, killing");
                    force_kill(&mut child);
                }
                Err(e) => {
                    warn!(pid, error = %e, "could not poll engine exit, killing");
                    force_kill(&mut child);
                }
            }
            info!(pid, "engine stopped");
        }

        self.stdin = None;
        self.stdout = None;
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    /// Send one request and wait for its response.
    ///
    /// # Errors
    ///
    /// - `Usage` unless the engine is ready. Nothing is written in that case.
    /// - `Connection` if the engine closed its stdout or a pipe broke.
    /// - `Decode` if the response line is malformed or answers another id.
    /// - `Protocol` if the engine answered with an error object.
    ///
    /// Connection and decode failures move the manager to `Failed`; protocol
    /// errors leave it ready.
    pub fn send_request(&mut self, method: &str, params: Value) -> AttestResult<Value> {
        if self.state != EngineState::RunningReady {
            return Err(AttestError::Usage {
                reason: format!("cannot send '{method}': engine is {}", self.state),
            });
        }
        self.exchange(method, params)
    }

    /// Evaluate `assertions` against `trace`.
    pub fn evaluate_batch(
        &mut self,
        trace: &Trace,
        assertions: &[Assertion],
    ) -> AttestResult<EvaluateBatchResult> {
        let raw = self.send_request(
            METHOD_EVALUATE_BATCH,
            json!({ "trace": trace, "assertions": assertions }),
        )?;
        let result: EvaluateBatchResult = serde_json::from_value(raw)?;
        debug!(
            trace_id = %trace.trace_id,
            results = result.results.len(),
            total_cost = result.total_cost,
            "batch evaluated"
        );
        Ok(result)
    }

    /// Report a plugin verdict. Returns whether the engine accepted it.
    pub fn submit_plugin_result(&mut self, result: &SubmitPluginResultParams) -> AttestResult<bool> {
        let raw = self.send_request(METHOD_SUBMIT_PLUGIN_RESULT, serde_json::to_value(result)?)?;
        let response: SubmitPluginResultResponse = serde_json::from_value(raw)?;
        Ok(response.accepted)
    }

    /// Write one frame, read one frame. Marks the manager `Failed` on any
    /// error that leaves the stream in an unknown position.
    fn exchange(&mut self, method: &str, params: Value) -> AttestResult<Value> {
        let outcome = self.exchange_inner(method, params);
        if let Err(e) = &outcome {
            if e.is_connection_fatal() {
                self.state = EngineState::Failed;
            }
        }
        outcome
    }

    fn exchange_inner(&mut self, method: &str, params: Value) -> AttestResult<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let frame = encode_request(id, method, params)?;

        let stdin = self.stdin.as_mut().ok_or_else(|| connection("engine stdin is closed"))?;
        stdin
            .write_all(&frame)
            .and_then(|()| stdin.flush())
            .map_err(|e| connection(format!("failed to write '{method}' request: {e}")))?;
        debug!(id, method, "request sent");

        let stdout = self.stdout.as_mut().ok_or_else(|| connection("engine stdout is closed"))?;
        let mut buf = Vec::new();
        let read = stdout
            .read_until(b'\n', &mut buf)
            .map_err(|e| connection(format!("failed to read '{method}' response: {e}")))?;
        if read == 0 {
            return Err(connection(format!("engine closed stdout while awaiting '{method}'")));
        }
        let line = String::from_utf8(buf).map_err(|e| {
            AttestError::decode(format!("'{method}' response is not valid UTF-8: {e}"))
        })?;

        let response = decode_response(&line)?;
        let response_id = response.id()?;
        if response_id != id {
            return Err(AttestError::decode(format!(
                "response id {response_id} does not match request id {id}"
            )));
        }
        debug!(id, method, "response received");
        response.into_result()
    }
}

impl Drop for EngineProcessManager {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.stop();
        }
    }
}

fn connection(reason: impl Into<String>) -> AttestError {
    AttestError::Connection { reason: reason.into() }
}

/// Forward engine stderr into tracing until the pipe closes.
///
/// The thread is detached: a grandchild holding the pipe open must not
/// block `stop()`.
fn drain_stderr(stderr: ChildStderr, pid: u32) {
    let spawned = thread::Builder::new()
        .name(format!("attest-engine-stderr-{pid}"))
        .spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!(target: STDERR_TARGET, pid, "{line}");
            }
        });
    if let Err(e) = spawned {
        warn!(pid, error = %e, "could not start stderr drain thread");
    }
}

#[cfg(unix)]
fn request_terminate(child: &Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: `pid` is our own child and has not been reaped yet, so the id
    // cannot have been recycled.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn request_terminate(_child: &Child) {}

/// Kills the engine if a `shutdown` answer does not arrive in time, which
/// unblocks the pending read with a closed stdout.
///
/// Must be disarmed before the child is reaped so the pid cannot be reused.
struct ShutdownWatchdog {
    cancel: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ShutdownWatchdog {
    fn arm(pid: u32, grace: Duration) -> Option<Self> {
        let (cancel, expired) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name(format!("attest-engine-shutdown-{pid}"))
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = expired.recv_timeout(grace) {
                    warn!(pid, grace_ms = grace.as_millis() as u64, "engine did not answer shutdown, killing");
                    kill_pid(pid);
                }
            });
        match spawned {
            Ok(handle) => Some(Self { cancel, handle }),
            Err(e) => {
                warn!(pid, error = %e, "could not start shutdown watchdog");
                None
            }
        }
    }

    fn disarm(self) {
        let _ = self.cancel.send(());
        if self.handle.join().is_err() {
            warn!("shutdown watchdog panicked");
        }
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: the child is not reaped until the watchdog is joined.
    let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, "SIGKILL not delivered");
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) {
    debug!(pid, "no out-of-band kill on this platform, waiting for shutdown answer");
}

fn force_kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "kill failed, engine already exited");
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "failed to reap engine process");
    }
}

/// `std::process::Child` with a bounded wait.
trait ChildExt {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>>;
}

impl ChildExt for Child {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}
