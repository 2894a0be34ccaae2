use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::handle::RunHandle;
use super::inline;
use super::sandbox::DocumentHost;
use crate::backend::pool::{BackendPool, ContextLease};
use crate::backend::protocol::{BackendEvent, RunMessage};
use crate::domain::{OutputLine, RunId, RunRequest, RunResult, StreamKind};
use crate::errors::DispatchError;
use crate::registry::{ExecutionStrategy, RuntimeDescriptor, RuntimeRegistry};
use crate::vfs::VirtualFs;

/// The orchestrator: resolves the runtime, stages files, drives the
/// strategy-appropriate execution context, enforces the deadline, and
/// assembles exactly one `RunResult` per run.
///
/// Constructed once at session start with its collaborators injected;
/// `start_run` is the sole public entry point of the core.
#[derive(Debug)]
pub struct DispatchEngine {
    registry: Arc<RuntimeRegistry>,
    pool: Arc<BackendPool>,
}

impl DispatchEngine {
    pub fn new(registry: Arc<RuntimeRegistry>, pool: Arc<BackendPool>) -> Self {
        Self { registry, pool }
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    /// Starts a run and returns its handle synchronously; the run itself
    /// proceeds on a spawned task. Must be called within a Tokio runtime.
    ///
    /// This never throws: every failure mode resolves the handle with a
    /// `RunResult` carrying exit code 1 and a descriptive `stderr`.
    #[tracing::instrument(skip_all, fields(entry = %request.entry))]
    pub fn start_run(
        &self,
        request: RunRequest,
        on_stdout: impl Fn(&str) + Send + 'static,
        on_stderr: impl Fn(&str) + Send + 'static,
    ) -> RunHandle {
        let run_id = Uuid::new_v4();
        let (handle, signals) = RunHandle::new_pair(run_id);

        let worker = RunWorker {
            run_id,
            started: Instant::now(),
            registry: self.registry.clone(),
            pool: self.pool.clone(),
            on_stdout: Box::new(on_stdout),
            on_stderr: Box::new(on_stderr),
            stdout_buf: Vec::new(),
            stderr_buf: Vec::new(),
            lines_tx: signals.lines_tx,
            cancel_rx: signals.cancel_rx,
        };

        tokio::spawn(async move {
            let result = worker.execute(request).await;
            // The caller may have dropped the handle; the run still ran.
            let _ = signals.result_tx.send(result);
        });

        handle
    }

    /// Session teardown: disposes every warm execution context.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

/// Per-run state machine phases, for tracing.
#[derive(Clone, Copy, Debug)]
enum RunPhase {
    Resolving,
    Staging,
    Executing,
    Finalizing,
}

/// What ended the offloaded-worker event loop.
enum LoopEnd {
    Exit {
        exit_code: i32,
        artifacts: BTreeMap<String, Vec<u8>>,
    },
    /// The back-end reported a fault but its context is still usable.
    BackendFault(String),
    /// The context's channel died; it must not be reused.
    ContextLost,
    TimedOut(u64),
    Cancelled,
}

enum Step {
    Event(Option<BackendEvent>),
    TimedOut,
    Cancelled,
}

struct RunWorker {
    run_id: RunId,
    started: Instant,
    registry: Arc<RuntimeRegistry>,
    pool: Arc<BackendPool>,
    on_stdout: Box<dyn Fn(&str) + Send>,
    on_stderr: Box<dyn Fn(&str) + Send>,
    stdout_buf: Vec<String>,
    stderr_buf: Vec<String>,
    lines_tx: mpsc::Sender<OutputLine>,
    cancel_rx: watch::Receiver<bool>,
}

impl RunWorker {
    async fn execute(mut self, request: RunRequest) -> RunResult {
        match self.run_phases(request).await {
            Ok(result) => result,
            Err(err) => {
                tracing::info!(run_id = %self.run_id, error = %err, "run failed");
                self.emit(StreamKind::Stderr, err.to_string());
                self.finish(1, BTreeMap::new())
            }
        }
    }

    async fn run_phases(&mut self, request: RunRequest) -> Result<RunResult, DispatchError> {
        self.phase(RunPhase::Resolving);
        let descriptor = self.resolve(&request)?.clone();
        if !request.files.contains_key(&request.entry) {
            return Err(DispatchError::Resolution(format!(
                "entry file \"{}\" is missing from the run's file set",
                request.entry
            )));
        }
        if self.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let timeout_ms = request.timeout_ms.unwrap_or(descriptor.timeout_ms);
        match descriptor.strategy {
            ExecutionStrategy::OffloadedWorker => {
                self.run_offloaded(&descriptor, request, timeout_ms).await
            }
            ExecutionStrategy::SandboxedDocument => self.run_sandboxed(&request),
            ExecutionStrategy::Inline => self.run_inline(&descriptor, &request),
        }
    }

    fn resolve(&self, request: &RunRequest) -> Result<&RuntimeDescriptor, DispatchError> {
        match &request.runtime_hint {
            Some(hint) => self.registry.resolve(hint).ok_or_else(|| {
                DispatchError::Resolution(format!("unsupported runtime hint \"{hint}\""))
            }),
            None => self.registry.resolve_entry(&request.entry).ok_or_else(|| {
                let file_name = request.entry.rsplit('/').next().unwrap_or(&request.entry);
                let extension = file_name
                    .rsplit_once('.')
                    .map(|(_, ext)| ext)
                    .unwrap_or("");
                DispatchError::Resolution(format!(
                    "no runtime registered for \"{}\" (extension \"{extension}\")",
                    request.entry
                ))
            }),
        }
    }

    async fn run_offloaded(
        &mut self,
        descriptor: &RuntimeDescriptor,
        request: RunRequest,
        timeout_ms: u64,
    ) -> Result<RunResult, DispatchError> {
        self.phase(RunPhase::Staging);
        let mut vfs = VirtualFs::new();
        vfs.mount(&request.files, "/")
            .map_err(|err| DispatchError::Staging(err.to_string()))?;

        self.phase(RunPhase::Executing);
        let pool = self.pool.clone();
        let mut lease = tokio::select! {
            _ = cancelled(&mut self.cancel_rx) => return Err(DispatchError::Cancelled),
            acquired = pool.acquire(descriptor) => {
                acquired.map_err(|err| DispatchError::Provisioning(err.to_string()))?
            }
        };

        let message = RunMessage {
            runtime: descriptor.id.clone(),
            entry: request.entry.clone(),
            files: request
                .files
                .iter()
                .map(|(path, content)| (path.clone(), content.as_text()))
                .collect(),
            env: request.env.clone(),
            args: request.args.clone(),
        };
        if lease.send_run(message).await.is_err() {
            self.pool.terminate(lease);
            return Err(DispatchError::Backend(
                "execution context closed before accepting the run".to_string(),
            ));
        }

        // The deadline covers the whole wait for a terminal event; output
        // arriving after it fires is discarded with the context.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let end = loop {
            let step = tokio::select! {
                _ = cancelled(&mut self.cancel_rx) => Step::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Step::TimedOut,
                event = lease.recv_event() => Step::Event(event),
            };
            match step {
                Step::Cancelled => break LoopEnd::Cancelled,
                Step::TimedOut => break LoopEnd::TimedOut(timeout_ms),
                Step::Event(Some(BackendEvent::Stdout { data })) => {
                    self.emit(StreamKind::Stdout, data)
                }
                Step::Event(Some(BackendEvent::Stderr { data })) => {
                    self.emit(StreamKind::Stderr, data)
                }
                Step::Event(Some(BackendEvent::Exit {
                    exit_code,
                    artifacts,
                })) => {
                    break LoopEnd::Exit {
                        exit_code,
                        artifacts,
                    };
                }
                Step::Event(Some(BackendEvent::Error { message })) => {
                    break LoopEnd::BackendFault(message);
                }
                Step::Event(None) => break LoopEnd::ContextLost,
            }
        };

        match end {
            LoopEnd::Exit {
                exit_code,
                artifacts,
            } => {
                self.pool.release(lease);
                self.phase(RunPhase::Finalizing);
                let artifacts = collect_artifacts(&mut vfs, artifacts);
                Ok(self.finish(exit_code, artifacts))
            }
            LoopEnd::BackendFault(message) => {
                // Reported faults are the submitted code's problem; the
                // context stays warm for the next run.
                self.pool.release(lease);
                Err(DispatchError::Backend(message))
            }
            LoopEnd::ContextLost => {
                self.pool.terminate(lease);
                Err(DispatchError::Backend(
                    "execution context closed its event channel without a terminal message"
                        .to_string(),
                ))
            }
            LoopEnd::TimedOut(timeout_ms) => {
                self.pool.terminate(lease);
                Err(DispatchError::Timeout { timeout_ms })
            }
            LoopEnd::Cancelled => {
                self.pool.terminate(lease);
                Err(DispatchError::Cancelled)
            }
        }
    }

    fn run_sandboxed(&mut self, request: &RunRequest) -> Result<RunResult, DispatchError> {
        self.phase(RunPhase::Executing);
        let markup = request.files[&request.entry].as_text();

        let mut host = DocumentHost::open();
        let injected = host.inject(&markup);
        // Teardown happens on both paths so the surface can never leak.
        host.close();

        match injected {
            Ok(()) => {
                self.emit(StreamKind::Stdout, "document rendered".to_string());
                self.phase(RunPhase::Finalizing);
                Ok(self.finish(0, BTreeMap::new()))
            }
            Err(err) => Err(DispatchError::Backend(err.to_string())),
        }
    }

    fn run_inline(
        &mut self,
        descriptor: &RuntimeDescriptor,
        request: &RunRequest,
    ) -> Result<RunResult, DispatchError> {
        self.phase(RunPhase::Executing);
        let content = request.files[&request.entry].as_text();

        let mut lines: Vec<(StreamKind, String)> = Vec::new();
        let outcome = inline::run_inline(&descriptor.id, &content, &mut |kind, line| {
            lines.push((kind, line.to_string()))
        });
        for (kind, line) in lines {
            self.emit(kind, line);
        }

        self.phase(RunPhase::Finalizing);
        Ok(self.finish(outcome.exit_code, BTreeMap::new()))
    }

    /// Relays one line to the caller and buffers it for the final result.
    /// Callback delivery is best-effort: a panicking callback is logged
    /// and the run continues.
    fn emit(&mut self, kind: StreamKind, data: String) {
        let callback = match kind {
            StreamKind::Stdout => &self.on_stdout,
            StreamKind::Stderr => &self.on_stderr,
        };
        let delivery =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&data)));
        if delivery.is_err() {
            tracing::warn!(run_id = %self.run_id, "output callback panicked; continuing");
        }

        let _ = self.lines_tx.try_send(OutputLine::new(kind, &data));
        match kind {
            StreamKind::Stdout => self.stdout_buf.push(data),
            StreamKind::Stderr => self.stderr_buf.push(data),
        }
    }

    fn finish(&self, exit_code: i32, artifacts: BTreeMap<String, Vec<u8>>) -> RunResult {
        RunResult {
            exit_code,
            output: self.stdout_buf.join("\n"),
            stderr: self.stderr_buf.join("\n"),
            artifacts,
            execution_time_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    fn phase(&self, phase: RunPhase) {
        tracing::debug!(run_id = %self.run_id, ?phase, "run phase");
    }
}

/// Writes back-end reported artifacts into the run's filesystem, then
/// snapshots exactly those paths. Invalid paths are dropped, not fatal.
fn collect_artifacts(
    vfs: &mut VirtualFs,
    reported: BTreeMap<String, Vec<u8>>,
) -> BTreeMap<String, Vec<u8>> {
    let mut paths = Vec::with_capacity(reported.len());
    for (path, bytes) in reported {
        match vfs.write(&path, bytes) {
            Ok(()) => paths.push(path),
            Err(err) => tracing::warn!(%path, error = %err, "dropping invalid artifact path"),
        }
    }
    vfs.snapshot(&paths)
}

/// Resolves when the run is cancelled; pends forever if the handle is gone
/// (a dropped handle abandons the result, it does not cancel the run).
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
