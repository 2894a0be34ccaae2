use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::{OutputLine, RunId, RunResult};

const LINE_BUFFER: usize = 256;

/// Engine-side ends of a run's handle.
pub(crate) struct RunSignals {
    pub result_tx: oneshot::Sender<RunResult>,
    pub cancel_rx: watch::Receiver<bool>,
    pub lines_tx: mpsc::Sender<OutputLine>,
}

/// Returned synchronously from `start_run`, decoupling the caller from the
/// asynchronous execution machinery.
///
/// The deferred result never fails: every failure mode arrives as a
/// `RunResult` with a non-zero exit code, so callers have one code path.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancel_tx: watch::Sender<bool>,
    result_rx: oneshot::Receiver<RunResult>,
    lines_rx: Option<mpsc::Receiver<OutputLine>>,
}

impl RunHandle {
    pub(crate) fn new_pair(run_id: RunId) -> (Self, RunSignals) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (result_tx, result_rx) = oneshot::channel();
        let (lines_tx, lines_rx) = mpsc::channel(LINE_BUFFER);

        let handle = Self {
            run_id,
            cancel_tx,
            result_rx,
            lines_rx: Some(lines_rx),
        };
        let signals = RunSignals {
            result_tx,
            cancel_rx,
            lines_tx,
        };
        (handle, signals)
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Requests cooperative termination of the in-flight run.
    /// Idempotent, and a no-op once the run has finished.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Alternative to the per-line callbacks: the run's output as a stream.
    /// Delivery is best-effort through a bounded buffer; if the consumer
    /// falls more than `LINE_BUFFER` lines behind, further lines are dropped
    /// from the stream (the buffered `RunResult` still carries them all).
    /// Can be taken once.
    pub fn take_line_stream(&mut self) -> Option<ReceiverStream<OutputLine>> {
        self.lines_rx.take().map(ReceiverStream::new)
    }

    /// Awaits the run's terminal result.
    pub async fn wait(self) -> RunResult {
        match self.result_rx.await {
            Ok(result) => result,
            // Only reachable if the dispatcher task was torn down mid-run
            // (e.g. runtime shutdown); degrade to the uniform failure shape.
            Err(_) => RunResult::failed("dispatcher stopped before the run finalized", 0),
        }
    }
}
