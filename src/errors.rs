/// Everything that can sink a run before a back-end reports a result.
///
/// These are internal control flow only: the engine converts each of them
/// into a `RunResult` with exit code 1 at the finalization boundary, so the
/// caller always sees exactly one result shape.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("cannot resolve runtime: {0}")]
    Resolution(String),

    #[error("staging failed: {0}")]
    Staging(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{0}")]
    Backend(String),

    #[error("run cancelled")]
    Cancelled,
}
