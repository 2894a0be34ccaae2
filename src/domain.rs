use std::collections::BTreeMap;

use uuid::Uuid;

/// Caller-supplied description of a single run.
///
/// `entry` must be a key of `files`; the engine fails the run fast at the
/// resolution stage otherwise, before any execution context is touched.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub entry: String,
    pub files: BTreeMap<String, FileContent>,
    pub runtime_hint: Option<String>,
    pub timeout_ms: Option<u64>,
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
}

impl RunRequest {
    pub fn new(entry: &str, files: BTreeMap<String, FileContent>) -> Self {
        Self {
            entry: entry.to_string(),
            files,
            runtime_hint: None,
            timeout_ms: None,
            env: BTreeMap::new(),
            args: Vec::new(),
        }
    }

    /// Single-file convenience used all over the tests and the demo binary.
    pub fn single(entry: &str, content: &str) -> Self {
        let mut files = BTreeMap::new();
        files.insert(entry.to_string(), FileContent::from(content));
        Self::new(entry, files)
    }

    pub fn with_hint(mut self, runtime: &str) -> Self {
        self.runtime_hint = Some(runtime.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Project file payload; textual sources and binary assets share one store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(s) => s.as_bytes(),
            FileContent::Binary(b) => b,
        }
    }

    /// Lossy textual view, used when handing sources to a back-end.
    pub fn as_text(&self) -> String {
        match self {
            FileContent::Text(s) => s.clone(),
            FileContent::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

impl From<&str> for FileContent {
    fn from(s: &str) -> Self {
        FileContent::Text(s.to_string())
    }
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        FileContent::Text(s)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(b: Vec<u8>) -> Self {
        FileContent::Binary(b)
    }
}

/// Terminal outcome of a run, produced exactly once per run.
///
/// Every failure mode is encoded here with a non-zero `exit_code` and a
/// populated `stderr`; the engine never surfaces errors any other way.
/// Exit code 1 is reserved for dispatch-level failures (unresolvable
/// runtime, timeout, staging failure, cancellation).
#[derive(Clone, Debug)]
pub struct RunResult {
    pub exit_code: i32,
    pub output: String,
    pub stderr: String,
    pub artifacts: BTreeMap<String, Vec<u8>>,
    pub execution_time_ms: u64,
}

impl RunResult {
    pub fn failed(message: &str, execution_time_ms: u64) -> Self {
        Self {
            exit_code: 1,
            output: String::new(),
            stderr: message.to_string(),
            artifacts: BTreeMap::new(),
            execution_time_ms,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One emitted line, as relayed to the presentation layer.
#[derive(Clone, Debug)]
pub struct OutputLine {
    pub kind: StreamKind,
    pub content: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl OutputLine {
    pub fn new(kind: StreamKind, content: &str) -> Self {
        Self {
            kind,
            content: content.to_string(),
            at: chrono::Utc::now(),
        }
    }
}

pub type RunId = Uuid;
