use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::backend::protocol::{BackendEvent, RunMessage};
use crate::backend::traits::{BackendChannel, BackendLauncher, ProvisionError};
use crate::registry::RuntimeDescriptor;

const CHANNEL_CAPACITY: usize = 64;

/// One step of a scripted back-end's replay.
#[derive(Clone, Debug)]
pub enum ScriptedStep {
    Stdout(String),
    Stderr(String),
    Sleep(Duration),
    Exit {
        exit_code: i32,
        artifacts: BTreeMap<String, Vec<u8>>,
    },
    Error(String),
    /// Emit nothing and never terminate; used to exercise the timeout path.
    Stall,
}

impl ScriptedStep {
    pub fn exit_ok() -> Self {
        ScriptedStep::Exit {
            exit_code: 0,
            artifacts: BTreeMap::new(),
        }
    }
}

/// Launcher whose contexts replay a fixed step sequence for every run
/// message they receive. The context task stays alive between runs, so
/// pool reuse behaves exactly like a warm real back-end.
#[derive(Debug)]
pub struct ScriptedLauncher {
    script: Vec<ScriptedStep>,
    launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self {
            script,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BackendLauncher for ScriptedLauncher {
    #[tracing::instrument(skip(self))]
    async fn launch(
        &self,
        descriptor: &RuntimeDescriptor,
    ) -> Result<BackendChannel, ProvisionError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let script = self.script.clone();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<RunMessage>(CHANNEL_CAPACITY);
        let (evt_tx, evt_rx) = mpsc::channel::<BackendEvent>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(_message) = cmd_rx.recv().await {
                for step in &script {
                    let event = match step {
                        ScriptedStep::Sleep(duration) => {
                            tokio::time::sleep(*duration).await;
                            continue;
                        }
                        ScriptedStep::Stall => break,
                        ScriptedStep::Stdout(data) => BackendEvent::Stdout { data: data.clone() },
                        ScriptedStep::Stderr(data) => BackendEvent::Stderr { data: data.clone() },
                        ScriptedStep::Exit {
                            exit_code,
                            artifacts,
                        } => BackendEvent::Exit {
                            exit_code: *exit_code,
                            artifacts: artifacts.clone(),
                        },
                        ScriptedStep::Error(message) => BackendEvent::Error {
                            message: message.clone(),
                        },
                    };
                    if evt_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(BackendChannel {
            commands: cmd_tx,
            events: evt_rx,
        })
    }
}

/// Launcher whose contexts interpret a tiny `console.log(...)` subset:
/// integer addition and quoted string literals. Enough for the demo binary
/// and end-to-end dispatch tests; real interpreters live behind the same
/// trait in the hosting shell.
#[derive(Debug, Default)]
pub struct MiniScriptLauncher {
    launches: AtomicUsize,
}

impl MiniScriptLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BackendLauncher for MiniScriptLauncher {
    #[tracing::instrument(skip(self))]
    async fn launch(
        &self,
        descriptor: &RuntimeDescriptor,
    ) -> Result<BackendChannel, ProvisionError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<RunMessage>(CHANNEL_CAPACITY);
        let (evt_tx, evt_rx) = mpsc::channel::<BackendEvent>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = cmd_rx.recv().await {
                let terminal = match message.files.get(&message.entry) {
                    Some(source) => {
                        for line in source.lines() {
                            let Some(event) = interpret_line(line) else {
                                continue;
                            };
                            if evt_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        BackendEvent::Exit {
                            exit_code: 0,
                            artifacts: BTreeMap::new(),
                        }
                    }
                    None => BackendEvent::Error {
                        message: format!("entry not found: {}", message.entry),
                    },
                };
                if evt_tx.send(terminal).await.is_err() {
                    return;
                }
            }
        });

        Ok(BackendChannel {
            commands: cmd_tx,
            events: evt_rx,
        })
    }
}

fn interpret_line(line: &str) -> Option<BackendEvent> {
    let line = line.trim().trim_end_matches(';');
    if line.is_empty() || line.starts_with("//") {
        return None;
    }

    let inner = line
        .strip_prefix("console.log(")
        .and_then(|rest| rest.strip_suffix(')'));
    match inner {
        Some(expr) => Some(BackendEvent::Stdout {
            data: evaluate(expr.trim()),
        }),
        None => Some(BackendEvent::Stderr {
            data: format!("skipped unsupported statement: {line}"),
        }),
    }
}

fn evaluate(expr: &str) -> String {
    let quoted = (expr.starts_with('"') && expr.ends_with('"') && expr.len() >= 2)
        || (expr.starts_with('\'') && expr.ends_with('\'') && expr.len() >= 2);
    if quoted {
        return expr[1..expr.len() - 1].to_string();
    }

    let terms: Option<Vec<i64>> = expr
        .split('+')
        .map(|term| term.trim().parse::<i64>().ok())
        .collect();
    match terms {
        Some(terms) if !terms.is_empty() => terms.iter().sum::<i64>().to_string(),
        _ => expr.to_string(),
    }
}
