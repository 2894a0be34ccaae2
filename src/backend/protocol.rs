use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Run command, sent once per run. The back-end is expected to begin
/// executing `files[entry]` immediately and asynchronously.
///
/// Any remote exposure of this boundary must keep the tagged wire shape
/// (`{"type":"run","runtime":...,"entry":...,...}`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename = "run", rename_all = "camelCase")]
pub struct RunMessage {
    pub runtime: String,
    pub entry: String,
    pub files: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
}

/// Events a back-end emits while serving a run.
///
/// `Exit` and `Error` are terminal and mutually exclusive; exactly one of
/// them ends a run. Ordering within each output stream is emission order;
/// no ordering is guaranteed across the two streams.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackendEvent {
    #[serde(rename = "stdout")]
    Stdout { data: String },

    #[serde(rename = "stderr")]
    Stderr { data: String },

    #[serde(rename = "exit", rename_all = "camelCase")]
    Exit {
        exit_code: i32,
        #[serde(default)]
        artifacts: BTreeMap<String, Vec<u8>>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl BackendEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendEvent::Exit { .. } | BackendEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_message_wire_shape() {
        let msg = RunMessage {
            runtime: "python".to_string(),
            entry: "main.py".to_string(),
            files: BTreeMap::from([("main.py".to_string(), "print(1)".to_string())]),
            env: BTreeMap::new(),
            args: vec!["--fast".to_string()],
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "run");
        assert_eq!(value["runtime"], "python");
        assert_eq!(value["files"]["main.py"], "print(1)");
    }

    #[test]
    fn event_wire_shapes() {
        let stdout = serde_json::to_value(BackendEvent::Stdout {
            data: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(stdout, json!({"type": "stdout", "data": "hi"}));

        let exit = serde_json::to_value(BackendEvent::Exit {
            exit_code: 0,
            artifacts: BTreeMap::new(),
        })
        .unwrap();
        assert_eq!(exit["type"], "exit");
        assert_eq!(exit["exitCode"], 0);
    }

    #[test]
    fn exit_without_artifacts_deserializes() {
        let event: BackendEvent =
            serde_json::from_value(json!({"type": "exit", "exitCode": 3})).unwrap();
        match event {
            BackendEvent::Exit {
                exit_code,
                artifacts,
            } => {
                assert_eq!(exit_code, 3);
                assert!(artifacts.is_empty());
            }
            other => panic!("expected exit, got {other:?}"),
        }
        assert!(event_is_terminal(json!({"type": "error", "message": "boom"})));
    }

    fn event_is_terminal(value: serde_json::Value) -> bool {
        serde_json::from_value::<BackendEvent>(value)
            .unwrap()
            .is_terminal()
    }
}
