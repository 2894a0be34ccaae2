use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_stream::StreamExt;

use crate::backend::pool::BackendPool;
use crate::dispatch::engine::DispatchEngine;
use crate::domain::{RunRequest, StreamKind};
use crate::registry::RuntimeRegistry;
use crate::stubs::backend::{MiniScriptLauncher, ScriptedLauncher, ScriptedStep};

fn sink(_: &str) {}

fn engine_with(launcher: Arc<dyn crate::backend::traits::BackendLauncher>) -> DispatchEngine {
    DispatchEngine::new(
        Arc::new(RuntimeRegistry::with_defaults()),
        Arc::new(BackendPool::new(launcher)),
    )
}

#[tokio::test]
async fn javascript_run_goes_through_the_worker_path() {
    let launcher = Arc::new(MiniScriptLauncher::new());
    let engine = engine_with(launcher.clone());

    let request = RunRequest::single("main.js", "console.log(1+1)");
    let result = engine.start_run(request, sink, sink).wait().await;

    assert_eq!(result.exit_code, 0);
    assert!(result.output.contains('2'), "output: {}", result.output);
    assert_eq!(launcher.launch_count(), 1);
}

#[tokio::test]
async fn runtime_hint_overrides_extension_resolution() {
    let launcher = Arc::new(MiniScriptLauncher::new());
    let engine = engine_with(launcher);

    // ".txt" resolves to nothing; the hint routes it to the worker anyway.
    let request = RunRequest::single("notes.txt", "console.log(\"ok\")").with_hint("javascript");
    let result = engine.start_run(request, sink, sink).wait().await;

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "ok");
}

#[tokio::test]
async fn sequential_runs_of_one_runtime_reuse_the_context() {
    let launcher = Arc::new(MiniScriptLauncher::new());
    let engine = engine_with(launcher.clone());

    for _ in 0..2 {
        let request = RunRequest::single("main.js", "console.log(40 + 2)");
        let result = engine.start_run(request, sink, sink).wait().await;
        assert_eq!(result.output, "42");
    }
    assert_eq!(launcher.launch_count(), 1);

    // A different runtime provisions its own context.
    let request = RunRequest::single("tool.py", "console.log(1)").with_hint("python");
    engine.start_run(request, sink, sink).wait().await;
    assert_eq!(launcher.launch_count(), 2);
}

#[tokio::test]
async fn output_events_keep_emission_order() {
    let launcher = Arc::new(ScriptedLauncher::new(vec![
        ScriptedStep::Stdout("a".to_string()),
        ScriptedStep::Stdout("b".to_string()),
        ScriptedStep::Stderr("x".to_string()),
        ScriptedStep::Stdout("c".to_string()),
        ScriptedStep::exit_ok(),
    ]));
    let engine = engine_with(launcher);

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_out = seen.clone();
    let seen_err = seen.clone();

    let request = RunRequest::single("script.lua", "print('ignored')");
    let result = engine
        .start_run(
            request,
            move |line| seen_out.lock().unwrap().push(format!("out:{line}")),
            move |line| seen_err.lock().unwrap().push(format!("err:{line}")),
        )
        .wait()
        .await;

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "a\nb\nc");
    assert_eq!(result.stderr, "x");
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["out:a", "out:b", "err:x", "out:c"]
    );
}

#[tokio::test]
async fn timeout_kills_the_context_and_salvages_partial_output() {
    let launcher = Arc::new(ScriptedLauncher::new(vec![
        ScriptedStep::Stdout("partial".to_string()),
        ScriptedStep::Stall,
    ]));
    let engine = engine_with(launcher.clone());

    let started = Instant::now();
    let request = RunRequest::single("main.py", "while True: pass").with_timeout_ms(50);
    let result = engine.start_run(request, sink, sink).wait().await;

    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.output, "partial");
    assert!(result.stderr.contains("timed out"), "stderr: {}", result.stderr);

    // The dead context was removed, so the next run re-provisions.
    let request = RunRequest::single("main.py", "x").with_timeout_ms(50);
    engine.start_run(request, sink, sink).wait().await;
    assert_eq!(launcher.launch_count(), 2);
}

#[tokio::test]
async fn immediate_cancel_resolves_before_any_output() {
    let launcher = Arc::new(ScriptedLauncher::new(vec![
        ScriptedStep::Stdout("never seen".to_string()),
        ScriptedStep::exit_ok(),
    ]));
    let engine = engine_with(launcher.clone());

    let request = RunRequest::single("main.lua", "print(1)");
    let handle = engine.start_run(request, sink, sink);
    handle.cancel();

    let result = handle.wait().await;
    assert_eq!(result.exit_code, 1);
    assert!(result.output.is_empty(), "output: {}", result.output);
    assert!(result.stderr.contains("cancelled"));
    // Cancelled before the worker ever polled, so nothing was provisioned.
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn cancel_resolves_promptly_and_is_idempotent() {
    let launcher = Arc::new(ScriptedLauncher::new(vec![
        ScriptedStep::Stdout("started".to_string()),
        ScriptedStep::Sleep(Duration::from_secs(5)),
        ScriptedStep::exit_ok(),
    ]));
    let engine = engine_with(launcher.clone());

    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
    let request = RunRequest::single("main.rb", "sleep 5");
    let handle = engine.start_run(
        request,
        move |line| {
            let _ = started_tx.send(line.to_string());
        },
        sink,
    );

    // Cancel once the run is demonstrably inside its execution loop.
    started_rx.recv().await.expect("first output line");
    handle.cancel();
    handle.cancel();

    let cancelled_at = Instant::now();
    let result = handle.wait().await;
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.output, "started");
    assert!(result.stderr.contains("cancelled"));

    // Cancellation also evicts the context from the pool.
    let request = RunRequest::single("main.rb", "x").with_timeout_ms(50);
    engine.start_run(request, sink, sink).wait().await;
    assert_eq!(launcher.launch_count(), 2);
}

#[tokio::test]
async fn backend_reported_error_keeps_the_context_warm() {
    let launcher = Arc::new(ScriptedLauncher::new(vec![ScriptedStep::Error(
        "segmentation fault".to_string(),
    )]));
    let engine = engine_with(launcher.clone());

    let request = RunRequest::single("main.c", "int main() {}");
    let result = engine.start_run(request, sink, sink).wait().await;
    assert_eq!(result.exit_code, 1);
    assert!(result.stderr.contains("segmentation fault"));

    let request = RunRequest::single("main.c", "int main() {}");
    engine.start_run(request, sink, sink).wait().await;
    assert_eq!(launcher.launch_count(), 1);
}

#[tokio::test]
async fn exit_artifacts_survive_into_the_result() {
    let mut artifacts = std::collections::BTreeMap::new();
    artifacts.insert("out/app.wasm".to_string(), vec![0u8, 97, 115, 109]);
    let launcher = Arc::new(ScriptedLauncher::new(vec![
        ScriptedStep::Stdout("compiled".to_string()),
        ScriptedStep::Exit {
            exit_code: 0,
            artifacts,
        },
    ]));
    let engine = engine_with(launcher);

    let request = RunRequest::single("main.go", "package main");
    let result = engine.start_run(request, sink, sink).wait().await;

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.artifacts["out/app.wasm"], vec![0, 97, 115, 109]);
}

#[tokio::test]
async fn line_stream_delivers_everything_before_the_result() {
    let launcher = Arc::new(ScriptedLauncher::new(vec![
        ScriptedStep::Stdout("one".to_string()),
        ScriptedStep::Stderr("two".to_string()),
        ScriptedStep::exit_ok(),
    ]));
    let engine = engine_with(launcher);

    let request = RunRequest::single("job.sql", "SELECT 1");
    let mut handle = engine.start_run(request, sink, sink);
    let mut stream = handle.take_line_stream().expect("stream taken once");
    assert!(handle.take_line_stream().is_none());

    let result = handle.wait().await;
    assert_eq!(result.exit_code, 0);

    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        lines.push((line.kind, line.content));
    }
    assert_eq!(
        lines,
        vec![
            (StreamKind::Stdout, "one".to_string()),
            (StreamKind::Stderr, "two".to_string()),
        ]
    );
}

#[tokio::test]
async fn provisioning_failure_becomes_a_failure_result() {
    #[derive(Debug)]
    struct BrokenLauncher;

    #[async_trait::async_trait]
    impl crate::backend::traits::BackendLauncher for BrokenLauncher {
        async fn launch(
            &self,
            descriptor: &crate::registry::RuntimeDescriptor,
        ) -> Result<crate::backend::traits::BackendChannel, crate::backend::traits::ProvisionError>
        {
            Err(crate::backend::traits::ProvisionError::Failed {
                runtime: descriptor.id.clone(),
                msg: "asset download failed".to_string(),
            })
        }
    }

    let engine = engine_with(Arc::new(BrokenLauncher));
    let request = RunRequest::single("main.py", "print(1)");
    let result = engine.start_run(request, sink, sink).wait().await;

    assert_eq!(result.exit_code, 1);
    assert!(result.stderr.contains("asset download failed"));
}

#[tokio::test]
async fn shutdown_then_run_provisions_fresh_contexts() {
    let launcher = Arc::new(MiniScriptLauncher::new());
    let engine = engine_with(launcher.clone());

    let request = RunRequest::single("main.js", "console.log(1)");
    engine.start_run(request, sink, sink).wait().await;
    engine.shutdown().await;

    let request = RunRequest::single("main.js", "console.log(1)");
    engine.start_run(request, sink, sink).wait().await;
    assert_eq!(launcher.launch_count(), 2);
}
