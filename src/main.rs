use std::panic;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use run_dispatch::backend::pool::BackendPool;
use run_dispatch::dispatch::engine::DispatchEngine;
use run_dispatch::domain::{FileContent, RunRequest};
use run_dispatch::registry::RuntimeRegistry;
use run_dispatch::store::{InMemoryProjectStore, ProjectFileStore};
use run_dispatch::stubs::backend::MiniScriptLauncher;

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let registry = Arc::new(RuntimeRegistry::with_defaults());
    let pool = Arc::new(BackendPool::new(Arc::new(MiniScriptLauncher::new())));
    let engine = DispatchEngine::new(registry, pool);

    let store = InMemoryProjectStore::new();
    let mut files = std::collections::BTreeMap::new();
    files.insert(
        "main.js".to_string(),
        FileContent::from(
            "// demo project\nconsole.log(\"hello from the dispatch engine\")\nconsole.log(1 + 41)\n",
        ),
    );
    files.insert("data.json".to_string(), FileContent::from(r#"{"answer":42}"#));
    let project_id = store.insert_project(files);

    let files = store.files_for_run(project_id).await?;
    tracing::info!(%project_id, files = files.len(), "running demo project");

    let request = RunRequest::new("main.js", files);
    let handle = engine.start_run(
        request,
        |line| println!("{line}"),
        |line| eprintln!("{line}"),
    );
    let result = handle.wait().await;
    tracing::info!(
        exit_code = result.exit_code,
        execution_time_ms = result.execution_time_ms,
        "run finished"
    );

    // Second run of the same runtime reuses the warm execution context.
    let request = RunRequest::single("again.js", "console.log(\"still warm\")").with_hint("javascript");
    let result = engine.start_run(request, |line| println!("{line}"), |_| {}).wait().await;
    tracing::info!(exit_code = result.exit_code, "second run finished");

    engine.shutdown().await;
    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
