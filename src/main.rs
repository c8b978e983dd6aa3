use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::mpsc;

use agent_orchestrator::agent_core::{AgentEvent, EnvCredentials, Orchestrator, QueryOptions};
use agent_orchestrator::inference::CompletionClient;
use agent_orchestrator::mcp_client::ConnectionManager;
use agent_orchestrator::{config, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        bail!("usage: agent-orchestrator <prompt>");
    }

    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let config = config::load(&cwd)?;

    let client = CompletionClient::new(config.completion_settings())?;
    let credentials = Arc::new(EnvCredentials::new([config.provider.clone()]));
    let manager = Arc::new(ConnectionManager::new(config.mcp_timeouts()));
    let orchestrator = Orchestrator::new(
        client,
        credentials,
        manager.clone(),
        config.orchestrator_settings(),
    );

    let mut options = QueryOptions::new(prompt, cwd);
    options.mcp_servers = config.mcp_servers.clone();

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel(256);
    let printer = tokio::spawn(async move {
        let mut failed = false;
        while let Some(event) = rx.recv().await {
            failed |= matches!(event, AgentEvent::Error { .. });
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            }
        }
        failed
    });

    orchestrator.execute_query(options, tx).await;
    let failed = printer.await.context("event printer panicked")?;
    manager.close().await;

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
