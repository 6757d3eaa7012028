//! Implementation of the `triai serve` command.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use super::agents::{render_workers, summarize, WorkerSummary};
use crate::application::Runtime;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{BackendKind, Config};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Also run every registered agent in this process
    #[arg(long)]
    pub with_agents: bool,
}

#[derive(Debug, Serialize)]
pub struct ServeOutput {
    pub address: String,
    pub backend: BackendKind,
    pub memories_purged: u64,
    pub workers: Vec<WorkerSummary>,
}

impl CommandOutput for ServeOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Broker on {} ({} backend) stopped",
            self.address, self.backend
        )];
        if self.memories_purged > 0 {
            lines.push(format!("Expired memories purged: {}", self.memories_purged));
        }
        if !self.workers.is_empty() {
            lines.push("Agent workers:".to_string());
            lines.extend(render_workers(&self.workers));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: ServeArgs, config: Config, json_mode: bool) -> Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.port);
    let backend = config.database.backend;

    let runtime = Runtime::connect(config)
        .await
        .context("Failed to connect to the configured backend")?;
    runtime.prepare().await.context("Failed to prepare storage")?;

    let (sweep, sweep_task) = runtime.memory_sweep().spawn();

    let supervisor = if args.with_agents {
        let mut supervisor = runtime.local_supervisor();
        for agent in runtime.agents().await? {
            supervisor
                .spawn(agent)
                .context("Failed to start agent worker")?;
        }
        info!(workers = supervisor.len(), "in-process agents started");
        Some(supervisor)
    } else {
        None
    };

    let served = runtime
        .http_server()
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .map_err(|err| anyhow!("Broker server failed: {err}"));

    let reports = match supervisor {
        Some(supervisor) => supervisor.shutdown().await,
        None => Vec::new(),
    };
    sweep.stop();
    let _ = sweep_task.await;
    let memories_purged = sweep.status().await.total_purged;
    runtime.close().await;
    served?;

    let result = ServeOutput {
        address,
        backend,
        memories_purged,
        workers: summarize(&reports),
    };
    output(&result, json_mode);
    Ok(())
}
