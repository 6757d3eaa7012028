//! Implementation of the `triai init` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::application::Runtime;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{BackendKind, Config};
use crate::infrastructure::config::PROJECT_CONFIG_FILE;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing .triai/config.yaml
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub backend: BackendKind,
    pub config_written: Option<PathBuf>,
    pub migrations_applied: usize,
    pub agents_seeded: usize,
    pub grants_seeded: usize,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Initialized TriAI on the {} backend", self.backend)];
        if let Some(path) = &self.config_written {
            lines.push(format!("Wrote configuration to {}", path.display()));
        }
        lines.push(format!("Migrations applied: {}", self.migrations_applied));
        lines.push(format!(
            "Seeded {} agent(s) with {} grant(s)",
            self.agents_seeded, self.grants_seeded
        ));
        lines.join("\n")
    }
}

/// Write `config` as YAML unless the file exists and `force` is off.
async fn write_project_config(path: &Path, config: &Config, force: bool) -> Result<bool> {
    if fs::try_exists(path).await.unwrap_or(false) && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    fs::write(path, yaml)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

pub async fn execute(args: InitArgs, config: Config, json_mode: bool) -> Result<()> {
    let config_path = PathBuf::from(PROJECT_CONFIG_FILE);
    let config_written = write_project_config(&config_path, &config, args.force)
        .await?
        .then_some(config_path);

    let backend = config.database.backend;
    let runtime = Runtime::connect(config)
        .await
        .context("Failed to connect to the configured backend")?;
    let report = runtime.prepare().await.context("Failed to prepare storage")?;
    runtime.close().await;

    let result = InitOutput {
        backend,
        config_written,
        migrations_applied: report.migrations_applied,
        agents_seeded: report.agents_seeded,
        grants_seeded: report.grants_seeded,
    };
    output(&result, json_mode);
    Ok(())
}
