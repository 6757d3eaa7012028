//! Agent CLI commands.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use crate::application::{Runtime, WorkerReport};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::{Agent, Config};

#[derive(Args, Debug)]
pub struct AgentArgs {
    #[command(subcommand)]
    pub command: AgentCommands,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// List registered agents
    List,

    /// Run agent workers against agents.broker_url
    Run {
        /// Run only these agents (repeatable)
        #[arg(long = "only", value_name = "NAME")]
        only: Vec<String>,
    },

    /// Change an agent's poll interval; running workers follow on their next poll
    SetInterval {
        /// Agent name
        name: String,
        /// New interval in seconds
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        seconds: u64,
    },
}

#[derive(Debug, Serialize)]
pub struct AgentListOutput {
    pub agents: Vec<Agent>,
    pub total: usize,
}

impl CommandOutput for AgentListOutput {
    fn to_human(&self) -> String {
        if self.agents.is_empty() {
            return "No agents registered.".to_string();
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Name", "Provider", "Model", "Poll (s)", "Description"]);
        for agent in &self.agents {
            table.add_row(vec![
                agent.name.clone(),
                agent.endpoint.provider.clone(),
                agent.endpoint.model.clone(),
                agent.poll_interval_secs.to_string(),
                truncate(&agent.description, 48),
            ]);
        }
        format!("{table}\n{} agent(s)", self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct IntervalOutput {
    pub agent: String,
    pub poll_interval_secs: u64,
}

impl CommandOutput for IntervalOutput {
    fn to_human(&self) -> String {
        format!("{} now polls every {}s", self.agent, self.poll_interval_secs)
    }
}

/// One line per finished worker.
#[derive(Debug, Serialize)]
pub struct WorkerSummary {
    pub agent: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&WorkerReport> for WorkerSummary {
    fn from(report: &WorkerReport) -> Self {
        Self {
            agent: report.agent.clone(),
            ok: report.result.is_ok(),
            error: report.result.as_ref().err().map(ToString::to_string),
        }
    }
}

pub(crate) fn summarize(reports: &[WorkerReport]) -> Vec<WorkerSummary> {
    reports.iter().map(WorkerSummary::from).collect()
}

pub(crate) fn render_workers(workers: &[WorkerSummary]) -> Vec<String> {
    workers
        .iter()
        .map(|w| match &w.error {
            Some(error) => format!("  {} failed: {error}", w.agent),
            None => format!("  {} stopped", w.agent),
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct AgentRunOutput {
    pub broker_url: String,
    pub workers: Vec<WorkerSummary>,
}

impl CommandOutput for AgentRunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "{} agent worker(s) ran against {}",
            self.workers.len(),
            self.broker_url
        )];
        lines.extend(render_workers(&self.workers));
        lines.join("\n")
    }
}

/// Keep the agents named in `only`, or all of them when it is empty.
/// Unknown names are an error.
pub(crate) fn select_agents(agents: Vec<Agent>, only: &[String]) -> Result<Vec<Agent>> {
    if only.is_empty() {
        return Ok(agents);
    }
    let unknown: Vec<&str> = only
        .iter()
        .filter(|name| !agents.iter().any(|a| &a.name == *name))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        bail!("Unknown agent(s): {}", unknown.join(", "));
    }
    Ok(agents.into_iter().filter(|a| only.contains(&a.name)).collect())
}

pub async fn execute(args: AgentArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::connect(config)
        .await
        .context("Failed to connect to the configured backend")?;
    runtime.prepare().await.context("Failed to prepare storage")?;

    match args.command {
        AgentCommands::List => {
            let agents = runtime.agents().await.context("Failed to list agents")?;
            let result = AgentListOutput {
                total: agents.len(),
                agents,
            };
            output(&result, json_mode);
        }
        AgentCommands::Run { only } => {
            let agents = select_agents(runtime.agents().await?, &only)?;
            if agents.is_empty() {
                bail!("No agents registered");
            }

            let mut supervisor = runtime.remote_supervisor();
            for agent in agents {
                supervisor
                    .spawn(agent)
                    .context("Failed to start agent worker")?;
            }
            let reports = supervisor
                .run_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;

            let result = AgentRunOutput {
                broker_url: runtime.config().agents.broker_url.clone(),
                workers: summarize(&reports),
            };
            output(&result, json_mode);
        }
        AgentCommands::SetInterval { name, seconds } => {
            runtime
                .broker()
                .set_poll_interval(&name, seconds)
                .await
                .with_context(|| format!("Failed to change the poll interval of {name}"))?;
            output(
                &IntervalOutput {
                    agent: name,
                    poll_interval_secs: seconds,
                },
                json_mode,
            );
        }
    }

    runtime.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ModelEndpoint;

    fn agent(name: &str) -> Agent {
        Agent::new(name, format!("{name} agent"), ModelEndpoint::new("mock", "echo"), 5)
    }

    #[test]
    fn test_select_agents_filters_and_rejects_unknown() {
        let all = vec![agent("DataAnalyst"), agent("QueryBot"), agent("ReportGen")];

        let picked = select_agents(all.clone(), &["QueryBot".to_string()]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "QueryBot");

        assert_eq!(select_agents(all.clone(), &[]).unwrap().len(), 3);

        let err = select_agents(all, &["Ghost".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_list_output_renders_table() {
        let result = AgentListOutput {
            agents: vec![agent("QueryBot")],
            total: 1,
        };
        let text = result.to_human();
        assert!(text.contains("QueryBot"));
        assert!(text.contains("mock"));
        assert!(text.ends_with("1 agent(s)"));

        let json = result.to_json();
        assert_eq!(json["agents"][0]["name"], "QueryBot");
        assert_eq!(json["total"], 1);
    }

    #[test]
    fn test_interval_output() {
        let result = IntervalOutput {
            agent: "QueryBot".into(),
            poll_interval_secs: 7,
        };
        assert_eq!(result.to_human(), "QueryBot now polls every 7s");
        assert_eq!(result.to_json()["poll_interval_secs"], 7);
    }

    #[test]
    fn test_empty_list() {
        let result = AgentListOutput {
            agents: vec![],
            total: 0,
        };
        assert_eq!(result.to_human(), "No agents registered.");
    }
}
