//! Runs one isolated worker task per agent and reconnects dropped links.

use backoff::backoff::{Backoff, Constant};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::agent_loop::{AgentLoop, AgentLoopConfig};
use crate::adapters::generators::generator_for;
use crate::adapters::mcp::{connect_local, connect_ws};
use crate::domain::models::{Agent, AgentsConfig, GeneratorsConfig, ReconnectConfig};
use crate::domain::ports::{BrokerLink, GenerationError, LinkError, ReplyGenerator};
use crate::services::SessionBroker;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No generator for agent: {0}")]
    Generator(#[from] GenerationError),

    #[error("Broker link failed: {0}")]
    Link(LinkError),

    #[error("Gave up after {attempts} connection attempts: {last}")]
    ReconnectExhausted { attempts: u32, last: LinkError },
}

/// Where workers connect.
#[derive(Clone)]
pub enum LinkTarget {
    /// A broker running in this process.
    Local(Arc<SessionBroker>),
    /// A broker WebSocket base URL.
    Remote(String),
}

impl LinkTarget {
    async fn connect(&self, agent: &str) -> Result<Arc<dyn BrokerLink>, LinkError> {
        match self {
            Self::Local(broker) => Ok(Arc::new(connect_local(broker, agent).await?)),
            Self::Remote(url) => Ok(Arc::new(connect_ws(url, agent).await?)),
        }
    }
}

/// How one worker ended.
#[derive(Debug)]
pub struct WorkerReport {
    pub agent: String,
    pub result: Result<(), WorkerError>,
}

pub struct AgentSupervisor {
    target: LinkTarget,
    config: AgentsConfig,
    generators: GeneratorsConfig,
    shutdown_tx: watch::Sender<bool>,
    workers: JoinSet<WorkerReport>,
}

impl AgentSupervisor {
    pub fn new(target: LinkTarget, config: AgentsConfig, generators: GeneratorsConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            target,
            config,
            generators,
            shutdown_tx,
            workers: JoinSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Start a worker using the generator the agent's endpoint names.
    pub fn spawn(&mut self, agent: Agent) -> Result<(), WorkerError> {
        let generator = generator_for(&agent.endpoint, &self.generators)?;
        self.spawn_with(agent, generator);
        Ok(())
    }

    pub fn spawn_with(&mut self, agent: Agent, generator: Arc<dyn ReplyGenerator>) {
        let poll_secs = if agent.poll_interval_secs == 0 {
            self.config.default_poll_interval_secs
        } else {
            agent.poll_interval_secs
        };
        let loop_config = AgentLoopConfig {
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            max_tool_rounds: self.config.max_tool_rounds,
        };
        let worker = Worker {
            agent,
            generator,
            target: self.target.clone(),
            loop_config,
            reconnect: self.config.reconnect.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        };
        info!(agent = %worker.agent.name, "starting agent worker");
        self.workers.spawn(worker.run());
    }

    /// Wait for `signal`, or for every worker to end on its own, then stop
    /// the rest and collect their reports.
    pub async fn run_until<F>(mut self, signal: F) -> Vec<WorkerReport>
    where
        F: Future<Output = ()>,
    {
        let mut reports = Vec::new();
        tokio::pin!(signal);
        loop {
            tokio::select! {
                () = &mut signal => break,
                joined = self.workers.join_next() => match joined {
                    Some(joined) => reports.extend(Self::record(joined)),
                    None => return reports,
                },
            }
        }
        reports.extend(self.shutdown().await);
        reports
    }

    /// Signal every worker to stop and wait for them.
    pub async fn shutdown(mut self) -> Vec<WorkerReport> {
        let _ = self.shutdown_tx.send(true);
        let mut reports = Vec::new();
        while let Some(joined) = self.workers.join_next().await {
            reports.extend(Self::record(joined));
        }
        info!(workers = reports.len(), "agent workers stopped");
        reports
    }

    fn record(joined: Result<WorkerReport, tokio::task::JoinError>) -> Option<WorkerReport> {
        match joined {
            Ok(report) => {
                match &report.result {
                    Ok(()) => info!(agent = %report.agent, "agent worker finished"),
                    Err(err) => error!(agent = %report.agent, error = %err, "agent worker failed"),
                }
                Some(report)
            }
            Err(err) => {
                error!(error = %err, "agent worker panicked");
                None
            }
        }
    }
}

struct Worker {
    agent: Agent,
    generator: Arc<dyn ReplyGenerator>,
    target: LinkTarget,
    loop_config: AgentLoopConfig,
    reconnect: ReconnectConfig,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) -> WorkerReport {
        let result = self.supervise().await;
        WorkerReport {
            agent: self.agent.name,
            result,
        }
    }

    async fn supervise(&mut self) -> Result<(), WorkerError> {
        let mut delay = Constant::new(Duration::from_millis(self.reconnect.delay_ms));
        let mut failures = 0;

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let last = match self.target.connect(&self.agent.name).await {
                Ok(link) => {
                    failures = 0;
                    let mut agent_loop = AgentLoop::new(
                        self.agent.clone(),
                        link,
                        Arc::clone(&self.generator),
                        self.loop_config.clone(),
                    );
                    match agent_loop.run(self.shutdown.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(err) if err.is_recoverable() => err,
                        Err(err) => return Err(WorkerError::Link(err)),
                    }
                }
                Err(err) if err.is_recoverable() => err,
                Err(err) => return Err(WorkerError::Link(err)),
            };

            failures += 1;
            if failures >= self.reconnect.max_attempts {
                return Err(WorkerError::ReconnectExhausted {
                    attempts: failures,
                    last,
                });
            }
            let wait = delay
                .next_backoff()
                .unwrap_or(Duration::from_millis(self.reconnect.delay_ms));
            warn!(
                agent = %self.agent.name,
                error = %last,
                attempt = failures,
                max_attempts = self.reconnect.max_attempts,
                delay = ?wait,
                "broker link lost, reconnecting"
            );
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = self.shutdown.changed() => return Ok(()),
            }
        }
    }
}
