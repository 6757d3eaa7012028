use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for TriAI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Broker HTTP/WebSocket server
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend selection and pool settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Transient-failure retry policy for the resilient store
    #[serde(default)]
    pub retry: RetryConfig,

    /// Row limits for the tool catalog
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Agent registry seed and agent-side runtime settings
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Reply generator endpoints
    #[serde(default)]
    pub generators: GeneratorsConfig,

    /// Background maintenance
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Identity reported to the browser client as the current human user
    #[serde(default = "default_current_user")]
    pub current_user: String,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    #[serde(default)]
    pub application: ApplicationConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "user".to_string())
}

const fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            current_user: default_current_user(),
            enable_cors: true,
            application: ApplicationConfig::default(),
        }
    }
}

/// Branding shown by the browser client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    pub display_name: String,
    pub description: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "triai".to_string(),
            display_name: "TriAI".to_string(),
            description: "Multi-agent AI framework".to_string(),
        }
    }
}

/// Which storage engine backs the resilient store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Mock,
    Sqlite,
    Postgres,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Connection URL; ignored by the mock backend
    #[serde(default)]
    pub url: String,

    /// Name reported as the home database
    #[serde(default = "default_database_name")]
    pub name: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Rows per statement for bulk writes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_database_name() -> String {
    "triai".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_acquire_timeout_secs() -> u64 {
    10
}

const fn default_chunk_size() -> usize {
    500
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            url: String::new(),
            name: default_database_name(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries after the first attempt before a transient failure becomes fatal
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ToolsConfig {
    #[serde(default = "default_row_limit")]
    pub default_row_limit: u32,

    /// Hard ceiling applied regardless of the requested limit
    #[serde(default = "default_max_row_limit")]
    pub max_row_limit: u32,

    #[serde(default = "default_sample_rows")]
    pub default_sample_rows: u32,

    #[serde(default = "default_max_sample_rows")]
    pub max_sample_rows: u32,

    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

const fn default_row_limit() -> u32 {
    1000
}

const fn default_max_row_limit() -> u32 {
    10_000
}

const fn default_sample_rows() -> u32 {
    10
}

const fn default_max_sample_rows() -> u32 {
    100
}

const fn default_history_limit() -> u32 {
    50
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_row_limit: default_row_limit(),
            max_row_limit: default_max_row_limit(),
            default_sample_rows: default_sample_rows(),
            max_sample_rows: default_max_sample_rows(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentsConfig {
    /// Broker address agent workers connect to
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    #[serde(default = "default_poll_interval_secs")]
    pub default_poll_interval_secs: u64,

    /// Generator/tool round trips allowed while answering one message
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Registry seed, upserted at startup
    #[serde(default = "default_seed_agents")]
    pub seed: Vec<AgentSeed>,
}

fn default_broker_url() -> String {
    "ws://127.0.0.1:8080".to_string()
}

const fn default_poll_interval_secs() -> u64 {
    3
}

const fn default_max_tool_rounds() -> u32 {
    4
}

fn default_seed_agents() -> Vec<AgentSeed> {
    [
        ("DataAnalyst", "Analyzes data and produces insights"),
        ("QueryBot", "Writes and runs SQL queries on request"),
        ("ReportGen", "Builds summaries and reports from query results"),
    ]
    .into_iter()
    .map(|(name, description)| AgentSeed {
        name: name.to_string(),
        description: description.to_string(),
        model_api: "ollama".to_string(),
        model: "qwen2.5-coder:latest".to_string(),
        poll_interval_secs: None,
        grants: default_grants(),
    })
    .collect()
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            default_poll_interval_secs: default_poll_interval_secs(),
            max_tool_rounds: default_max_tool_rounds(),
            reconnect: ReconnectConfig::default(),
            seed: default_seed_agents(),
        }
    }
}

/// Agent-side reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
}

const fn default_reconnect_attempts() -> u32 {
    5
}

const fn default_reconnect_delay_ms() -> u64 {
    2000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_attempts(),
            delay_ms: default_reconnect_delay_ms(),
        }
    }
}

/// One registry entry supplied by configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentSeed {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_model_api")]
    pub model_api: String,

    #[serde(default)]
    pub model: String,

    /// Falls back to `agents.default_poll_interval_secs`
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,

    #[serde(default = "default_grants")]
    pub grants: Vec<GrantSeed>,
}

fn default_model_api() -> String {
    "ollama".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSeed {
    pub object: String,
    pub operation: String,
}

fn default_grants() -> Vec<GrantSeed> {
    vec![GrantSeed {
        object: "*".to_string(),
        operation: "SELECT".to_string(),
    }]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorsConfig {
    #[serde(default)]
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

const fn default_generation_timeout_secs() -> u64 {
    120
}

const fn default_temperature() -> f32 {
    0.2
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            timeout_secs: default_generation_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MaintenanceConfig {
    /// Seconds between expired-memory sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_true")]
    pub sweep_on_startup: bool,
}

const fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_on_startup: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}
