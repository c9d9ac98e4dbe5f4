//! The `conductor` binary: loads a TOML config, seeds the engine with the
//! configured agents and workflows, and serves the gateway.

use clap::{Parser, Subcommand};
use conductor_core::{Agent, Capability, Workflow, WorkflowStepTemplate};
use conductor_engine::{LoopbackProvider, TaskManager};
use conductor_gateway::GatewayServer;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor — autonomous task orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestration gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show the configured agent pool
    Agents,
    /// Show the configured workflow catalog
    Workflows,
}

#[derive(Deserialize, Default)]
struct ConductorConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    approvals: ApprovalConfig,
    #[serde(default)]
    events: EventConfig,
    #[serde(default)]
    agents: Vec<AgentConfig>,
    #[serde(default)]
    workflows: Vec<WorkflowConfig>,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize)]
struct ApprovalConfig {
    #[serde(default = "default_ttl_minutes")]
    ttl_minutes: u32,
    #[serde(default = "default_sweep_seconds")]
    sweep_seconds: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            sweep_seconds: default_sweep_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct EventConfig {
    #[serde(default = "default_event_capacity")]
    capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

#[derive(Deserialize)]
struct AgentConfig {
    name: String,
    capabilities: Vec<String>,
}

#[derive(Deserialize)]
struct WorkflowConfig {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    steps: Vec<WorkflowStepConfig>,
}

#[derive(Deserialize)]
struct WorkflowStepConfig {
    name: String,
    capability: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    requires_approval: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4000
}
fn default_ttl_minutes() -> u32 {
    30
}
fn default_sweep_seconds() -> u64 {
    10
}
fn default_event_capacity() -> usize {
    256
}

fn parse_capabilities(tags: &[String], owner: &str) -> anyhow::Result<Vec<Capability>> {
    let mut capabilities = Vec::new();
    for tag in tags {
        let capability = Capability::parse_tag(tag)
            .ok_or_else(|| anyhow::anyhow!("unknown capability '{tag}' for '{owner}'"))?;
        capabilities.push(capability);
    }
    if capabilities.is_empty() {
        capabilities.push(Capability::General);
    }
    Ok(capabilities)
}

fn build_workflow(config: &WorkflowConfig) -> anyhow::Result<Workflow> {
    let mut workflow = Workflow::new(&config.name).with_tags(config.tags.clone());
    for step in &config.steps {
        let capability = Capability::parse_tag(&step.capability).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown capability '{}' in workflow '{}'",
                step.capability,
                config.name
            )
        })?;
        workflow = workflow.with_step(WorkflowStepTemplate {
            name: step.name.clone(),
            required_capability: capability,
            description: step.description.clone(),
            requires_approval: step.requires_approval,
        });
    }
    Ok(workflow)
}

async fn load_config(path: &PathBuf) -> anyhow::Result<ConductorConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(toml::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(config = %path.display(), "config file not found, using defaults");
            Ok(ConductorConfig::default())
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to read config file '{}': {e}",
            path.display()
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);

            let manager = TaskManager::builder(Arc::new(LoopbackProvider))
                .with_approval_ttl(chrono::Duration::minutes(i64::from(
                    config.approvals.ttl_minutes,
                )))
                .with_event_capacity(config.events.capacity)
                .build();

            for agent_config in &config.agents {
                let capabilities = parse_capabilities(&agent_config.capabilities, &agent_config.name)?;
                manager
                    .register_agent(Agent::new(&agent_config.name, capabilities))
                    .await?;
            }
            info!(agents = config.agents.len(), "agent pool registered");

            for workflow_config in &config.workflows {
                manager.register_workflow(build_workflow(workflow_config)?).await;
            }
            info!(workflows = config.workflows.len(), "workflow catalog loaded");

            let _sweeper = manager.start_sweeper(Duration::from_secs(config.approvals.sweep_seconds));

            let addr = format!("{host}:{port}").parse()?;
            info!("conductor gateway listening on {host}:{port}");
            GatewayServer::serve(manager, addr).await?;
        }
        Commands::Agents => {
            if config.agents.is_empty() {
                println!("No agents configured.");
                println!("Add agents in conductor.toml under [[agents]]");
            } else {
                println!("Configured agents:");
                for agent in &config.agents {
                    println!("  {} — {}", agent.name, agent.capabilities.join(", "));
                }
                println!("\nTotal: {} agent(s)", config.agents.len());
            }
        }
        Commands::Workflows => {
            if config.workflows.is_empty() {
                println!("No workflows configured.");
                println!("Add workflows in conductor.toml under [[workflows]]");
            } else {
                println!("Configured workflows:");
                for workflow in &config.workflows {
                    println!(
                        "  {} (tags: {})",
                        workflow.name,
                        workflow.tags.join(", ")
                    );
                    for (index, step) in workflow.steps.iter().enumerate() {
                        let gate = if step.requires_approval {
                            " [approval]"
                        } else {
                            ""
                        };
                        println!("    {}. {} ({}){gate}", index + 1, step.name, step.capability);
                    }
                }
                println!("\nTotal: {} workflow(s)", config.workflows.len());
            }
        }
    }

    Ok(())
}
