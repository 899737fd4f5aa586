use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowdeck_client::{BackendClient, WsEventSource};
use flowdeck_core::config::AppConfig;
use flowdeck_core::event::EventBus;
use flowdeck_core::traits::WorkflowApi;
use flowdeck_core::types::{AgentDescriptor, EditorEvent, ExecutionOutcome, HealthStatus, WorkflowDocument};
use flowdeck_core::validate::validate;
use flowdeck_editor::{EditorOrchestrator, PersistenceClient, Point, Submission};

#[derive(Parser)]
#[command(name = "flowdeck", version, about = "Workflow graph editor for agent backends")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowdeck.toml")]
    config: PathBuf,

    /// Backend base URL (overrides backend.api_url)
    #[arg(long, env = "FLOWDECK_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List agents available for the node palette
    Agents,
    /// List workflows stored on the backend
    List,
    /// Print a stored workflow as JSON
    Show {
        /// Workflow ID
        id: String,
    },
    /// Delete a stored workflow
    Delete {
        /// Workflow ID
        id: String,
    },
    /// List workflow templates, or create a workflow from one
    Templates {
        #[command(subcommand)]
        action: Option<TemplateCommand>,
    },
    /// Check backend connectivity
    Health,
    /// Validate a workflow file without contacting the backend
    Validate {
        /// Exported workflow JSON
        file: PathBuf,
    },
    /// Lay out a linear chain of agents and export it
    New {
        /// Workflow name
        name: String,
        /// Agent types, in execution order
        #[arg(long = "agent", required = true)]
        agents: Vec<String>,
        /// Output directory or file (default: editor.export_dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export a stored workflow to a file
    Fetch {
        /// Workflow ID
        id: String,
        /// Output directory or file (default: editor.export_dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import a workflow file, save it, execute it and follow its progress
    Run {
        /// Exported workflow JSON
        file: PathBuf,
        /// Initial data passed to the workflow (JSON object)
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Create a workflow on the backend from a template and export it
    Create {
        /// Template ID
        id: String,
        /// Name for the new workflow
        #[arg(long)]
        name: Option<String>,
        /// Output directory or file (default: editor.export_dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Horizontal spacing between generated nodes.
const CHAIN_SPACING: f64 = 250.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowdeck=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowdeck", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(url) = cli.api_url {
        config.backend.api_url = url;
    }

    match cli.command {
        Commands::Agents => {
            let client = BackendClient::from_config(&config)?;
            let agents = client.available_agents().await?;
            if agents.is_empty() {
                println!("No agents available.");
            }
            for agent in agents {
                println!(
                    "{} {:<24} {} [{}]",
                    agent.icon, agent.id, agent.name, agent.category
                );
            }
        }
        Commands::List => {
            let client = BackendClient::from_config(&config)?;
            let workflows = client.list_workflows().await?;
            if workflows.is_empty() {
                println!("No workflows stored.");
            }
            for wf in workflows {
                println!(
                    "{:<32} {:<24} nodes={} connections={} {}",
                    wf.id,
                    wf.name,
                    wf.node_count,
                    wf.connection_count,
                    wf.status.unwrap_or_default()
                );
            }
        }
        Commands::Show { id } => {
            let client = BackendClient::from_config(&config)?;
            let doc = client.get_workflow(&id).await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Commands::Delete { id } => {
            let client = BackendClient::from_config(&config)?;
            client.delete_workflow(&id).await?;
            println!("Deleted {}", id);
        }
        Commands::Templates { action: None } => {
            let client = BackendClient::from_config(&config)?;
            for template in client.list_templates().await? {
                println!(
                    "{:<24} {:<32} [{}] {}",
                    template.id,
                    template.name,
                    template.category,
                    template.description.unwrap_or_default()
                );
            }
        }
        Commands::Health => {
            let client = BackendClient::from_config(&config)?;
            let report = client.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status != HealthStatus::Healthy {
                bail!("backend at {} is {:?}", config.backend.api_url, report.status);
            }
        }
        Commands::Templates {
            action: Some(TemplateCommand::Create { id, name, out }),
        } => {
            let editor = build_editor(&config)?;
            let customizations = match name {
                Some(name) => serde_json::json!({ "name": name }),
                None => serde_json::json!({}),
            };
            let workflow_id = editor.new_from_template(&id, customizations).await?;
            let doc = editor.document().await;
            let target = out.unwrap_or_else(|| PathBuf::from(&config.editor.export_dir));
            let path = editor.persistence().export_to_file(&doc, &target).await?;
            println!("{} -> {}", workflow_id, path.display());
        }
        Commands::Validate { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let doc: WorkflowDocument = serde_json::from_slice(&bytes)
                .with_context(|| format!("{} is not a workflow document", file.display()))?;
            let report = validate(&doc);
            if report.is_valid {
                println!(
                    "{}: valid ({} nodes, {} connections)",
                    file.display(),
                    doc.nodes.len(),
                    doc.connections.len()
                );
            } else {
                for error in &report.errors {
                    println!("  - {}", error);
                }
                bail!("{} has {} validation error(s)", file.display(), report.errors.len());
            }
        }
        Commands::New { name, agents, out } => {
            let editor = build_editor(&config)?;
            if let Err(e) = editor.init().await {
                warn!(error = %e, "Agent catalog unavailable, using bare agent types");
            }
            editor.new_document(Some(&name)).await;
            lay_out_chain(&editor, &agents).await?;

            let doc = editor.document().await;
            let report = validate(&doc);
            if !report.is_valid {
                bail!("generated workflow is invalid: {}", report.errors.join(", "));
            }
            let target = out.unwrap_or_else(|| PathBuf::from(&config.editor.export_dir));
            let path = editor.persistence().export_to_file(&doc, &target).await?;
            println!("{} -> {}", doc.id, path.display());
        }
        Commands::Fetch { id, out } => {
            let client = BackendClient::from_config(&config)?;
            let doc = client.get_workflow(&id).await?;
            let persistence =
                PersistenceClient::new(Arc::new(client), config.editor.exported_by.clone());
            let target = out.unwrap_or_else(|| PathBuf::from(&config.editor.export_dir));
            let path = persistence.export_to_file(&doc, &target).await?;
            println!("{} -> {}", doc.id, path.display());
        }
        Commands::Run { file, data } => {
            let initial_data: serde_json::Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            run_workflow(&config, &file, initial_data).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn build_editor(config: &AppConfig) -> anyhow::Result<EditorOrchestrator> {
    let api = Arc::new(BackendClient::from_config(config)?);
    let events = Arc::new(WsEventSource::from_config(config));
    let bus = Arc::new(EventBus::default());
    let idle_timeout = config.stream.idle_timeout_secs.map(Duration::from_secs);
    Ok(
        EditorOrchestrator::new(api, events, bus, config.editor.clone())
            .with_idle_timeout(idle_timeout),
    )
}

/// Drop each agent onto the canvas left to right and chain them with
/// success connections.
async fn lay_out_chain(editor: &EditorOrchestrator, agents: &[String]) -> anyhow::Result<()> {
    editor
        .edit(|state| -> anyhow::Result<()> {
            let mut previous: Option<String> = None;
            for (i, agent_type) in agents.iter().enumerate() {
                let descriptor = state
                    .agent(agent_type)
                    .cloned()
                    .unwrap_or_else(|| AgentDescriptor::new(agent_type.as_str(), agent_type.as_str()));
                state.canvas.begin_drag(descriptor);
                let pointer = Point::new(100.0 + i as f64 * CHAIN_SPACING, 100.0);
                let Some(node) = state
                    .canvas
                    .drop_at(&mut state.graph, pointer, Point::new(0.0, 0.0))
                else {
                    continue;
                };
                if let Some(source) = previous.replace(node.id.clone()) {
                    state.graph.add_connection(&source, &node.id, "success")?;
                }
            }
            Ok(())
        })
        .await
}

async fn run_workflow(
    config: &AppConfig,
    file: &Path,
    initial_data: serde_json::Value,
) -> anyhow::Result<()> {
    let doc = PersistenceClient::import_from_file(file)
        .await
        .with_context(|| format!("Failed to import {}", file.display()))?;

    let editor = build_editor(config)?;
    if let Err(e) = editor.init().await {
        warn!(error = %e, "Agent catalog unavailable");
    }
    editor.load_document(&doc).await?;
    info!(workflow_id = %doc.id, nodes = doc.nodes.len(), "Workflow imported");

    let mut rx = editor.bus().subscribe();
    let run = editor.execute(initial_data);
    tokio::pin!(run);

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            Ok(event) = rx.recv() => print_event(&event),
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping updates; the backend keeps running.");
                editor.cancel_execution().await;
            }
        }
    };
    while let Ok(event) = rx.try_recv() {
        print_event(&event);
    }

    let report = match result? {
        Submission::Accepted(report) => report,
        Submission::AlreadyInFlight => bail!("a save is already in flight"),
    };
    for (node_id, progress) in &report.nodes {
        println!("{:<40} {:<10} {:>3}%", node_id, progress.status, progress.progress);
    }
    match report.outcome {
        ExecutionOutcome::Completed | ExecutionOutcome::Cancelled => Ok(()),
        ExecutionOutcome::Failed { error } => {
            bail!("workflow failed: {}", error.unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

fn print_event(event: &EditorEvent) {
    match event {
        EditorEvent::Saved { workflow_id } => eprintln!("[saved] {}", workflow_id),
        EditorEvent::ExecutionStarted {
            workflow_id,
            execution_id,
        } => eprintln!(
            "[started] {} ({})",
            workflow_id,
            execution_id.as_deref().unwrap_or("no execution id")
        ),
        EditorEvent::NodeStatusChanged {
            node_id,
            status,
            progress,
        } => eprintln!("[{}] {} {}%", status, node_id, progress),
        EditorEvent::UnknownNode { node_id } => eprintln!("[ignored] event for unknown node {}", node_id),
        EditorEvent::ExecutionFinished { workflow_id, outcome } => {
            eprintln!("[finished] {} {:?}", workflow_id, outcome)
        }
        EditorEvent::ExecutionInterrupted { workflow_id, reason } => {
            eprintln!("[interrupted] {}: {}", workflow_id, reason)
        }
        EditorEvent::CanvasCleared => eprintln!("[cleared]"),
    }
}
