mod kits;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kitflow_core::{IntakeData, KitflowConfig, SessionId, WorkflowStage, WorkflowState};
use kitflow_engine::{AuditLogger, KitOrchestrator, SessionSweeper};
use kitflow_registry::{Complexity, KitMetadata, KitQuery};

#[derive(Parser)]
#[command(name = "kitflow", version, about = "Staged legal workflow kits")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "kitflow.toml")]
    config: PathBuf,

    /// Session ID (auto-generated if not provided)
    #[arg(short, long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a kit through all five stages
    Run {
        /// Kit kind id
        #[arg(long)]
        kit: String,
        /// Free-text description of the situation
        #[arg(long)]
        description: String,
        #[arg(long)]
        jurisdiction: Option<String>,
        /// Intake tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Custom intake field as KEY=VALUE; VALUE is parsed as JSON when possible
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
        /// Print progress after each stage
        #[arg(long)]
        tracked: bool,
    },
    /// Search registered kits
    Kits {
        #[arg(long)]
        domain: Vec<String>,
        #[arg(long)]
        tag: Vec<String>,
        /// simple, moderate or complex
        #[arg(long)]
        complexity: Option<String>,
        /// Maximum estimated duration in minutes
        #[arg(long)]
        max_duration: Option<u32>,
    },
    /// Show the registry summary
    Summary,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kitflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "kitflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    let mut registry = kits::builtin_registry()?;
    registry.apply_config(&config.registry);

    match cli.command {
        Commands::Run {
            kit,
            description,
            jurisdiction,
            tags,
            fields,
            tracked,
        } => {
            let session = cli
                .session
                .as_deref()
                .map(SessionId::from_string)
                .unwrap_or_default();

            let Some(instance) = registry.create_kit(&kit, Some(session.clone()), None)? else {
                anyhow::bail!("unknown kit '{}'; see `kitflow kits`", kit);
            };

            let mut intake = IntakeData::new(description).with_tags(tags);
            if let Some(j) = jurisdiction {
                intake = intake.with_jurisdiction(j);
            }
            for (key, value) in fields {
                intake = intake.with_field(key, value);
            }

            let orchestrator = Arc::new(KitOrchestrator::from_config(&config.orchestrator));
            let cancel = CancellationToken::new();

            let audit_handle = config.audit_dir().map(|dir| {
                let include_snapshots = config
                    .audit
                    .as_ref()
                    .map_or(true, |a| a.include_snapshots);
                let logger = AuditLogger::new(dir, include_snapshots);
                tokio::spawn(logger.run(orchestrator.subscribe(), cancel.clone()))
            });

            let sweeper = SessionSweeper::new(
                orchestrator.clone(),
                config.orchestrator.sweep_interval(),
                cancel.clone(),
            );
            let sweeper_handle = tokio::spawn(async move { sweeper.run().await });

            let handle = instance.into_handle();
            let outcome = if tracked {
                let progress = |stage: WorkflowStage, state: &WorkflowState| {
                    println!("[{:>3}%] {} done", state.progress, stage);
                };
                orchestrator
                    .execute_kit_with_tracking(&session, handle, intake, Some(&progress))
                    .await
            } else {
                orchestrator.execute_kit(&session, handle, intake).await
            };

            let events = orchestrator.get_execution_log(&session).await.len();
            info!(session_id = %session, events, "Run finished");
            orchestrator.cleanup_context(&session).await;

            cancel.cancel();
            join_background("session sweeper", sweeper_handle).await;
            if let Some(h) = audit_handle {
                join_background("audit logger", h).await;
            }

            let result = outcome?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Kits {
            domain,
            tag,
            complexity,
            max_duration,
        } => {
            let complexity = complexity
                .map(|c| c.parse::<Complexity>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let query = KitQuery {
                domains: domain,
                tags: tag,
                complexity,
                max_duration,
            };
            let found = registry.search_kits(&query);
            if found.is_empty() {
                println!("No matching kits.");
            }
            for meta in found {
                print_kit(meta);
            }
        }
        Commands::Summary => {
            println!("{}", serde_json::to_string_pretty(&registry.get_summary())?);
            println!("Domains: {}", registry.get_covered_domains().join(", "));
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        // Handled before config loading
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<KitflowConfig> {
    if path.exists() {
        return Ok(KitflowConfig::load(path)?);
    }

    let home_config = KitflowConfig::default().workspace_dir().join("config.toml");
    if home_config.exists() {
        info!(path = %home_config.display(), "Loading config from workspace directory");
        return Ok(KitflowConfig::load(&home_config)?);
    }

    warn!(path = %path.display(), "No config file found, using defaults");
    Ok(KitflowConfig::default())
}

/// Wait for a background task, logging a panic or cancellation.
/// Returns whether the task finished cleanly.
async fn join_background(name: &str, handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(task = name, error = %e, "Background task failed");
            false
        }
    }
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("field key must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn print_kit(meta: &KitMetadata) {
    let domains: Vec<&str> = meta.domains.iter().map(String::as_str).collect();
    println!(
        "{:<18} {:<20} {:<9} ~{:>3} min  [{}]",
        meta.id,
        meta.name,
        meta.complexity,
        meta.estimated_duration_minutes,
        domains.join(", ")
    );
}
