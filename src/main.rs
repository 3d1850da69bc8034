// ABOUTME: Entry point for the swarmspec binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and validates or runs a YAML swarm document.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use swarmspec_agent::{
    EchoBackend, PipelineOptions, PipelineResult, load_and_validate, run_validated,
};
use swarmspec_core::{AgentDefaults, ConfigSource, ReturnType, RuntimeConfig, ValidatedConfig};
use tracing_subscriber::EnvFilter;

/// swarmspec - declarative multi-agent swarms from YAML
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate a document, then print what it declares
    Validate {
        /// Path to the YAML document
        #[arg(short, long)]
        file: PathBuf,

        /// Model for agents that name none
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Build the document's agents against the offline echo backend and run it
    Run {
        /// Path to the YAML document
        #[arg(short, long)]
        file: PathBuf,

        /// What to hand back [auto, swarm, agents, both, tasks, run_swarm]
        #[arg(short, long, default_value = "run_swarm")]
        return_type: String,

        /// Model for agents that name none
        #[arg(short, long)]
        model: Option<String>,

        /// Task for the swarm, overriding the one in the document
        #[arg(short, long)]
        task: Option<String>,

        /// Build all agents at once instead of one after another
        #[arg(long)]
        concurrent_construction: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "swarmspec={default_level},swarmspec_core={default_level},swarmspec_agent={default_level}"
            ))
        }))
        .init();

    let config = RuntimeConfig::from_env().context("invalid SWARMSPEC_* environment")?;

    match cli.command {
        Commands::Validate { file, model } => {
            let defaults = AgentDefaults {
                model_name: model.unwrap_or_else(|| config.default_model.clone()),
            };
            let validated = load_and_validate(&ConfigSource::File(file), &defaults)?;
            print_validated(&validated);
        }
        Commands::Run {
            file,
            return_type,
            model,
            task,
            concurrent_construction,
            json,
        } => {
            let return_type: ReturnType = return_type.parse()?;
            let defaults = AgentDefaults {
                model_name: model.unwrap_or_else(|| config.default_model.clone()),
            };
            let validated = load_and_validate(&ConfigSource::File(file), &defaults)?;
            let wants_json = json || validated.swarm.as_ref().is_some_and(|s| s.return_json);

            let options = PipelineOptions::from_config(&config)
                .with_concurrent_construction(concurrent_construction);

            tracing::info!(workspace = %config.home.display(), "swarmspec run starting");
            let result = run_validated(
                validated,
                return_type,
                task.as_deref(),
                &EchoBackend::factory(),
                &options,
            )
            .await?;
            print_result(result, wants_json)?;
        }
    }

    Ok(())
}

fn print_validated(config: &ValidatedConfig) {
    println!("agents ({}):", config.agents.len());
    for agent in &config.agents {
        println!(
            "  - {} [model: {}, max_loops: {}, retry_attempts: {}]",
            agent.name, agent.model_name, agent.max_loops, agent.retry_attempts
        );
    }
    match &config.swarm {
        Some(swarm) => {
            println!("swarm: {} ({})", swarm.name, swarm.swarm_type);
            if let Some(flow) = &swarm.flow {
                println!("  flow: {flow}");
            }
            if let Some(aggregator) = &swarm.aggregator_agent {
                println!("  aggregator: {aggregator}");
            }
        }
        None => println!("swarm: none"),
    }
}

fn print_result(result: PipelineResult, json: bool) -> Result<()> {
    match result {
        PipelineResult::Execution(output) if json => println!("{}", output.to_json()?),
        PipelineResult::Execution(output) => println!("{}", output.output),
        PipelineResult::Tasks(results) if json => {
            println!("{}", serde_json::to_string_pretty(&results)?)
        }
        PipelineResult::Tasks(results) => {
            for result in results {
                match (result.output, result.error) {
                    (Some(output), _) => println!("{}: {}", result.agent_name, output),
                    (None, Some(error)) => println!("{}: error: {}", result.agent_name, error),
                    (None, None) => println!("{}: (no output)", result.agent_name),
                }
            }
        }
        PipelineResult::Router(router) => {
            println!(
                "swarm {} ({}) with agents: {}",
                router.spec().name,
                router.spec().swarm_type,
                router.agent_names().join(", ")
            );
        }
        PipelineResult::Agent(agent) => println!("agent: {}", agent.name()),
        PipelineResult::Agents(agents) => {
            let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
            println!("agents: {}", names.join(", "));
        }
        PipelineResult::Both { router, agents } => {
            let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
            println!("agents: {}", names.join(", "));
            match router {
                Some(router) => println!("swarm: {} ({})", router.spec().name, router.spec().swarm_type),
                None => println!("swarm: none"),
            }
        }
    }
    Ok(())
}
