//! Netlab - provision and partition local blockchain test networks.
//!
//! Reads an environment description (network, nodes, baseline firewall
//! rules) from a YAML file and reconciles a Docker host towards it.
//!
//! # Usage
//!
//! ```bash
//! # Show the state of every resource
//! netlab status
//!
//! # Bring everything up, rebuilding images and containers
//! netlab --config lab.yml up --build
//!
//! # Cut node-a off from node-b in both directions
//! netlab ins node-a node-b deny
//!
//! # Tear everything down, removing containers, network and images
//! netlab down --destroy
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use netlab_firewall::RuleChange;
use netlab_orchestrator::{DockerEngine, Environment};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for netlab.
#[derive(Parser, Debug)]
#[command(
    name = "netlab",
    about = "Provision and partition local blockchain test networks",
    version
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "netlab.yml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Show the state of the network, services, nodes and firewall.
    Status {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Bring the environment up.
    Up {
        /// Rebuild images and recreate containers.
        #[arg(long)]
        build: bool,
    },
    /// Bring the environment down.
    Down {
        /// Also remove containers, the network and images.
        #[arg(long)]
        destroy: bool,
    },
    /// Insert a rule at the head of the managed chain.
    Ins(RuleArgs),
    /// Append a rule at the tail of the managed chain.
    Add(RuleArgs),
    /// Delete a rule from the managed chain.
    Del(RuleArgs),
}

#[derive(Args, Debug, PartialEq, Eq)]
struct RuleArgs {
    /// Source: a node name, an address or network, or `*`.
    from: String,

    /// Target: a node name, an address or network, or `*`.
    to: String,

    /// `allow` or `deny`.
    action: String,

    /// Do not add the mirrored rule.
    #[arg(long)]
    one_way: bool,
}

/// Initialize tracing/logging.
fn init_tracing(config: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

fn print_changes(changes: &[RuleChange]) {
    for change in changes {
        let outcome = if change.applied { "applied" } else { "unchanged" };
        println!("{:<10} {}", outcome, change.rule);
    }
}

async fn run(env: &Environment, command: Command) -> Result<()> {
    match command {
        Command::Status { json } => {
            let status = env.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", status);
            }
        }
        Command::Up { build } => env.up(build).await?,
        Command::Down { destroy } => env.down(destroy).await?,
        Command::Ins(rule) => {
            let changes = env
                .insert_rule(&rule.from, &rule.to, &rule.action, rule.one_way)
                .await?;
            print_changes(&changes);
        }
        Command::Add(rule) => {
            let changes = env
                .append_rule(&rule.from, &rule.to, &rule.action, rule.one_way)
                .await?;
            print_changes(&changes);
        }
        Command::Del(rule) => {
            let changes = env
                .delete_rule(&rule.from, &rule.to, &rule.action, rule.one_way)
                .await?;
            print_changes(&changes);
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Load configuration
    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Merge CLI arguments
    config.merge_cli_args(&args);

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Netlab starting"
    );

    let definition = config.into_definition()?;
    let engine = DockerEngine::connect()
        .await
        .context("Failed to connect to the Docker daemon")?;
    let env = Environment::new(Arc::new(engine), definition).context("Invalid environment")?;

    if let Err(e) = run(&env, args.command).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
