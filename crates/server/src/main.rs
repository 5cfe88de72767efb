use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod api;
mod config;
mod functions;

use config::{AppState, ServerConfig};
use tierflow_core::WorkflowId;

#[derive(Parser, Debug)]
#[command(name = "tierflow")]
#[command(about = "Tiered workflow orchestrator", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "tierflow.toml", env = "TIERFLOW_CONFIG")]
    config: PathBuf,

    /// Data directory for storage
    #[arg(short, long, default_value = "./data", env = "TIERFLOW_DATA_DIR")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Execute a workflow file once and print its report
    Run {
        /// Workflow definition (.json or .toml)
        workflow: PathBuf,

        /// Run id to use instead of a generated one
        #[arg(long)]
        workflow_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tierflow=info,tierflow_core=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("Data directory: {}", args.data_dir.display());

    // Load configuration
    let config = ServerConfig::load(&args.config, args.data_dir)?;

    match args.command {
        Command::Serve { port, host } => {
            let addr = format!("{}:{}", host, port);
            tracing::info!("Starting API server on {}", addr);

            api::serve(&addr, config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            workflow,
            workflow_id,
        } => {
            let spec = config::load_workflow(&workflow)?;
            let state = AppState::new(&config)?;
            let workflow_id = workflow_id
                .map(WorkflowId::new)
                .unwrap_or_else(WorkflowId::generate);

            let report = state.engine.execute(workflow_id, &spec).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.is_completed() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
