use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use deskpilot::agent_engine::state::{AgentEvent, TaskStatus};
use deskpilot::config::{self, AppConfig};
use deskpilot::errors::PilotResult;
use deskpilot::mcp::server::ToolServer;
use deskpilot::tools::gateway::ToolExecutor;
use deskpilot::tools::registry::ToolRegistry;
use deskpilot::tools::types::ServiceKind;

#[derive(Parser)]
#[command(name = "deskpilot", version, about = "Drive a desktop through vision and input tools")]
struct Cli {
    /// Path to config.toml (default: next to the executable, then the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one natural-language task to completion.
    Run {
        task: String,
        /// Override `agent.max_iterations`.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Host one tool service over stdio JSON-RPC.
    Serve {
        #[arg(value_enum)]
        service: ServeTarget,
    },
    /// Print the tool schemas offered to the reasoning backend.
    Tools,
}

#[derive(Clone, Copy, ValueEnum)]
enum ServeTarget {
    Vision,
    Control,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let serving = matches!(cli.command, Command::Serve { .. });
    deskpilot::init_tracing("info", serving);
    deskpilot::load_env();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> PilotResult<ExitCode> {
    match cli.command {
        Command::Run { task, max_iterations } => {
            let mut cfg = config::load_config(cli.config.as_deref())?;
            if let Some(n) = max_iterations {
                cfg.agent.max_iterations = n.max(1);
            }
            run_task(&cfg, &task).await
        }
        Command::Serve { service } => {
            // Tool services need no LLM settings, so a missing config is fine.
            let cfg = config::load_config(cli.config.as_deref()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "using default service settings");
                AppConfig::default()
            });
            serve(&cfg, service).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Tools => {
            let defs = ToolRegistry::builtin().tool_defs();
            println!("{}", serde_json::to_string_pretty(&defs)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_task(cfg: &AppConfig, task: &str) -> PilotResult<ExitCode> {
    let gateway = Arc::new(deskpilot::build_gateway(cfg).await?);
    let engine = deskpilot::build_engine(cfg, gateway)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received; stopping after the current step");
                cancel.cancel();
            }
        }
    });

    let mut events = engine.events().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AgentEvent::IterationStarted { iteration, .. } => eprintln!("-- iteration {iteration}"),
                AgentEvent::ToolCalled { tool, arguments, .. } => eprintln!("   > {tool} {arguments}"),
                AgentEvent::ToolFinished { status, message, .. } => eprintln!("   < {status:?}: {message}"),
                AgentEvent::BackendFailed { consecutive, error, .. } => {
                    eprintln!("   ! reasoning failed ({consecutive} in a row): {error}")
                }
                AgentEvent::RunFinished { .. } => break,
                AgentEvent::RunStarted { .. } => {}
            }
        }
    });

    let report = engine.run_task(task, cancel).await;
    let _ = printer.await;
    println!("{:?}: {}", report.status, report.summary());
    Ok(if report.status == TaskStatus::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn serve(cfg: &AppConfig, target: ServeTarget) -> PilotResult<()> {
    let (kind, executor): (ServiceKind, Arc<dyn ToolExecutor>) = match target {
        ServeTarget::Vision => (ServiceKind::Vision, Arc::new(deskpilot::vision_service(cfg)?)),
        ServeTarget::Control => (ServiceKind::Control, Arc::new(deskpilot::control_service(cfg)?)),
    };
    let server = ToolServer::new(kind, executor);
    server.serve(tokio::io::stdin(), tokio::io::stdout()).await
}
