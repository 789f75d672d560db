//! bob - workflow orchestrator for LLM coding agents.
//!
//! Each agent session runs `bob --serve` as an MCP stdio server. All
//! sessions on a machine share `~/.bob/state/` for workflow records and
//! the `bob` branch of each repository for prompt additions and tasks.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bob::{Dispatcher, McpServer, StateManager, TaskManager};

/// Workflow orchestrator for LLM coding agents (MCP server)
#[derive(Parser)]
#[command(name = "bob")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run as an MCP server on stdio
    #[arg(long)]
    serve: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the MCP transport.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if cli.serve {
        let dispatcher = Dispatcher::new(StateManager::new(), TaskManager::new());
        McpServer::new(dispatcher).run()?;
        return Ok(());
    }

    print_usage();
    Ok(())
}

fn print_usage() {
    println!("bob v{} - workflow orchestrator for coding agents\n", bob::VERSION);
    println!("Usage:");
    println!("  bob --serve           Run as MCP server (stdio, for agent integration)");
    println!("  bob --version         Show version\n");
    println!("Architecture:");
    println!("  - Each agent session runs 'bob --serve' (MCP stdio mode)");
    println!("  - All sessions share ~/.bob/state/ (JSON workflow records)");
    println!("  - Prompt additions and tasks live on the 'bob' branch of each repository");
}
