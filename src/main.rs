// ABOUTME: Entry point for the rollstack CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use rollstack::config::{self, Plan};
use rollstack::error::{Error, Result};
use rollstack::output::Output;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(cli.output);

    if let Err(e) = run(cli).await {
        output.error(&e.to_string());
        let code = match &e {
            Error::Deploy(run_error) if run_error.requires_manual_repair() => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = env::current_dir()?;
    let output = Output::new(cli.output);

    match cli.command {
        Commands::Init { force } => {
            let path = config::init_plan(&cwd, force)?;
            output.success(&format!("Created {}", path.display()));
            Ok(())
        }
        Commands::Validate => {
            let plan = Plan::resolve(cli.plan.as_deref(), &cwd)?;
            commands::validate(&plan, &output)
        }
        Commands::Rehearse {
            fail_forward,
            fail_settle,
            fail_backward,
            force,
        } => {
            let plan = Plan::resolve(cli.plan.as_deref(), &cwd)?;
            let faults = commands::Faults {
                forward: fail_forward,
                settle: fail_settle,
                backward: fail_backward,
            };
            commands::rehearse(&plan, &cwd, faults, force, output).await
        }
        Commands::Status => {
            let plan = Plan::resolve(cli.plan.as_deref(), &cwd)?;
            commands::status(&plan, &cwd, &output)
        }
    }
}
