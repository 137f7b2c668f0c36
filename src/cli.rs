// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use rollstack::output::OutputMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollstack")]
#[command(about = "Multi-stack infrastructure deployment with automatic rollback")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "normal")]
    pub output: OutputMode,

    /// Plan file (defaults to rollstack.yml in the current directory)
    #[arg(long, global = true)]
    pub plan: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter rollstack.yml
    Init {
        /// Overwrite an existing plan file
        #[arg(long)]
        force: bool,
    },

    /// Parse the plan and list its steps
    Validate,

    /// Run the plan against a simulated provider
    Rehearse {
        /// Reject the forward update of this step (1-based)
        #[arg(long, value_name = "STEP")]
        fail_forward: Option<usize>,

        /// Let the forward update of this step settle in a failed status (1-based)
        #[arg(long, value_name = "STEP")]
        fail_settle: Option<usize>,

        /// Reject the backward update of this step (1-based)
        #[arg(long, value_name = "STEP")]
        fail_backward: Option<usize>,

        /// Start even if a deployment record says another run is in progress
        #[arg(long)]
        force: bool,
    },

    /// Show the recorded state of the last deployment
    Status,
}
