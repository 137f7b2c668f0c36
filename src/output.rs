// ABOUTME: Output formatting for CLI feedback and live deployment progress.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::time::Instant;

use crate::cloud::StackEvent;
use crate::deploy::{MachineState, ProgressObserver, ProgressUpdate};
use crate::types::StackName;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
#[derive(Debug)]
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                // Print only the essential result
                println!("{message}");
            }
            OutputMode::Json => emit_stdout(&JsonEvent {
                event: "success",
                message,
                duration_secs: self.duration(),
            }),
        }
    }

    /// Print a warning (suppressed in quiet mode).
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => eprintln!("Warning: {message}"),
            OutputMode::Quiet => {}
            OutputMode::Json => emit_stderr(&JsonEvent {
                event: "warning",
                message,
                duration_secs: None,
            }),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => emit_stderr(&JsonEvent {
                event: "error",
                message,
                duration_secs: self.duration(),
            }),
        }
    }
}

impl ProgressObserver for Output {
    fn on_progress(&self, update: &ProgressUpdate) {
        if update.message.is_empty() {
            return;
        }
        match self.mode {
            OutputMode::Normal => println!("  → {}", update.message),
            OutputMode::Quiet => {}
            OutputMode::Json => emit_stdout(&JsonProgress {
                event: "progress",
                state: update.state,
                message: &update.message,
                completed: update.completed,
                total: update.total,
            }),
        }
    }

    fn on_events_started(&self, stack: &StackName) {
        tracing::debug!(%stack, "streaming stack events");
    }

    fn on_stack_event(&self, event: &StackEvent) {
        match self.mode {
            OutputMode::Normal => {
                let reason = event.reason.as_deref().unwrap_or("");
                println!(
                    "      {} {} {} {}",
                    event.timestamp.format("%H:%M:%S"),
                    event.logical_resource_id,
                    event.status,
                    reason
                );
            }
            OutputMode::Quiet => {}
            OutputMode::Json => emit_stdout(&JsonStackEvent {
                event: "stack_event",
                stack_event: event,
            }),
        }
    }

    fn on_events_stopped(&self, stack: &StackName) {
        tracing::debug!(%stack, "stopped streaming stack events");
    }
}

fn emit_stdout<T: Serialize>(value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        println!("{json}");
    }
}

fn emit_stderr<T: Serialize>(value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        eprintln!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct JsonProgress<'a> {
    event: &'a str,
    state: MachineState,
    message: &'a str,
    completed: usize,
    total: usize,
}

#[derive(Serialize)]
struct JsonStackEvent<'a> {
    event: &'a str,
    stack_event: &'a StackEvent,
}
