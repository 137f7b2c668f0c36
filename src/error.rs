// ABOUTME: Application-wide error types for rollstack.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::{RecorderError, RunError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("plan file not found in {0}")]
    PlanNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("deployment already in progress (held by {holder}, pid {pid}, since {since})")]
    InProgress {
        holder: String,
        pid: u32,
        since: chrono::DateTime<chrono::Utc>,
    },

    #[error("invalid fault injection: {0}")]
    InvalidFault(String),

    #[error(transparent)]
    Deploy(#[from] RunError),

    #[error("deployment state error: {0}")]
    State(#[from] RecorderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
